use anyhow::Context;
use tracing::info;
use wd_agents::audit::AuditRecord;
use wd_agents::orchestrator::{Orchestrator, RequestOutcome};
use wd_core::config::Config;
use wd_harness::executor::ExecutionOutput;

use super::build_orchestrator;

pub async fn run(cfg: &Config, requests: &[String], audit_json: bool) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(cfg)?;
    info!(
        requests = requests.len(),
        provider = %cfg.channel.provider,
        "processing requests"
    );
    for line in process_all(&orchestrator, requests).await {
        println!("{line}");
    }

    let records = orchestrator.get_audit_log(None, None);
    println!();
    if audit_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&records).context("serialising audit log")?
        );
    } else {
        println!("{}", render_audit(&records));
    }
    Ok(())
}

/// Run requests one after another; one rendered line per request.
pub async fn process_all(orchestrator: &Orchestrator, requests: &[String]) -> Vec<String> {
    let mut lines = Vec::with_capacity(requests.len());
    for request in requests {
        let outcome = orchestrator.process_request(request).await;
        lines.push(render_outcome(request, &outcome));
    }
    lines
}

pub fn render_outcome(request: &str, outcome: &RequestOutcome) -> String {
    let mut line = if outcome.success {
        format!("[ok]     {request}: {}", outcome.result.as_deref().unwrap_or(""))
    } else {
        format!("[failed] {request}: {}", outcome.error.as_deref().unwrap_or("unknown error"))
    };
    if let (Some(id), Some(status)) = (&outcome.request_id, &outcome.approval_status) {
        line.push_str(&format!(" (approval {id}: {status})"));
    }
    if let Some(ExecutionOutput::Contents { text, .. }) = &outcome.output {
        line.push('\n');
        line.push_str(text);
    }
    line
}

pub fn render_audit(records: &[AuditRecord]) -> String {
    let mut out = format!("Audit log ({} entries)\n{}", records.len(), "-".repeat(40));
    for r in records {
        let target = match &r.destination {
            Some(dest) => format!("{} -> {dest}", r.path),
            None => r.path.clone(),
        };
        let approval = match (&r.approval_status, &r.approved_by) {
            (Some(status), Some(by)) => format!(" [{status} by {by}]"),
            (Some(status), None) => format!(" [{status}]"),
            _ if r.required_approval => " [approval required]".to_string(),
            _ => String::new(),
        };
        let result = match (&r.result, &r.error) {
            (_, Some(err)) => format!("error: {err}"),
            (Some(res), None) => res.clone(),
            (None, None) => String::new(),
        };
        out.push_str(&format!(
            "\n{} {} {target}{approval}: {result}",
            r.timestamp, r.operation
        ));
    }
    out
}

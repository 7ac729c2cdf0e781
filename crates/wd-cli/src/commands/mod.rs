pub mod classify;
pub mod config;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use wd_agents::coordinator::ApprovalCoordinator;
use wd_agents::ledger::ApprovalLedger;
use wd_agents::orchestrator::Orchestrator;
use wd_core::config::{Config, CredentialProvider};
use wd_harness::channel::ChannelConnector;
use wd_harness::executor::FsExecutor;
use wd_harness::file_channel::{FileChannel, FileConnector};
use wd_harness::security::PathGuard;
use wd_integrations::slack::{SlackClient, SlackConnector};

/// Pick the approval transport named by `channel.provider`.
pub fn connector(cfg: &Config) -> anyhow::Result<Arc<dyn ChannelConnector>> {
    let channel = &cfg.channel;
    match channel.provider.as_str() {
        "slack" => {
            let token = CredentialProvider::channel_token(channel).with_context(|| {
                format!("Slack token missing: set {} in the environment", channel.token_env)
            })?;
            let mut client = SlackClient::new(&token, &channel.channel_id)
                .context("configuring Slack client")?;
            if let Some(base) = &channel.api_base_url {
                client = client.with_base_url(base.clone());
            }
            Ok(Arc::new(
                SlackConnector::new(client).with_fallback_bot_id(cfg.approval.bot_user_id.clone()),
            ))
        }
        _ => {
            let mut file = FileChannel::new(&channel.inbox_path, &channel.outbox_path);
            if let Some(id) = &cfg.approval.bot_user_id {
                file = file.with_identity(id.clone());
            }
            Ok(Arc::new(FileConnector::new(file)))
        }
    }
}

/// Wire config into a ready orchestrator, creating the workspace if needed.
pub fn build_orchestrator(cfg: &Config) -> anyhow::Result<Orchestrator> {
    let root = Path::new(&cfg.general.workspace_root);
    std::fs::create_dir_all(root)
        .with_context(|| format!("creating workspace {}", root.display()))?;
    let guard = PathGuard::new(root);

    let coordinator = ApprovalCoordinator::from_config(
        connector(cfg)?,
        Arc::new(ApprovalLedger::new()),
        &cfg.approval,
    );

    Orchestrator::builder()
        .approver(Arc::new(coordinator))
        .executor(Arc::new(FsExecutor::new(guard.clone())))
        .workspace(guard)
        .quarantine_dir(cfg.execution.quarantine_dir.clone())
        .build()
        .context("building orchestrator")
}

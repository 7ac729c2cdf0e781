use std::str::FromStr;

use wd_agents::risk;
use wd_core::types::OperationKind;

/// One line describing the risk tier of `kind`, plus its warning if any.
pub fn describe(kind: &str) -> anyhow::Result<String> {
    let kind = OperationKind::from_str(kind)?;
    let level = risk::classify(kind);
    let mut line = format!("{kind}: {level} risk");
    if level.requires_approval() {
        line.push_str(", requires approval");
    }
    if let Some(warning) = risk::warning_for(kind) {
        line.push_str(&format!(" ({warning})"));
    }
    Ok(line)
}

pub fn run(kind: &str) -> anyhow::Result<()> {
    println!("{}", describe(kind)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::describe;

    #[test]
    fn aliases_resolve_to_their_kind() {
        assert_eq!(
            describe("rm").unwrap(),
            "delete: high risk, requires approval (This will permanently delete the file/directory)"
        );
        assert_eq!(describe("cat").unwrap(), "read: low risk");
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!(describe("chmod").is_err());
    }
}

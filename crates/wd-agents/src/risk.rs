use wd_core::types::{Operation, OperationKind, RiskLevel};

/// Risk tier of an operation kind.
///
/// Anything that destroys, relocates or overwrites data needs a human
/// decision; read-only kinds do not.
pub fn classify(kind: OperationKind) -> RiskLevel {
    match kind {
        OperationKind::Delete | OperationKind::Move | OperationKind::Write => RiskLevel::High,
        OperationKind::List | OperationKind::Read => RiskLevel::Low,
    }
}

pub fn is_high_risk(operation: &Operation) -> bool {
    classify(operation.kind).requires_approval()
}

/// Warning shown to the reviewer for each high-risk kind.
pub fn warning_for(kind: OperationKind) -> Option<&'static str> {
    match kind {
        OperationKind::Delete => Some("This will permanently delete the file/directory"),
        OperationKind::Move => Some("This will move the file to a new location"),
        OperationKind::Write => Some("This will overwrite any existing content"),
        OperationKind::List | OperationKind::Read => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destructive_kinds_are_high_risk() {
        for kind in [OperationKind::Delete, OperationKind::Move, OperationKind::Write] {
            assert_eq!(classify(kind), RiskLevel::High, "{kind}");
            assert!(warning_for(kind).is_some());
        }
    }

    #[test]
    fn read_only_kinds_are_low_risk() {
        for kind in [OperationKind::List, OperationKind::Read] {
            assert_eq!(classify(kind), RiskLevel::Low, "{kind}");
            assert!(warning_for(kind).is_none());
        }
        assert!(!is_high_risk(&Operation::list(".")));
    }

    #[test]
    fn every_kind_is_classified() {
        let high = OperationKind::ALL
            .iter()
            .filter(|k| classify(**k).requires_approval())
            .count();
        assert_eq!(high, 3);
    }
}

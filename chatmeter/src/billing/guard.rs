//! Admission control ahead of the model call.

/// Outcome of checking a worst-case cost against the caller's balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Reject {
        reason: String,
        current_balance: i64,
        required_energy: i64,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow)
    }
}

/// Admit a request only if its worst-case cost is covered by the current balance.
///
/// Pure: reads nothing and mutates nothing. The commit re-checks against the live balance.
pub fn authorize(current_balance: i64, worst_case_energy: i64) -> Admission {
    if worst_case_energy > current_balance {
        return Admission::Reject {
            reason: format!("estimated cost {worst_case_energy} exceeds balance {current_balance}"),
            current_balance,
            required_energy: worst_case_energy,
        };
    }
    Admission::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_balance_is_allowed() {
        assert!(authorize(150, 150).is_allowed());
        assert!(authorize(0, 0).is_allowed());
    }

    #[test]
    fn test_worst_case_above_balance_is_rejected() {
        match authorize(100, 150) {
            Admission::Reject {
                current_balance,
                required_energy,
                ..
            } => {
                assert_eq!(current_balance, 100);
                assert_eq!(required_energy, 150);
            }
            Admission::Allow => panic!("expected rejection"),
        }
    }
}

use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Unix timestamp after which the exchange must reject a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Deadline(pub u64);

impl Deadline {
    /// `now + minutes * 60`. Callers pass the clock reading taken at submission.
    pub fn from_now(now_unix: u64, minutes: u32) -> Self {
        Self(now_unix.saturating_add(u64::from(minutes) * 60))
    }

    pub fn is_expired(&self, now_unix: u64) -> bool {
        now_unix > self.0
    }

    pub fn as_u256(&self) -> U256 {
        U256::from(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_from_now() {
        let deadline = Deadline::from_now(1_700_000_000, 20);
        assert_eq!(deadline.0, 1_700_001_200);
        assert!(!deadline.is_expired(1_700_001_200));
        assert!(deadline.is_expired(1_700_001_201));
    }
}

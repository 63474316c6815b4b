use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Local fallback allowance for guest users. The real ledger lives on the
/// backend; this record only exists so an unauthenticated session can be
/// rate-limited without a network round-trip. Resets once per UTC day,
/// matching the server's own reset cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsRecord {
    pub remaining: u32,
    #[serde(rename = "lastReset")]
    pub last_reset: NaiveDate,
}

impl CreditsRecord {
    pub fn new(default_credits: u32) -> Self {
        Self {
            remaining: default_credits,
            last_reset: chrono::Utc::now().date_naive(),
        }
    }

    /// Refill the allowance when the day has rolled over since the last
    /// reset. Returns true when a refill happened.
    pub fn roll_over(&mut self, default_credits: u32) -> bool {
        let today = chrono::Utc::now().date_naive();
        if self.last_reset < today {
            self.remaining = default_credits;
            self.last_reset = today;
            return true;
        }
        false
    }

    /// Decrement by one. Returns false when already exhausted; the count
    /// never goes negative.
    pub fn spend(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::CreditsRecord;

    #[test]
    fn spend_stops_at_zero() {
        let mut record = CreditsRecord::new(2);
        assert!(record.spend());
        assert!(record.spend());
        assert!(!record.spend());
        assert_eq!(record.remaining, 0);
    }

    #[test]
    fn roll_over_refills_on_a_new_day() {
        let mut record = CreditsRecord::new(5);
        record.remaining = 0;
        record.last_reset = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(record.roll_over(5));
        assert_eq!(record.remaining, 5);
        assert_eq!(record.last_reset, chrono::Utc::now().date_naive());
    }

    #[test]
    fn roll_over_is_a_noop_same_day() {
        let mut record = CreditsRecord::new(5);
        record.remaining = 3;
        assert!(!record.roll_over(5));
        assert_eq!(record.remaining, 3);
    }
}

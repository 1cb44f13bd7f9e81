use super::state::SoftDeleteState;
use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// How long a soft-deleted entity is kept before it may be removed for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    period: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_RETENTION_DAYS))
    }
}

impl RetentionPolicy {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Earliest instant after which hard delete is allowed, `None` when it
    /// never is.
    pub fn eligible_after(&self, state: &SoftDeleteState) -> Option<DateTime<Utc>> {
        if !state.is_deleted {
            return None;
        }
        state
            .deleted_at
            .and_then(|at| at.checked_add_signed(self.period))
    }

    /// True once the entity has been soft-deleted for longer than the period.
    pub fn allows_hard_delete(&self, state: &SoftDeleteState, now: DateTime<Utc>) -> bool {
        self.eligible_after(state).is_some_and(|after| now > after)
    }
}

use crate::core::{JsonValue, LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User id that marks an operation as performed by the system itself.
pub const SYSTEM_USER_ID: &str = "SYSTEM";

/// Who did what, from where. Required on every audited operation.
///
/// `user_id`, `user_role`, `session_id`, `ip_address`, `user_agent` and
/// `timestamp` are mandatory; a `None` or blank value fails
/// [`AuditContext::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditContext {
    pub user_id: Option<String>,
    pub user_role: Option<String>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

impl AuditContext {
    pub fn new(
        user_id: impl Into<String>,
        user_role: impl Into<String>,
        session_id: impl Into<String>,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: Some(user_id.into()),
            user_role: Some(user_role.into()),
            session_id: Some(session_id.into()),
            ip_address: Some(ip_address.into()),
            user_agent: Some(user_agent.into()),
            timestamp: Some(timestamp),
            operation: None,
            reason: None,
            metadata: None,
        }
    }

    /// Context for jobs acting without a human user.
    pub fn system(timestamp: DateTime<Utc>) -> Self {
        Self::new(
            SYSTEM_USER_ID,
            "system",
            "system",
            "127.0.0.1",
            "aggregate-ledger",
            timestamp,
        )
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("user_id", &self.user_id),
            ("user_role", &self.user_role),
            ("session_id", &self.session_id),
            ("ip_address", &self.ip_address),
            ("user_agent", &self.user_agent),
        ];
        for (field, value) in required {
            if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                return Err(LedgerError::Validation(format!(
                    "audit context field '{}' is required",
                    field
                )));
            }
        }
        if self.timestamp.is_none() {
            return Err(LedgerError::Validation(
                "audit context field 'timestamp' is required".into(),
            ));
        }
        Ok(())
    }

    pub fn user(&self) -> &str {
        self.user_id.as_deref().unwrap_or_default()
    }

    pub fn is_system(&self) -> bool {
        self.user_id.as_deref() == Some(SYSTEM_USER_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> AuditContext {
        AuditContext::new("u-1", "clerk", "s-1", "10.0.0.1", "test-agent", Utc::now())
    }

    #[test]
    fn complete_context_passes() {
        assert!(context().validate().is_ok());
        assert!(AuditContext::system(Utc::now()).is_system());
    }

    #[test]
    fn blank_or_missing_fields_are_named() {
        let mut ctx = context();
        ctx.ip_address = Some("  ".into());
        assert_eq!(
            ctx.validate().unwrap_err().message(),
            "audit context field 'ip_address' is required"
        );

        let mut ctx = context();
        ctx.timestamp = None;
        assert!(ctx.validate().unwrap_err().message().contains("timestamp"));

        assert!(AuditContext::default().validate().unwrap_err().message().contains("user_id"));
    }
}

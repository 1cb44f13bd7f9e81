// ============================================================================
// Audit Module
// ============================================================================
//
// Append-only audit trail for regulated entities.
//
// - Context: who performed an operation, validated before any write
// - Entry: the stored record and its flat row layout
// - Diff: changed-field computation between two snapshots
// - Ledger: recording and trail / summary / query reads
//
// ============================================================================

pub mod context;
pub mod diff;
pub mod entry;
pub mod ledger;
pub mod query;

pub use context::{AuditContext, SYSTEM_USER_ID};
pub use diff::{IGNORED_FIELDS, changed_fields};
pub use entry::{AuditEntry, AuditOperation};
pub use ledger::{AuditChange, AuditLedger};
pub use query::{AuditQuery, AuditSummary, SuspiciousActivity};

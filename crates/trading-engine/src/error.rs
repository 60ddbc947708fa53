//! Execution-level error taxonomy.

use risk_manager::RejectReason;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the protected-order placement protocol.
///
/// Nothing here is retried automatically: blind retry of a rejected or
/// possibly-placed order risks duplicate market exposure, so recovery
/// decisions belong to the caller.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The risk gate refused the intent.
    #[error("admission rejected: {0}")]
    AdmissionRejected(RejectReason),

    /// The primary order was refused; nothing was placed, nothing to roll back.
    #[error("primary order rejected: {0}")]
    PrimaryRejected(String),

    /// The primary order is live but one or more protective legs could not be
    /// placed. The primary is never auto-cancelled; the group is persisted so
    /// protection can be retried against it.
    #[error("group {group_id}: primary order {primary_order_id} is live but protection is incomplete")]
    ProtectionIncomplete {
        group_id: Uuid,
        primary_order_id: String,
    },

    #[error(transparent)]
    Core(#[from] kite_core::Error),
}

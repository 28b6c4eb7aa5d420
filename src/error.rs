use ethers::types::H256;
use thiserror::Error;

/// Failure modes of a single submission attempt.
///
/// Gas-estimation failure is deliberately absent: the estimator degrades to
/// built-in defaults and lets the bundler have the final word at submission
/// time (see `estimator.rs`).
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The entry point nonce read failed. The attempt is dead but the caller
    /// may simply retry.
    #[error("entry point nonce unavailable: {0}")]
    NonceUnavailable(String),

    /// Token payment was chosen but no token address could be resolved.
    #[error("no token selected for gas payment")]
    NoTokenSelected,

    /// The nested approval sub-operation failed, which aborts the outer
    /// operation before anything was submitted for it.
    #[error("token approval failed: {0}")]
    ApprovalFailed(String),

    /// The user cancelled at the confirmation gate. Not a system error.
    #[error("user cancelled the operation")]
    UserCancelled,

    /// The confirmation gate went away (UI teardown) before a decision.
    #[error("confirmation abandoned before a decision was made")]
    ConfirmationAbandoned,

    /// A newer confirmation request displaced this one.
    #[error("confirmation superseded by a newer request")]
    ConfirmationSuperseded,

    /// Invariant violation: the packed bytes changed after signing. Must be
    /// caught before the operation reaches the network.
    #[error("stale signature: packed operation changed after signing")]
    SignatureStale,

    /// The bundler declined `eth_sendUserOperation`. The message is surfaced
    /// verbatim.
    #[error("bundler rejected the operation: {0}")]
    SubmissionRejected(String),

    /// The receipt wait exceeded the caller's timeout. The operation may still
    /// land on-chain later; this is "unknown, check explorer", not failure.
    #[error("timed out waiting for receipt of user operation {0:?}")]
    ReceiptTimeout(H256),

    /// RPC / signing plumbing failure.
    #[error(transparent)]
    Rpc(#[from] anyhow::Error),
}

impl ExecuteError {
    /// Cancellation is user-initiated and must not be logged as a system error.
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, ExecuteError::UserCancelled)
    }
}

/// Executor-level transaction result.
pub type TxResult<T, E = TxError> = Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum TxError {
    /// The transaction makes no sense for the current account state and
    /// must not be recorded on chain.
    #[error("transaction skipped")]
    Skipped,
    /// An inbound external message was not accepted by the contract.
    #[error("external message not accepted, exit code {exit_code}")]
    NotAccepted { exit_code: i32, vm_log: String },
    /// Ledger rules were violated or an internal invariant does not hold.
    #[error("fatal error")]
    Fatal(#[from] anyhow::Error),
}

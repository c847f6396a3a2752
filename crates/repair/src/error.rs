use thiserror::Error;

/// Errors a sync task can end in. Captured into the task's completion,
/// never propagated out of the chain.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RepairError {
    /// The trees for the two endpoints could not be compared.
    #[error("failed to compute tree difference: {0}")]
    Diff(String),

    /// A range transfer could not be handed to the dispatcher, or the
    /// dispatcher was cancelled before acknowledging it.
    #[error("failed to dispatch range transfer: {0}")]
    Dispatch(String),
}

use crate::transcript::Speaker;

/// Failures that end or degrade a session.
///
/// Only [`SessionError::Setup`] is ever reported to the client as an error;
/// the other variants are logged and recovered from. A client that goes away
/// is not an error: the dialogue ends with
/// [`TerminationReason::TransportClosed`](crate::orchestrator::TerminationReason::TransportClosed).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to connect the {role} role: {source}")]
    Setup {
        role: Speaker,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to start the analysis worker: {0}")]
    WorkerStart(#[from] std::io::Error),
    #[error("Collaborator step '{step}' failed: {source}")]
    Collaborator {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

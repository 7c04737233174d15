//! One interview session from connection to teardown.
//!
//! Both roles are acquired before the dialogue starts and released on every
//! exit path, including when the second connection fails after the first one
//! succeeded. The analysis worker is stopped before the roles are released.

use crate::collaborators::{Advisor, Analysts, Highlighter, RoleConnector, SpeechRole};
use crate::error::SessionError;
use crate::events::{EventSender, SessionEvent};
use crate::orchestrator::{
    DialogueOrchestrator, DialogueState, OrchestratorConfig, TerminationReason,
};
use crate::snapshot;
use crate::state::AnalysisState;
use crate::transcript::Speaker;
use crate::worker::{AnalysisWorker, WorkerConfig};
use std::sync::Arc;
use tracing::{Instrument, error, info, warn};

pub const MSG_INITIALIZING: &str = "Initializing agents...";
pub const MSG_CONNECTED: &str = "Agents connected. Starting conversation.";
pub const MSG_COMPLETE: &str = "Interview complete.";

/// Everything a session needs besides its state and event sink.
#[derive(Clone)]
pub struct SessionDeps {
    pub connector: Arc<dyn RoleConnector>,
    pub analysts: Analysts,
    pub advisor: Arc<dyn Advisor>,
    pub highlighter: Option<Arc<dyn Highlighter>>,
    pub worker: WorkerConfig,
    pub orchestrator: OrchestratorConfig,
}

/// Runs a full session, streaming its events to `events`.
///
/// Returns the reason the dialogue ended, or [`SessionError::Setup`] if a role
/// could not be connected. In the latter case an error event has already been
/// sent and any role that did connect has been closed.
pub async fn run_session(
    deps: SessionDeps,
    state: Arc<AnalysisState>,
    events: EventSender,
) -> Result<TerminationReason, SessionError> {
    let span = tracing::info_span!("session");
    async move {
        let _ = events.send(SessionEvent::system(MSG_INITIALIZING)).await;

        let (publisher, subscriber) = snapshot::channel();
        let mut orchestrator = DialogueOrchestrator::new(
            state.clone(),
            subscriber,
            deps.advisor.clone(),
            deps.highlighter.clone(),
            events.clone(),
            deps.orchestrator.clone(),
        );
        orchestrator.enter(DialogueState::Connecting);

        let (interviewer, subject) = match connect_roles(deps.connector.as_ref()).await {
            Ok(roles) => roles,
            Err(e) => {
                error!(error = %e, "Session setup failed");
                let _ = events
                    .send(SessionEvent::system(format!("Error: {e}")))
                    .await;
                orchestrator.enter(DialogueState::Terminated);
                return Err(e);
            }
        };
        let _ = events.send(SessionEvent::system(MSG_CONNECTED)).await;

        let worker = AnalysisWorker::new(state.clone(), deps.analysts, publisher, deps.worker);
        let outcome = match worker.spawn() {
            Ok(handle) => {
                let reason = orchestrator
                    .run(interviewer.as_ref(), subject.as_ref())
                    .await;
                handle.stop().await;
                Ok(reason)
            }
            Err(e) => Err(e),
        };

        release(interviewer).await;
        release(subject).await;

        match outcome {
            Ok(reason) => {
                if reason != TerminationReason::TransportClosed {
                    let _ = events.send(SessionEvent::system(MSG_COMPLETE)).await;
                }
                info!(?reason, "Session finished");
                Ok(reason)
            }
            Err(e) => {
                error!(error = %e, "Session aborted");
                let _ = events
                    .send(SessionEvent::system(format!("Error: {e}")))
                    .await;
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn connect_roles(
    connector: &dyn RoleConnector,
) -> Result<(Box<dyn SpeechRole>, Box<dyn SpeechRole>), SessionError> {
    info!("Connecting interviewer");
    let interviewer = connector
        .connect(Speaker::Interviewer)
        .await
        .map_err(|source| SessionError::Setup {
            role: Speaker::Interviewer,
            source,
        })?;

    info!("Connecting subject");
    match connector.connect(Speaker::Subject).await {
        Ok(subject) => Ok((interviewer, subject)),
        Err(source) => {
            release(interviewer).await;
            Err(SessionError::Setup {
                role: Speaker::Subject,
                source,
            })
        }
    }
}

async fn release(role: Box<dyn SpeechRole>) {
    let speaker = role.speaker();
    if let Err(e) = role.close().await {
        warn!(%speaker, error = ?e, "Failed to close role connection");
    }
}

//! Core of the clinical intake interview simulator.
//!
//! An interviewer role and a subject role talk to each other turn by turn
//! under the [`orchestrator::DialogueOrchestrator`], while an
//! [`worker::AnalysisWorker`] on its own thread keeps a pool of candidate
//! diagnoses and a ranked queue of follow-up questions up to date. The two
//! share an [`state::AnalysisState`] and meet through a published
//! [`snapshot::AnalysisSnapshot`].
//!
//! Everything that needs language understanding is behind the traits in
//! [`collaborators`]; [`analysts`] and [`chat_role`] implement them on top of
//! an OpenAI-compatible [`llm_client`].

pub mod analysts;
pub mod chat_role;
pub mod collaborators;
pub mod diagnosis;
pub mod error;
pub mod events;
pub mod llm_client;
pub mod orchestrator;
pub mod question;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod transcript;
pub mod worker;

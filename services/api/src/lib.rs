//! Intake API Library Crate
//!
//! The HTTP and WebSocket service around `intake-core`: configuration,
//! prompt loading, the session registry, REST handlers, routing and the
//! WebSocket session driver with its Gemini Live voice roles. The `api`
//! binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod prompts;
pub mod registry;
pub mod router;
pub mod state;
pub mod ws;

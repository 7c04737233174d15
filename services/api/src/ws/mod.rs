//! WebSocket Session Management
//!
//! This module runs simulated interviews over WebSockets. It is structured
//! into submodules:
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `session`: Manages the WebSocket connection lifecycle, from `start` to termination.
//! - `provider`: Realtime voice roles backed by third-party APIs (Gemini Live).

pub mod protocol;
pub mod provider;
pub mod session;

pub use session::ws_handler;

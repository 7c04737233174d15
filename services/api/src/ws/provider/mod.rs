//! Realtime voice providers that implement the role-speech contract.

pub mod gemini;

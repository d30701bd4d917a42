//! Application layer: the conversation engine and its per-requester state.
//!
//! `IntakeEngine` turns one inbound message into store calls and replies.
//! Transports (the CLI chat console, a real chat bot) only parse input and
//! render the replies.

pub mod engine;
pub mod seed;
pub mod session;
pub mod turn;

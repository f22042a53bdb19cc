//! Callback Later - missed-call auto-responder daemon
//!
//! Watches call state, call-log changes, and chat-app notifications, detects
//! missed calls, and sends an automatic SMS or deep-linked chat reply to the
//! caller, gated by a dedup window over a persisted journal of sent replies.

pub mod call_log;
pub mod call_state;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod journal;
pub mod lock;
pub mod notifications;
pub mod signals;
pub mod spam;

pub use error::{Error, Result};

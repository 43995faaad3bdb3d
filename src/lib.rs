//! Telegram group bot that reposts a message or album on a timer.
//!
//! - [`album`] buffers album fragments and resolves complete albums.
//! - [`repeat`] runs the cancellable per-chat repeat jobs.
//! - [`groups`] tracks known groups for owner broadcasts.
//! - [`handlers`] wires Telegram updates to the above.

pub mod album;
pub mod config;
pub mod groups;
pub mod handlers;
pub mod messenger;
pub mod model;
pub mod repeat;

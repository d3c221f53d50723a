//! Real-time sync core of a support inbox: the conversation directory, per-conversation
//! timelines and the push channel that keeps them live.

pub mod api;
pub mod app;
pub mod error;
pub mod sync;
pub mod utils;

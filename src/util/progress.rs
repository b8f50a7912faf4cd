//! Progress reporting contract (§9 "Callback-heavy progress + message
//! fan-out"). The engine's public operations accept a plain
//! `fn(String) -> ()`-shaped callback, exactly as the specification states,
//! so that the external task queue can forward progress without the engine
//! depending on any particular UI rendering. `ProgressEvent` is a small
//! structured helper call sites can format into that string — it is not
//! part of the external contract, just a convenience for the engine's own
//! producers.

use std::fmt;
use std::sync::Arc;

pub type ProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started { label: String },
    Item(String),
    Counted { done: u64, total: u64 },
    Finished,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Started { label } => write!(f, "started: {label}"),
            ProgressEvent::Item(name) => write!(f, "{name}"),
            ProgressEvent::Counted { done, total } => write!(f, "{done}/{total}"),
            ProgressEvent::Finished => write!(f, "finished"),
        }
    }
}

/// A callback that discards every event; the default when the caller
/// supplies none.
pub fn noop_progress() -> ProgressCallback {
    Arc::new(|_msg: String| {})
}

pub fn emit(cb: &ProgressCallback, event: ProgressEvent) {
    cb(event.to_string());
}

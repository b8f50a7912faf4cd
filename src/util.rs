//! Various utility functions shared across the engine.
//!

pub mod concurrency;
pub mod fs;
pub mod hasher;
pub mod logging;
pub mod paginate;
pub mod progress;
pub mod retry;

pub use paginate::{paginate, paginate_with_total};
pub use progress::{noop_progress, ProgressCallback, ProgressEvent};

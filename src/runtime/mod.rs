//! Tokio runtime integration.

mod timer;

pub use timer::{TimerFired, TokioTimer, TokioTimerFactory};

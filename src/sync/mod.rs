//! Keeping control and display instances converged

pub mod engine;
pub mod runtime;

pub use engine::{Signal, SyncState};
pub use runtime::{Reconciler, Surface};

//! Test fixtures for eraser integration tests.
//!
//! - `eraser_context`: temp log directory, in-memory engine, simulated clock
//!   and a file-backed cycle record
//! - `gated_hooks`: lifecycle hooks that can hold or crash the eraser

pub mod eraser_context;
pub mod gated_hooks;

pub use eraser_context::{EraserTestContext, RunningEraser, START_MS};
pub use gated_hooks::GatedHooks;

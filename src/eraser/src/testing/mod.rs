//! In-memory engine collaborators and a simulated clock.
//!
//! Only available with the `testing` feature or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! eraser = { path = "../src/eraser", features = ["testing"] }
//! ```

mod clock;
mod engine;
mod hooks;

pub use clock::SimulatedClock;
pub use engine::MemoryEngine;
pub use hooks::RecordingHooks;

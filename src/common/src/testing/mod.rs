//! Test utilities for EraserDB.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::TestConfigBuilder;
//!
//! let config = TestConfigBuilder::new()
//!     .with_log_dir(dir.path())
//!     .with_test_period(Duration::from_secs(2))
//!     .build();
//! ```

mod config_builder;

pub use config_builder::TestConfigBuilder;

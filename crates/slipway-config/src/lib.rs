#![forbid(unsafe_code)]
//! Parse and validate platform descriptors and `slipway.toml` projects.

pub mod platform;
pub mod project;

pub use platform::{PackageManager, Platform};
pub use project::Project;

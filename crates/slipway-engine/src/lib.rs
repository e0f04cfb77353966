#![forbid(unsafe_code)]

//! Build orchestration: stage a workdir, drive an execution engine through
//! the build, and bring the artifacts home.

pub mod deps;
pub mod driver;
pub mod error;
pub mod init;
pub mod retry;
pub mod workdir;

pub use driver::{ArtifactRecord, BuildDriver, BuildReport, DriverOptions};
pub use error::EngineError;
pub use init::init_project;
pub use retry::RetryContext;

//! High-level operations.
//!
//! This module contains the implementation of berth commands.

pub mod export;
pub mod gems;
pub mod pack;
pub mod pipeline;
pub mod verify;

pub use export::{DependencyExporter, ExportReport};
pub use pack::{pack, PackResult};
pub use pipeline::{install, InstallRequest, PipelineOptions, PipelineReport};
pub use verify::{format_result, VerificationSuite, VerifyOptions, VerifyResult};

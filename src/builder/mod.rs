//! Planning and running native builds.
//!
//! The [`ConfigurationPlanner`] turns a recipe into a [`BuildPlan`]; the
//! [`BuildExecutor`] runs it. [`PortableInstaller`] carries the platform
//! behaviour every recipe shares.

pub mod env;
pub mod executor;
pub mod installer;
pub mod plan;
pub mod planner;

pub use env::{EnvOverlay, Environment};
pub use executor::{BuildArtifact, BuildExecutor};
pub use installer::PortableInstaller;
pub use plan::{BuildPlan, BuildStep, Phase};
pub use planner::ConfigurationPlanner;

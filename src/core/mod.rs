//! Core data structures: dependencies, platforms, features and the
//! package interface.

pub mod dependency;
pub mod errors;
pub mod features;
pub mod manifest;
pub mod package;
pub mod platform;

pub use dependency::{Dependency, DependencySet, Requirement};
pub use errors::PortableError;
pub use features::FeatureFlags;
pub use manifest::BuildManifest;
pub use package::{PackageKind, PortablePackage};
pub use platform::{HostFacts, PlatformProfile};

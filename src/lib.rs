//! berth - portable, relocatable builds of Ruby, OpenSSL and zlib
//!
//! This crate provides the library side of berth: platform resolution,
//! build planning and execution, relocation patching, dependency export
//! and verification of the installed tree.

pub mod builder;
pub mod core;
pub mod ops;
pub mod packages;
pub mod relocate;
pub mod util;

pub use core::{
    dependency::Dependency, errors::PortableError, features::FeatureFlags, package::PackageKind,
    platform::PlatformProfile,
};
pub use relocate::RelocationPatcher;

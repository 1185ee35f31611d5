//! User-selectable build features.

use serde::{Deserialize, Serialize};

/// Boolean switches chosen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Build the runtime's JIT. Needs a Rust toolchain and a glibc newer than
    /// the conservative baseline.
    pub jit: bool,

    /// Keep the crypto library's legacy algorithm provider.
    pub legacy_crypto: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        FeatureFlags {
            jit: true,
            legacy_crypto: false,
        }
    }
}

impl FeatureFlags {
    pub fn without_jit(mut self) -> Self {
        self.jit = false;
        self
    }

    pub fn with_legacy_crypto(mut self, enabled: bool) -> Self {
        self.legacy_crypto = enabled;
        self
    }
}

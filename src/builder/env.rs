//! Environment snapshots and overlays.
//!
//! Builds never touch the process environment. The caller's environment is
//! captured once into an [`Environment`], planning records an ordered
//! [`EnvOverlay`] of edits, and the executor hands each sub-process the
//! overlay applied to the snapshot.

use std::collections::BTreeMap;

use serde::Serialize;

/// An immutable set of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Snapshot the current process environment.
    pub fn capture() -> Self {
        Environment {
            vars: std::env::vars().collect(),
        }
    }

    /// Build an environment from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Environment {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Value of `key` if set to something other than an empty string.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// One environment edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EnvOp {
    Set { key: String, value: String },
    /// Append with a space separator, keeping whatever the caller had.
    Append { key: String, value: String },
    Remove { key: String },
    /// Move a value to a new name. If `from` is unset, `to` is removed.
    Rename { from: String, to: String },
}

/// An ordered list of environment edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvOverlay {
    ops: Vec<EnvOp>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        EnvOverlay::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(EnvOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(EnvOp::Append {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(EnvOp::Remove { key: key.into() });
        self
    }

    pub fn rename(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.ops.push(EnvOp::Rename {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Append every edit of `other` after ours.
    pub fn extend(&mut self, other: EnvOverlay) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn ops(&self) -> &[EnvOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply the edits, in order, to a snapshot.
    pub fn apply(&self, base: &Environment) -> Environment {
        let mut vars = base.vars.clone();
        for op in &self.ops {
            match op {
                EnvOp::Set { key, value } => {
                    vars.insert(key.clone(), value.clone());
                }
                EnvOp::Append { key, value } => {
                    let merged = match vars.get(key) {
                        Some(existing) if !existing.is_empty() => format!("{} {}", existing, value),
                        _ => value.clone(),
                    };
                    vars.insert(key.clone(), merged);
                }
                EnvOp::Remove { key } => {
                    vars.remove(key);
                }
                EnvOp::Rename { from, to } => match vars.remove(from) {
                    Some(value) => {
                        vars.insert(to.clone(), value);
                    }
                    None => {
                        vars.remove(to);
                    }
                },
            }
        }
        Environment { vars }
    }
}

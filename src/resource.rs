// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::HashMap;
use std::path::{Path, PathBuf};

/// Key-value configuration store
///
/// Consulted for directory defaults (`activeDir`, `backupDir`, `DataDir`,
/// `indexDir`, …) and per-partition switches (`<partition>.useBackupDir`,
/// `<partition>.fillRIDs`, `<partition>.longTests`, …). Unknown keys are
/// ignored; lookups are case-insensitive.
#[derive(Clone, Debug, Default)]
pub struct ResourceStore {
    entries: HashMap<String, String>,
}

impl ResourceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `key = value` lines from a file; `#` starts a comment.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let mut store = Self::new();

        for line in std::fs::read_to_string(path)?.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                store.set(key.trim(), value.trim());
            } else {
                log::debug!("ignoring malformed resource line {line:?}");
            }
        }

        Ok(store)
    }

    /// Sets an entry.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_ascii_lowercase(), value.into());
    }

    /// Looks up an entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Looks up `<scope>.<key>`, falling back to the bare key.
    #[must_use]
    pub fn get_scoped(&self, scope: &str, key: &str) -> Option<&str> {
        self.get(&format!("{scope}.{key}"))
            .or_else(|| self.get(key))
    }

    /// Boolean lookup; `1`, `true`, `yes` and `on` count as true.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
    }

    /// Scoped boolean lookup.
    #[must_use]
    pub fn get_bool_scoped(&self, scope: &str, key: &str) -> bool {
        self.get_scoped(scope, key)
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
    }

    /// Directory lookup, trying the given keys in order.
    #[must_use]
    pub fn get_dir(&self, keys: &[&str]) -> Option<PathBuf> {
        keys.iter()
            .find_map(|k| self.get(k))
            .map(PathBuf::from)
    }
}

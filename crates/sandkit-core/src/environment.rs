//! Environment filtering between the host and the sandbox.
//!
//! Only allow-listed variables cross into a sandbox. The subprocess backend inherits
//! nothing from the host process otherwise, so it re-injects a few boot variables
//! (PATH, HOME, USER, temp dirs, locale) when they are allow-listed but were not
//! supplied. Containers already get a base environment from their image, so the
//! Docker backend uses a much smaller default list and no re-injection.

use crate::executors::RunnerKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const PROCESS_DEFAULT_ALLOWED_ENV: [&str; 8] =
    ["PATH", "HOME", "USER", "TMPDIR", "TEMP", "TMP", "LANG", "LC_ALL"];

pub const DOCKER_DEFAULT_ALLOWED_ENV: [&str; 2] = ["LANG", "LC_ALL"];

/// Re-injected from the host process, falling back to an empty value.
const BOOT_VARIABLES: [&str; 3] = ["PATH", "HOME", "USER"];

/// Re-injected from the host process only when the host has them.
const OPTIONAL_BOOT_VARIABLES: [&str; 5] = ["TMPDIR", "TEMP", "TMP", "LANG", "LC_ALL"];

/// Names of environment variables allowed into a sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(BTreeSet<String>);

impl AllowList {
    pub fn process_default() -> Self {
        PROCESS_DEFAULT_ALLOWED_ENV.into_iter().collect()
    }

    pub fn docker_default() -> Self {
        DOCKER_DEFAULT_ALLOWED_ENV.into_iter().collect()
    }

    pub fn default_for(kind: RunnerKind) -> Self {
        match kind {
            RunnerKind::Subprocess => Self::process_default(),
            RunnerKind::Docker => Self::docker_default(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.0.insert(name.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for AllowList {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        AllowList(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentFilter {
    allowed: AllowList,
    reinject_boot_defaults: bool,
}

impl EnvironmentFilter {
    pub fn new(allowed: AllowList, reinject_boot_defaults: bool) -> Self {
        Self {
            allowed,
            reinject_boot_defaults,
        }
    }

    /// Filter used by `kind`, with `allowed` overriding the backend default list
    pub fn for_runner(kind: RunnerKind, allowed: Option<AllowList>) -> Self {
        let allowed = allowed.unwrap_or_else(|| AllowList::default_for(kind));
        Self::new(allowed, kind == RunnerKind::Subprocess)
    }

    pub fn allowed(&self) -> &AllowList {
        &self.allowed
    }

    /// Filter `raw`, re-injecting boot variables from this process's environment
    pub fn apply(&self, raw: &HashMap<String, String>) -> BTreeMap<String, String> {
        self.apply_with(raw, |name| std::env::var(name).ok())
    }

    /// Filter `raw`, looking boot variables up through `host`
    pub fn apply_with<F>(&self, raw: &HashMap<String, String>, host: F) -> BTreeMap<String, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut filtered: BTreeMap<String, String> = raw
            .iter()
            .filter(|(name, _)| self.allowed.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        if !self.reinject_boot_defaults {
            return filtered;
        }

        for name in BOOT_VARIABLES {
            if self.allowed.contains(name) && !filtered.contains_key(name) {
                filtered.insert(name.to_string(), host(name).unwrap_or_default());
            }
        }
        for name in OPTIONAL_BOOT_VARIABLES {
            if self.allowed.contains(name) && !filtered.contains_key(name) {
                if let Some(value) = host(name).filter(|v| !v.is_empty()) {
                    filtered.insert(name.to_string(), value);
                }
            }
        }

        filtered
    }
}

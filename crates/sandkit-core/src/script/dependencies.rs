//! Declared guest dependencies and their rendering as requirement specifiers.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Version requirement for a single package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    /// A bare constraint appended to the name, e.g. `>=1.20`. `*` means any version.
    Constraint(String),
    Detailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        extras: Vec<String>,
    },
}

impl DependencySpec {
    pub fn any() -> Self {
        DependencySpec::Constraint("*".to_string())
    }

    pub fn pinned(version: impl Into<String>) -> Self {
        DependencySpec::Detailed {
            version: Some(version.into()),
            extras: Vec::new(),
        }
    }

    pub fn with_extras<I, S>(version: Option<&str>, extras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DependencySpec::Detailed {
            version: version.map(str::to_string),
            extras: extras.into_iter().map(Into::into).collect(),
        }
    }

    /// Render `name` together with this spec, e.g. `requests[socks]==2.31.0`
    pub fn specifier(&self, name: &str) -> String {
        match self {
            DependencySpec::Constraint(constraint) => {
                let constraint = constraint.trim();
                if constraint.is_empty() || constraint == "*" {
                    name.to_string()
                } else {
                    format!("{}{}", name, constraint)
                }
            }
            DependencySpec::Detailed { version, extras } => {
                let mut specifier = name.to_string();
                if !extras.is_empty() {
                    specifier.push('[');
                    specifier.push_str(&extras.join(","));
                    specifier.push(']');
                }
                if let Some(version) = version.as_deref().filter(|v| !v.is_empty()) {
                    specifier.push_str("==");
                    specifier.push_str(version);
                }
                specifier
            }
        }
    }
}

impl From<&str> for DependencySpec {
    fn from(constraint: &str) -> Self {
        DependencySpec::Constraint(constraint.to_string())
    }
}

impl From<String> for DependencySpec {
    fn from(constraint: String) -> Self {
        DependencySpec::Constraint(constraint)
    }
}

/// Ordered collection of package name -> spec.
///
/// Insertion order is rendering order. Inserting an existing name replaces its spec
/// without moving it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    entries: Vec<(String, DependencySpec)>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: impl Into<DependencySpec>) {
        let name = name.into();
        let spec = spec.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = spec,
            None => self.entries.push((name, spec)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, spec: impl Into<DependencySpec>) -> Self {
        self.insert(name, spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&DependencySpec> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, spec)| spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DependencySpec)> {
        self.entries.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn specifiers(&self) -> Vec<String> {
        self.iter().map(|(name, spec)| spec.specifier(name)).collect()
    }
}

impl<K, V> FromIterator<(K, V)> for Dependencies
where
    K: Into<String>,
    V: Into<DependencySpec>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut deps = Dependencies::new();
        for (name, spec) in iter {
            deps.insert(name, spec);
        }
        deps
    }
}

impl Serialize for Dependencies {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, spec) in &self.entries {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

struct DependenciesVisitor;

impl<'de> Visitor<'de> for DependenciesVisitor {
    type Value = Dependencies;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of package names to version specs")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut deps = Dependencies::new();
        while let Some((name, spec)) = access.next_entry::<String, DependencySpec>()? {
            deps.insert(name, spec);
        }
        Ok(deps)
    }
}

impl<'de> Deserialize<'de> for Dependencies {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DependenciesVisitor)
    }
}

//! Standard identity: name plus optional version

use serde::{Deserialize, Serialize};

/// Identifies one catalog of requirements (ASVS, CWE, NIST 800-53...).
///
/// A standard has no row of its own anywhere; it exists exactly as long as
/// the store holds at least one section carrying its key. Versions are
/// opaque strings compared lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StandardKey {
    pub name: String,
    pub version: Option<String>,
}

impl StandardKey {
    /// Create an unversioned standard key
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    /// Attach a version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Parse from the `name@version` display form. A bare name parses to an
    /// unversioned key; this never fails.
    pub fn parse(s: &str) -> Self {
        match s.split_once('@') {
            Some((name, version)) if !version.is_empty() => {
                Self::new(name).with_version(version)
            }
            Some((name, _)) => Self::new(name),
            None => Self::new(s),
        }
    }
}

impl std::fmt::Display for StandardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

impl std::str::FromStr for StandardKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for StandardKey {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

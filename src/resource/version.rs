use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Semantic version of a catalog or blueprint document.
///
/// Accepts `1`, `1.2`, `1.2.3` and an optional leading `v`. Pre-release and
/// build suffixes (`-beta.1`, `+abc`) are ignored for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SchemaVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed
            .split(['-', '+'])
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| s.to_string())?;

        let mut parts = [0u64; 3];
        let mut count = 0;
        for piece in core.split('.') {
            if count == 3 {
                return Err(s.to_string());
            }
            parts[count] = piece.parse().map_err(|_| s.to_string())?;
            count += 1;
        }

        Ok(SchemaVersion::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|bad| serde::de::Error::custom(format!("invalid version {bad:?}")))
    }
}

/// Inclusive range of blueprint schema versions the runtime can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: SchemaVersion,
    pub max: SchemaVersion,
}

impl VersionRange {
    pub fn new(min: SchemaVersion, max: SchemaVersion) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, version: &SchemaVersion) -> bool {
        *version >= self.min && *version <= self.max
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self {
            min: SchemaVersion::new(1, 0, 0),
            max: SchemaVersion::new(1, 99, 99),
        }
    }
}

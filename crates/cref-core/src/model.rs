use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::facets;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub enum SourceType {
    #[serde(rename = "cmip6")]
    Cmip6,
    #[serde(rename = "obs4mips")]
    Obs4Mips,
    #[serde(rename = "pmp-climatology")]
    PmpClimatology,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Cmip6 => write!(f, "cmip6"),
            SourceType::Obs4Mips => write!(f, "obs4mips"),
            SourceType::PmpClimatology => write!(f, "pmp-climatology"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSourceTypeError(pub String);

impl fmt::Display for ParseSourceTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid source type: '{}'. Valid values are: cmip6, obs4mips, pmp-climatology",
            self.0
        )
    }
}

impl std::error::Error for ParseSourceTypeError {}

impl FromStr for SourceType {
    type Err = ParseSourceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cmip6" => Ok(SourceType::Cmip6),
            "obs4mips" => Ok(SourceType::Obs4Mips),
            "pmp-climatology" => Ok(SourceType::PmpClimatology),
            _ => Err(ParseSourceTypeError(s.to_string())),
        }
    }
}

/// Extracted facet metadata of a dataset. BTreeMap so iteration order is
/// deterministic everywhere facets feed into keys or identities.
pub type Facets = BTreeMap<String, String>;

static SLUG_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[a-z0-9][a-z0-9-]*$").unwrap()
});

pub fn is_valid_slug(slug: &str) -> bool {
    SLUG_RE.is_match(slug)
}

/// One ingested dataset row. Never mutated after ingestion; re-ingesting the
/// same logical dataset replaces it under the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    pub source_type: SourceType,
    pub path: PathBuf,
    pub facets: Facets,
}

impl Dataset {
    /// Stable identity of the logical dataset: the required facet values for
    /// its source type, joined in their canonical order. Ingestion upserts
    /// on `(source_type, identity)`, not on path.
    pub fn identity(&self) -> String {
        facets::required(self.source_type)
            .iter()
            .map(|facet| self.facets.get(*facet).map(String::as_str).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(".")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetFilter {
    pub facet: String,
    /// Accepted values; `*` and `?` wildcards are honored.
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequirement {
    pub source_type: SourceType,
    #[serde(default)]
    pub filters: Vec<FacetFilter>,
    pub group_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub slug: String,
    pub name: String,
    /// Executable path, relative to the provider root.
    pub command: PathBuf,
    pub requirements: Vec<DataRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub slug: String,
    pub version: String,
    /// Installation directory the command paths resolve against.
    pub root: PathBuf,
    /// Optional runtime environment prefix (its `bin/` is prepended to PATH).
    pub env_prefix: Option<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Deterministic identifier of one concrete dataset combination satisfying a
/// diagnostic. Derived from sorted facet values only, so the same combination
/// always produces the same key regardless of catalog traversal order.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct ExecutionKey(pub String);

impl ExecutionKey {
    pub fn from_facets(key_facets: &Facets) -> Self {
        let joined = key_facets
            .values()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("_");
        ExecutionKey(joined)
    }

    /// sha256 over `facet=value` lines; stored alongside the readable key as
    /// a stability cross-check.
    pub fn digest(key_facets: &Facets) -> String {
        let mut hasher = Sha256::new();
        for (facet, value) in key_facets {
            hasher.update(facet.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ExecutionKey {
    fn from(s: String) -> Self {
        ExecutionKey(s)
    }
}

impl FromStr for ExecutionKey {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ExecutionKey(s.to_string()))
    }
}

/// One satisfying dataset combination for a diagnostic: the facet values the
/// combination is keyed on plus the selected datasets, sorted by identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSelection {
    pub key_facets: Facets,
    pub datasets: Vec<Dataset>,
}

impl DatasetSelection {
    pub fn key(&self) -> ExecutionKey {
        ExecutionKey::from_facets(&self.key_facets)
    }
}

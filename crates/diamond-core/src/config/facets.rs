//! Facet configuration: which facets a diamond carries and at which versions.
//!
//! The file is either a bare map of facet name to facet entry, or a wrapper
//! object with a `facets` map and protocol-level fields:
//!
//! ```json
//! {
//!   "protocolVersion": 1,
//!   "protocolInitFacet": "ProtocolFacet",
//!   "facets": {
//!     "OwnershipFacet": { "priority": 10, "versions": { "1": {} } },
//!     "ProtocolFacet": { "priority": 20, "versions": { "1": { "deployInit": "initialize()" } } }
//!   }
//! }
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{DeployError, Result};
use crate::types::normalize_selector;

/// Non-negative facet version number.
///
/// Versions may be fractional (`1.5`), so this wraps an `f64` with a total order.
#[derive(Debug, Clone, Copy)]
pub struct FacetVersion(f64);

impl FacetVersion {
    pub const ZERO: FacetVersion = FacetVersion(0.0);

    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value >= 0.0).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    fn is_integral(self) -> bool {
        self.0.fract() == 0.0 && self.0 <= u64::MAX as f64
    }
}

impl PartialEq for FacetVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FacetVersion {}

impl PartialOrd for FacetVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FacetVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for FacetVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for FacetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_integral() {
            write!(f, "{}", self.0 as u64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for FacetVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| format!("'{s}' is not a number"))?;
        Self::new(value).ok_or_else(|| format!("'{s}' is not a non-negative version"))
    }
}

impl Serialize for FacetVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.is_integral() {
            serializer.serialize_u64(self.0 as u64)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for FacetVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Self::new(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid facet version {value}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}

/// Per-version settings of a facet.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VersionSpec {
    /// Signature called once after the facet is first cut in, e.g. `initialize()`.
    #[serde(default)]
    pub deploy_init: Option<String>,
    /// Signature called once after the facet is upgraded to this version.
    #[serde(default)]
    pub upgrade_init: Option<String>,
    /// Recorded versions this version may upgrade from. Empty allows any.
    #[serde(default)]
    pub from_versions: Vec<FacetVersion>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub callback: Vec<String>,
    #[serde(default)]
    pub deploy_include: Vec<String>,
    #[serde(default)]
    pub deploy_exclude: Vec<String>,
}

impl VersionSpec {
    /// Init signature for this version: `upgradeInit` on upgrades when set,
    /// otherwise `deployInit`.
    pub fn init_signature(&self, is_upgrade: bool) -> Option<&str> {
        if is_upgrade {
            if let Some(sig) = self.upgrade_init.as_deref() {
                return Some(sig);
            }
        }
        self.deploy_init.as_deref()
    }

    /// Whether a facet currently at `from` may move to this version.
    pub fn allows_upgrade_from(&self, from: FacetVersion) -> bool {
        self.from_versions.is_empty() || self.from_versions.contains(&from)
    }

    /// Apply include/exclude filters to introspected selectors.
    pub fn filter_selectors(&self, selectors: &[String]) -> Vec<String> {
        let include: Vec<String> = self
            .deploy_include
            .iter()
            .filter_map(|s| normalize_selector(s))
            .collect();
        let exclude: Vec<String> = self
            .deploy_exclude
            .iter()
            .filter_map(|s| normalize_selector(s))
            .collect();
        selectors
            .iter()
            .filter(|s| include.is_empty() || include.contains(s))
            .filter(|s| !exclude.contains(s))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FacetEntry {
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    libraries: Vec<String>,
    versions: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FacetConfig {
    pub name: String,
    /// Ascending deploy order; ties keep declaration order.
    pub priority: i64,
    pub libraries: Vec<String>,
    pub versions: BTreeMap<FacetVersion, VersionSpec>,
}

impl FacetConfig {
    /// Highest declared version.
    pub fn target_version(&self) -> FacetVersion {
        self.versions
            .keys()
            .next_back()
            .copied()
            .unwrap_or(FacetVersion::ZERO)
    }

    /// Settings of the target version.
    pub fn target_spec(&self) -> Option<&VersionSpec> {
        self.versions.get(&self.target_version())
    }

    fn from_entry(name: &str, entry: FacetEntry) -> Result<Self> {
        if entry.versions.is_empty() {
            return Err(DeployError::invalid_facet(name, "no versions declared"));
        }
        let mut versions = BTreeMap::new();
        for (key, raw) in entry.versions {
            let version: FacetVersion = key
                .parse()
                .map_err(|reason: String| DeployError::invalid_facet(name, reason))?;
            let spec: VersionSpec = serde_json::from_value(raw).map_err(|err| {
                DeployError::invalid_facet(name, format!("version {key}: {err}"))
            })?;
            if !spec.deploy_include.is_empty() && !spec.deploy_exclude.is_empty() {
                return Err(DeployError::invalid_facet(
                    name,
                    format!("version {key} sets both deployInclude and deployExclude"),
                ));
            }
            for selector in spec.deploy_include.iter().chain(&spec.deploy_exclude) {
                if normalize_selector(selector).is_none() {
                    return Err(DeployError::invalid_facet(
                        name,
                        format!("version {key}: '{selector}' is not a 4-byte selector"),
                    ));
                }
            }
            if versions.insert(version, spec).is_some() {
                return Err(DeployError::invalid_facet(
                    name,
                    format!("version {version} declared twice"),
                ));
            }
        }
        Ok(Self {
            name: name.to_string(),
            priority: entry.priority,
            libraries: entry.libraries,
            versions,
        })
    }
}

/// Parsed facet configuration of one diamond.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetsConfig {
    pub protocol_version: Option<FacetVersion>,
    pub protocol_init_facet: Option<String>,
    /// Facets in declaration order.
    pub facets: Vec<FacetConfig>,
}

impl FacetsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                DeployError::Config(format!("facet config not found: {}", path.display()))
            } else {
                DeployError::io(path, err)
            }
        })?;
        Self::from_json_str(&content).map_err(|err| match err {
            DeployError::Config(reason) => {
                DeployError::Config(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(content)
            .map_err(|err| DeployError::Config(format!("invalid facet config JSON: {err}")))?;
        let Value::Object(mut root) = root else {
            return Err(DeployError::Config(
                "facet config must be a JSON object".to_string(),
            ));
        };

        let mut config = FacetsConfig::default();
        let facets = match root.remove("facets") {
            Some(Value::Object(facets)) => {
                config.protocol_version = match root.remove("protocolVersion") {
                    Some(raw) => Some(serde_json::from_value(raw).map_err(|err| {
                        DeployError::Config(format!("invalid protocolVersion: {err}"))
                    })?),
                    None => None,
                };
                config.protocol_init_facet = match root.remove("protocolInitFacet") {
                    Some(Value::String(name)) => Some(name),
                    Some(_) => {
                        return Err(DeployError::Config(
                            "protocolInitFacet must be a string".to_string(),
                        ));
                    }
                    None => None,
                };
                if let Some(key) = root.keys().next() {
                    return Err(DeployError::Config(format!(
                        "unknown top-level field '{key}' in facet config"
                    )));
                }
                facets
            }
            Some(_) => {
                return Err(DeployError::Config(
                    "'facets' must be an object".to_string(),
                ));
            }
            None => root,
        };

        for (name, raw) in facets {
            let entry: FacetEntry = serde_json::from_value(raw)
                .map_err(|err| DeployError::invalid_facet(&name, err.to_string()))?;
            config.facets.push(FacetConfig::from_entry(&name, entry)?);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(init_facet) = &self.protocol_init_facet {
            if self.facet(init_facet).is_none() {
                return Err(DeployError::Config(format!(
                    "protocolInitFacet '{init_facet}' is not a configured facet"
                )));
            }
        }
        Ok(())
    }

    pub fn facet(&self, name: &str) -> Option<&FacetConfig> {
        self.facets.iter().find(|f| f.name == name)
    }

    /// Facets in deploy order: ascending priority, ties in declaration order.
    pub fn ordered(&self) -> Vec<&FacetConfig> {
        let mut ordered: Vec<&FacetConfig> = self.facets.iter().collect();
        ordered.sort_by_key(|f| f.priority);
        ordered
    }

    /// Short hash over facet names and target versions.
    ///
    /// Two runs over the same configuration share a fingerprint, which makes
    /// the default deployment id resume the same step registry.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for facet in self.ordered() {
            hasher.update(facet.name.as_bytes());
            hasher.update(&[0]);
            hasher.update(facet.target_version().to_string().as_bytes());
            hasher.update(&[0]);
        }
        if let Some(version) = self.protocol_version {
            hasher.update(b"protocol");
            hasher.update(version.to_string().as_bytes());
        }
        let hex = hasher.finalize().to_hex();
        hex.as_str()[..12].to_string()
    }
}

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;

use serde::Deserialize;

use crate::error::ReconError;

const DEFAULT_CONFIG: &str = include_str!("default_config.toml");

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Ordered: declaration order breaks equal-length alias ties.
    #[serde(default)]
    pub aliases: Vec<ProviderAlias>,
}

// ---------------------------------------------------------------------------
// Provider aliases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderAlias {
    pub canonical: String,
    #[serde(default)]
    pub variants: Vec<String>,
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// Fuzzy acceptance bars. All scores are 0..=100 and comparisons are
/// inclusive: a score equal to the threshold is accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct MatcherConfig {
    /// Bar used while more than one candidate circuit remains.
    #[serde(default = "default_strict_threshold")]
    pub strict_threshold: u8,
    /// Bar used when exactly one candidate circuit remains.
    #[serde(default = "default_single_candidate_threshold")]
    pub single_candidate_threshold: u8,
    /// Accepted scores strictly above this are Medium, the rest Low.
    #[serde(default = "default_medium_above")]
    pub medium_above: u8,
    /// Nothing below this is ever accepted.
    #[serde(default = "default_low_floor")]
    pub low_floor: u8,
}

fn default_strict_threshold() -> u8 {
    80
}

fn default_single_candidate_threshold() -> u8 {
    70
}

fn default_medium_above() -> u8 {
    80
}

fn default_low_floor() -> u8 {
    60
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            strict_threshold: default_strict_threshold(),
            single_candidate_threshold: default_single_candidate_threshold(),
            medium_above: default_medium_above(),
            low_floor: default_low_floor(),
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Device tag required for program inclusion. `None` disables the check.
    #[serde(default)]
    pub required_tag: Option<String>,
    /// Case-insensitive substrings of site names that are never reconciled.
    #[serde(default)]
    pub excluded_site_patterns: Vec<String>,
    /// Exclude sites whose uplinks already carry a provisioned static address.
    #[serde(default)]
    pub exclude_already_configured: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            required_tag: None,
            excluded_site_patterns: Vec::new(),
            exclude_already_configured: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestratorConfig {
    /// Backfill circuit records for unmatched cellular/satellite uplinks.
    #[serde(default)]
    pub create_cellular_circuits: bool,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Minimum spacing between consecutive external calls.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: i64,
    #[serde(default)]
    pub strip_prefixes: Vec<String>,
    #[serde(default)]
    pub remaps: Vec<RemapRule>,
    #[serde(default)]
    pub static_ranges: Vec<StaticRange>,
}

fn default_base_url() -> String {
    "https://rdap.arin.net/registry".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_throttle_ms() -> u64 {
    250
}

/// Ten years.
const MAX_CACHE_TTL_HOURS: i64 = 24 * 365 * 10;

fn default_cache_ttl_hours() -> i64 {
    24
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            throttle_ms: default_throttle_ms(),
            cache_ttl_hours: default_cache_ttl_hours(),
            strip_prefixes: Vec::new(),
            remaps: Vec::new(),
            static_ranges: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemapMatch {
    /// Case-insensitive substring of the chosen organization name.
    #[default]
    Contains,
    /// Case-sensitive prefix of the network name; checked before entities.
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemapRule {
    pub pattern: String,
    pub display: String,
    #[serde(default, rename = "match")]
    pub match_kind: RemapMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticRange {
    pub cidr: String,
    pub organization: String,
}

// ---------------------------------------------------------------------------
// IPv4 CIDR
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: u32,
    prefix: u8,
}

impl Ipv4Cidr {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, prefix: u8) -> Self {
        let addr = u32::from_be_bytes([a, b, c, d]);
        Self { network: addr & mask(prefix), prefix }
    }

    /// `"166.80.0.0/16"`; a bare address is a /32.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((a, p)) => (a, p.parse::<u8>().ok()?),
            None => (s, 32),
        };
        if prefix > 32 {
            return None;
        }
        let addr: Ipv4Addr = addr.parse().ok()?;
        let bits = u32::from(addr);
        Some(Self { network: bits & mask(prefix), prefix })
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & mask(self.prefix) == self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

const fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.network), self.prefix)
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// The configuration shipped with the engine.
    pub fn default_config() -> Self {
        Self::from_toml(DEFAULT_CONFIG).expect("embedded default config is valid")
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let m = &self.matcher;
        for (name, value) in [
            ("strict_threshold", m.strict_threshold),
            ("single_candidate_threshold", m.single_candidate_threshold),
            ("medium_above", m.medium_above),
            ("low_floor", m.low_floor),
        ] {
            if value > 100 {
                return Err(ReconError::ConfigValidation(format!(
                    "matcher.{name} must be within 0..=100, got {value}"
                )));
            }
        }
        if m.single_candidate_threshold > m.strict_threshold {
            return Err(ReconError::ConfigValidation(format!(
                "matcher.single_candidate_threshold ({}) exceeds strict_threshold ({})",
                m.single_candidate_threshold, m.strict_threshold
            )));
        }
        if m.low_floor > m.medium_above {
            return Err(ReconError::ConfigValidation(format!(
                "matcher.low_floor ({}) exceeds medium_above ({})",
                m.low_floor, m.medium_above
            )));
        }

        let mut seen = HashSet::new();
        for alias in &self.aliases {
            let canonical = alias.canonical.trim();
            if canonical.is_empty() {
                return Err(ReconError::ConfigValidation(
                    "alias with empty canonical name".into(),
                ));
            }
            if !seen.insert(canonical.to_lowercase()) {
                return Err(ReconError::ConfigValidation(format!(
                    "duplicate alias canonical '{canonical}'"
                )));
            }
            if alias.variants.iter().any(|v| v.trim().is_empty()) {
                return Err(ReconError::ConfigValidation(format!(
                    "alias '{canonical}' has an empty variant"
                )));
            }
        }

        let r = &self.registry;
        if r.timeout_secs == 0 {
            return Err(ReconError::ConfigValidation(
                "registry.timeout_secs must be positive".into(),
            ));
        }
        if !(0..=MAX_CACHE_TTL_HOURS).contains(&r.cache_ttl_hours) {
            return Err(ReconError::ConfigValidation(format!(
                "registry.cache_ttl_hours must be within 0..={MAX_CACHE_TTL_HOURS}, got {}",
                r.cache_ttl_hours
            )));
        }
        for range in &r.static_ranges {
            if Ipv4Cidr::parse(&range.cidr).is_none() {
                return Err(ReconError::ConfigValidation(format!(
                    "registry.static_ranges: malformed CIDR '{}'",
                    range.cidr
                )));
            }
        }
        for rule in &r.remaps {
            if rule.pattern.is_empty() || rule.display.trim().is_empty() {
                return Err(ReconError::ConfigValidation(
                    "registry.remaps: pattern and display must be non-empty".into(),
                ));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

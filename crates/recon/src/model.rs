use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReconError;
use crate::speed::SpeedLabel;

fn check_ip(kind: &'static str, id: &str, field: &str, ip: Option<&str>) -> Result<(), ReconError> {
    match ip.map(str::trim) {
        Some(ip) if !ip.is_empty() && ip.parse::<std::net::Ipv4Addr>().is_err() => {
            Err(ReconError::InvalidRecord {
                kind,
                record_id: id.to_string(),
                reason: format!("{field} '{ip}' is not an IPv4 address"),
            })
        }
        _ => Ok(()),
    }
}

/// Trimmed value, or `None` for blank.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

// ---------------------------------------------------------------------------
// Input: ordered circuits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CircuitRole {
    Primary,
    Secondary,
}

impl CircuitRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "Primary",
            Self::Secondary => "Secondary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

impl fmt::Display for CircuitRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a circuit record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    /// Imported from the ordering system; never rewritten by the engine.
    OrderingSystem,
    /// Created by a person through the dashboard.
    Manual,
    /// Created by engine remediation (cellular/satellite backfill).
    Automated,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderingSystem => "ordering_system",
            Self::Manual => "manual",
            Self::Automated => "automated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ordering_system" => Some(Self::OrderingSystem),
            "manual" => Some(Self::Manual),
            "automated" => Some(Self::Automated),
            _ => None,
        }
    }
}

/// One ordered circuit line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitRecord {
    pub id: String,
    pub site: String,
    pub role: CircuitRole,
    pub carrier: String,
    #[serde(default)]
    pub speed: String,
    #[serde(default)]
    pub monthly_cost_cents: i64,
    #[serde(default)]
    pub ip: Option<String>,
    pub status: String,
    pub source: RecordSource,
    #[serde(default)]
    pub manual_override: bool,
}

impl CircuitRecord {
    pub fn is_enabled(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("enabled")
    }

    pub fn speed_label(&self) -> SpeedLabel {
        SpeedLabel::parse(&self.speed)
    }

    /// Cellular and satellite circuits carry no stable IP.
    pub fn is_wireless(&self) -> bool {
        self.speed_label().is_wireless()
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let invalid = |reason: &str| ReconError::InvalidRecord {
            kind: "circuit",
            record_id: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        if self.site.trim().is_empty() {
            return Err(invalid("empty site"));
        }
        if self.monthly_cost_cents < 0 {
            return Err(invalid("negative monthly cost"));
        }
        check_ip("circuit", &self.id, "ip", self.ip.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Input: telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceId {
    Wan1,
    Wan2,
}

impl InterfaceId {
    pub const ALL: [InterfaceId; 2] = [InterfaceId::Wan1, InterfaceId::Wan2];

    /// The circuit role this uplink carries when nothing is flipped.
    pub fn natural_role(&self) -> CircuitRole {
        match self {
            Self::Wan1 => CircuitRole::Primary,
            Self::Wan2 => CircuitRole::Secondary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wan1 => "wan1",
            Self::Wan2 => "wan2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(' ', "").as_str() {
            "wan1" => Some(Self::Wan1),
            "wan2" => Some(Self::Wan2),
            _ => None,
        }
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One WAN uplink reading for a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WanObservation {
    pub site: String,
    pub interface: InterfaceId,
    #[serde(default)]
    pub observed_ip: Option<String>,
    /// Static address already pushed to the device for this uplink.
    #[serde(default)]
    pub provisioned_ip: Option<String>,
    /// Raw device notes; the whole text, shared by both uplinks of a device.
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub device_tags: Vec<String>,
    pub observed_at: DateTime<Utc>,
}

impl WanObservation {
    pub fn record_id(&self) -> String {
        format!("{}/{}", self.site, self.interface)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.site.trim().is_empty() {
            return Err(ReconError::InvalidRecord {
                kind: "observation",
                record_id: self.record_id(),
                reason: "empty site".into(),
            });
        }
        let id = self.record_id();
        check_ip("observation", &id, "observed_ip", self.observed_ip.as_deref())?;
        check_ip("observation", &id, "provisioned_ip", self.provisioned_ip.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Registry ownership
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipSource {
    Live,
    Cache,
    Static,
    None,
}

impl fmt::Display for OwnershipSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Cache => write!(f, "cache"),
            Self::Static => write!(f, "static"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Outcome of an ownership lookup. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipResult {
    pub organization: Option<String>,
    pub source: OwnershipSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OwnershipResult {
    pub fn none() -> Self {
        Self { organization: None, source: OwnershipSource::None, error: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self { organization: None, source: OwnershipSource::None, error: Some(reason.into()) }
    }

    pub fn found(organization: Option<String>, source: OwnershipSource) -> Self {
        Self { organization, source, error: None }
    }
}

/// Cached ownership for one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryOwnership {
    pub ip: String,
    pub organization: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unmatched,
}

impl Confidence {
    /// Higher is stronger.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
            Self::Unmatched => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Unmatched => "unmatched",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "unmatched" => Some(Self::Unmatched),
            _ => None,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ExactIp,
    ProviderEquality,
    CellularProvider,
    FuzzyProvider,
    NoMatch,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactIp => "exact_ip",
            Self::ProviderEquality => "provider_equality",
            Self::CellularProvider => "cellular_provider",
            Self::FuzzyProvider => "fuzzy_provider",
            Self::NoMatch => "no_match",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact_ip" => Some(Self::ExactIp),
            "provider_equality" => Some(Self::ProviderEquality),
            "cellular_provider" => Some(Self::CellularProvider),
            "fuzzy_provider" => Some(Self::FuzzyProvider),
            "no_match" => Some(Self::NoMatch),
            _ => None,
        }
    }
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactIp => write!(f, "exact IP"),
            Self::ProviderEquality => write!(f, "provider equality"),
            Self::CellularProvider => write!(f, "cellular provider"),
            Self::FuzzyProvider => write!(f, "fuzzy provider"),
            Self::NoMatch => write!(f, "no match"),
        }
    }
}

/// Matcher output for one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentCandidate {
    pub interface: InterfaceId,
    pub circuit_id: Option<String>,
    pub circuit_role: Option<CircuitRole>,
    pub confidence: Confidence,
    pub reason: MatchReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    /// The matched circuit's role disagrees with the interface's natural role.
    pub flipped: bool,
}

impl AssignmentCandidate {
    pub fn unmatched(interface: InterfaceId) -> Self {
        Self {
            interface,
            circuit_id: None,
            circuit_role: None,
            confidence: Confidence::Unmatched,
            reason: MatchReason::NoMatch,
            score: None,
            flipped: false,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.circuit_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Why a site produced no usable assignment. Evaluated in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    NoDevice,
    MissingProgramTag,
    ExcludedSiteClass,
    AlreadyConfigured,
    NoOrderedCircuit,
    ProviderMismatch,
    /// Eligible but nothing was assigned: a logic or data defect.
    EligibleWithoutAssignment,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoDevice => "no_device",
            Self::MissingProgramTag => "missing_program_tag",
            Self::ExcludedSiteClass => "excluded_site_class",
            Self::AlreadyConfigured => "already_configured",
            Self::NoOrderedCircuit => "no_ordered_circuit",
            Self::ProviderMismatch => "provider_mismatch",
            Self::EligibleWithoutAssignment => "eligible_without_assignment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_device" => Some(Self::NoDevice),
            "missing_program_tag" => Some(Self::MissingProgramTag),
            "excluded_site_class" => Some(Self::ExcludedSiteClass),
            "already_configured" => Some(Self::AlreadyConfigured),
            "no_ordered_circuit" => Some(Self::NoOrderedCircuit),
            "provider_mismatch" => Some(Self::ProviderMismatch),
            "eligible_without_assignment" => Some(Self::EligibleWithoutAssignment),
            _ => None,
        }
    }

    /// Sites excluded before matching get no per-interface assignment rows.
    pub fn excludes_site(&self) -> bool {
        matches!(
            self,
            Self::NoDevice | Self::MissingProgramTag | Self::ExcludedSiteClass | Self::AlreadyConfigured
        )
    }

    pub fn is_defect(&self) -> bool {
        matches!(self, Self::EligibleWithoutAssignment)
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevice => write!(f, "no device registered"),
            Self::MissingProgramTag => write!(f, "device lacks program tag"),
            Self::ExcludedSiteClass => write!(f, "excluded site class"),
            Self::AlreadyConfigured => write!(f, "already configured"),
            Self::NoOrderedCircuit => write!(f, "no ordered circuit"),
            Self::ProviderMismatch => write!(f, "provider mismatch"),
            Self::EligibleWithoutAssignment => write!(f, "eligible without assignment"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SiteClassification {
    pub confidence: Confidence,
    pub exclusion: Option<ExclusionReason>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Engine output per (site, interface).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedAssignment {
    pub site: String,
    pub interface: InterfaceId,
    pub circuit_id: Option<String>,
    pub role: Option<CircuitRole>,
    pub provider: String,
    pub speed: String,
    pub confidence: Confidence,
    pub match_reason: MatchReason,
    pub exclusion: Option<ExclusionReason>,
    pub flipped: bool,
    pub observed_ip: Option<String>,
    pub registry_org: Option<String>,
    /// Set by a person on the dashboard; freezes provider and speed.
    pub confirmed: bool,
    pub reconciled_at: DateTime<Utc>,
}

impl EnrichedAssignment {
    /// Equality ignoring the reconciliation timestamp.
    pub fn content_eq(&self, other: &Self) -> bool {
        let mut a = self.clone();
        a.reconciled_at = other.reconciled_at;
        a == *other
    }
}

/// Site-level outcome row, written even when the site is excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStatus {
    pub site: String,
    pub confidence: Confidence,
    pub exclusion: Option<ExclusionReason>,
    pub reconciled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardedField {
    Provider,
    Speed,
}

impl GuardedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Speed => "speed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provider" => Some(Self::Provider),
            "speed" => Some(Self::Speed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardReason {
    ManualOverride,
    Confirmed,
}

impl GuardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualOverride => "manual_override",
            Self::Confirmed => "confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual_override" => Some(Self::ManualOverride),
            "confirmed" => Some(Self::Confirmed),
            _ => None,
        }
    }
}

/// One automated write the override guard suppressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideAudit {
    pub site: String,
    pub interface: Option<InterfaceId>,
    pub circuit_id: Option<String>,
    pub field: GuardedField,
    pub old_value: String,
    pub attempted_value: String,
    pub reason: GuardReason,
    pub recorded_at: DateTime<Utc>,
}

/// Provider/speed write-back to a non-ordering-system circuit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitUpdate {
    pub circuit_id: String,
    pub carrier: String,
    pub speed: String,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Load,
    Normalize,
    ResolveRegistry,
    Match,
    Classify,
    GuardOverrides,
    Persist,
    Done,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "LOAD"),
            Self::Normalize => write!(f, "NORMALIZE"),
            Self::ResolveRegistry => write!(f, "RESOLVE_REGISTRY"),
            Self::Match => write!(f, "MATCH"),
            Self::Classify => write!(f, "CLASSIFY"),
            Self::GuardOverrides => write!(f, "GUARD_OVERRIDES"),
            Self::Persist => write!(f, "PERSIST"),
            Self::Done => write!(f, "DONE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SiteState {
    Done,
    Failed { step: PipelineStep, error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteReport {
    pub site: String,
    #[serde(flatten)]
    pub state: SiteState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusion: Option<ExclusionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    pub assignments: Vec<EnrichedAssignment>,
    pub skipped_records: usize,
    pub audits: usize,
    pub circuits_updated: usize,
    pub circuits_created: usize,
}

impl SiteReport {
    pub fn failed(site: &str, step: PipelineStep, error: String, skipped_records: usize) -> Self {
        Self {
            site: site.to_string(),
            state: SiteState::Failed { step, error },
            exclusion: None,
            confidence: None,
            assignments: Vec::new(),
            skipped_records,
            audits: 0,
            circuits_updated: 0,
            circuits_created: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, SiteState::Failed { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total_sites: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub excluded: usize,
    pub assigned: usize,
    pub defects: usize,
    pub not_reached: usize,
    pub audits: usize,
    pub exclusion_counts: BTreeMap<String, usize>,
    pub confidence_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub engine_version: String,
    pub run_at: String,
    pub cancelled: bool,
    pub summary: BatchSummary,
    pub sites: Vec<SiteReport>,
}

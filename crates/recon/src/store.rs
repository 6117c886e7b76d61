//! Repository seam between the engine and persistence.
//!
//! The engine only talks to [`ReconStore`]. `circuitmap-io` provides the
//! SQLite implementation; [`MemoryStore`] backs tests and dry runs.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use parking_lot::Mutex;

use crate::error::StoreError;
use crate::model::{
    CircuitRecord, CircuitUpdate, EnrichedAssignment, InterfaceId, OverrideAudit, RecordSource,
    SiteStatus, WanObservation,
};

/// Everything the pipeline reads for one site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteSnapshot {
    pub circuits: Vec<CircuitRecord>,
    pub observations: Vec<WanObservation>,
    pub previous: Vec<EnrichedAssignment>,
}

/// Everything the pipeline writes for one site, applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteCommit {
    pub status: SiteStatus,
    /// Full assignment set; rows for other interfaces are removed.
    pub assignments: Vec<EnrichedAssignment>,
    pub circuit_updates: Vec<CircuitUpdate>,
    /// Inserted only when no record with the same id exists.
    pub new_circuits: Vec<CircuitRecord>,
    pub audits: Vec<OverrideAudit>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    pub circuits_updated: usize,
    pub circuits_created: usize,
}

pub trait ReconStore {
    /// Union of sites known to the circuit records and to telemetry, sorted.
    fn list_sites(&self) -> Result<Vec<String>, StoreError>;

    fn load_site(&self, site: &str) -> Result<SiteSnapshot, StoreError>;

    /// Apply a site's results in one transaction: all or nothing.
    ///
    /// Circuit updates skip ordering-system and `manual_override` records
    /// even if asked, so a human edit landing between load and commit wins.
    fn commit_site(&self, commit: &SiteCommit) -> Result<CommitReceipt, StoreError>;

    fn site_status(&self, site: &str) -> Result<Option<SiteStatus>, StoreError>;

    fn audits(&self, site: Option<&str>) -> Result<Vec<OverrideAudit>, StoreError>;

    /// Mark an assignment human-confirmed, optionally correcting its values.
    /// Returns `false` when the site has no row for that interface.
    fn confirm_assignment(
        &self,
        site: &str,
        interface: InterfaceId,
        provider: Option<&str>,
        speed: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Insert or replace circuit records by id. Existing records flagged
    /// `manual_override` are left untouched. Returns rows written.
    fn upsert_circuits(&self, circuits: &[CircuitRecord]) -> Result<usize, StoreError>;

    /// Replace the whole telemetry snapshot. Returns rows written.
    fn replace_observations(&self, observations: &[WanObservation]) -> Result<usize, StoreError>;
}

/// Whether an automated write may touch this record.
pub fn engine_may_update(circuit: &CircuitRecord) -> bool {
    circuit.source != RecordSource::OrderingSystem && !circuit.manual_override
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    circuits: Vec<CircuitRecord>,
    observations: Vec<WanObservation>,
    assignments: BTreeMap<(String, InterfaceId), EnrichedAssignment>,
    statuses: BTreeMap<String, SiteStatus>,
    audits: Vec<OverrideAudit>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failing_commits: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(circuits: Vec<CircuitRecord>, observations: Vec<WanObservation>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            state.circuits = circuits;
            state.observations = observations;
        }
        store
    }

    /// Make every commit for `site` fail until cleared.
    pub fn fail_commits_for(&self, site: &str) {
        self.failing_commits.lock().insert(site.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_commits.lock().clear();
    }

    pub fn assignments(&self, site: &str) -> Vec<EnrichedAssignment> {
        self.state
            .lock()
            .assignments
            .iter()
            .filter(|((s, _), _)| s == site)
            .map(|(_, a)| a.clone())
            .collect()
    }

    pub fn circuits(&self) -> Vec<CircuitRecord> {
        self.state.lock().circuits.clone()
    }
}

impl ReconStore for MemoryStore {
    fn list_sites(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock();
        let sites: BTreeSet<String> = state
            .circuits
            .iter()
            .map(|c| c.site.clone())
            .chain(state.observations.iter().map(|o| o.site.clone()))
            .collect();
        Ok(sites.into_iter().collect())
    }

    fn load_site(&self, site: &str) -> Result<SiteSnapshot, StoreError> {
        let state = self.state.lock();
        Ok(SiteSnapshot {
            circuits: state.circuits.iter().filter(|c| c.site == site).cloned().collect(),
            observations: state.observations.iter().filter(|o| o.site == site).cloned().collect(),
            previous: state
                .assignments
                .iter()
                .filter(|((s, _), _)| s == site)
                .map(|(_, a)| a.clone())
                .collect(),
        })
    }

    fn commit_site(&self, commit: &SiteCommit) -> Result<CommitReceipt, StoreError> {
        let site = commit.status.site.as_str();
        if self.failing_commits.lock().contains(site) {
            return Err(StoreError::WriteFailed(format!("injected failure for site {site}")));
        }

        // Stage on a copy so a failure leaves nothing behind.
        let mut state = self.state.lock();
        let mut staged_circuits = state.circuits.clone();
        let mut receipt = CommitReceipt::default();

        for update in &commit.circuit_updates {
            if let Some(c) = staged_circuits.iter_mut().find(|c| c.id == update.circuit_id) {
                if engine_may_update(c) {
                    c.carrier = update.carrier.clone();
                    c.speed = update.speed.clone();
                    receipt.circuits_updated += 1;
                }
            }
        }
        for new in &commit.new_circuits {
            if !staged_circuits.iter().any(|c| c.id == new.id) {
                staged_circuits.push(new.clone());
                receipt.circuits_created += 1;
            }
        }

        state.circuits = staged_circuits;
        state.assignments.retain(|(s, _), _| s != site);
        for a in &commit.assignments {
            state.assignments.insert((a.site.clone(), a.interface), a.clone());
        }
        state.statuses.insert(site.to_string(), commit.status.clone());
        state.audits.extend(commit.audits.iter().cloned());
        Ok(receipt)
    }

    fn site_status(&self, site: &str) -> Result<Option<SiteStatus>, StoreError> {
        Ok(self.state.lock().statuses.get(site).cloned())
    }

    fn audits(&self, site: Option<&str>) -> Result<Vec<OverrideAudit>, StoreError> {
        Ok(self
            .state
            .lock()
            .audits
            .iter()
            .filter(|a| site.map_or(true, |s| a.site == s))
            .cloned()
            .collect())
    }

    fn confirm_assignment(
        &self,
        site: &str,
        interface: InterfaceId,
        provider: Option<&str>,
        speed: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let Some(a) = state.assignments.get_mut(&(site.to_string(), interface)) else {
            return Ok(false);
        };
        a.confirmed = true;
        if let Some(p) = provider {
            a.provider = p.to_string();
        }
        if let Some(s) = speed {
            a.speed = s.to_string();
        }
        Ok(true)
    }

    fn upsert_circuits(&self, circuits: &[CircuitRecord]) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        let mut written = 0;
        for circuit in circuits {
            match state.circuits.iter_mut().find(|c| c.id == circuit.id) {
                Some(existing) if existing.manual_override => continue,
                Some(existing) => *existing = circuit.clone(),
                None => state.circuits.push(circuit.clone()),
            }
            written += 1;
        }
        Ok(written)
    }

    fn replace_observations(&self, observations: &[WanObservation]) -> Result<usize, StoreError> {
        self.state.lock().observations = observations.to_vec();
        Ok(observations.len())
    }
}

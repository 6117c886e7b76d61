//! Reconciliation Orchestrator.
//!
//! Drives one site at a time through
//! `LOAD → NORMALIZE → RESOLVE_REGISTRY → MATCH → CLASSIFY → GUARD_OVERRIDES → PERSIST`.
//! A failing step marks only that site failed; the batch moves on. Batch and
//! single-site refresh share [`Reconciler::run_site`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::classify::{classify, pre_match_exclusion, SiteContext};
use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::guard::guard_overrides;
use crate::lookup::OwnershipLookup;
use crate::matcher::{InterfaceEvidence, Matcher};
use crate::model::{
    non_blank, AssignmentCandidate, BatchReport, CircuitRecord, CircuitRole, EnrichedAssignment,
    ExclusionReason, InterfaceId, PipelineStep, RecordSource, SiteClassification, SiteReport,
    SiteState, SiteStatus, WanObservation,
};
use crate::normalize::ProviderNormalizer;
use crate::notes::parse_device_notes;
use crate::store::{ReconStore, SiteCommit};
use crate::summary::compute_summary;

/// Cooperative cancellation, checked between sites.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type Clock<'a> = Box<dyn Fn() -> DateTime<Utc> + 'a>;

pub struct Reconciler<'a> {
    config: &'a ReconConfig,
    normalizer: ProviderNormalizer,
    store: &'a dyn ReconStore,
    lookup: &'a dyn OwnershipLookup,
    clock: Clock<'a>,
}

/// Site data after NORMALIZE.
struct Normalized {
    circuits: Vec<CircuitRecord>,
    observations: Vec<WanObservation>,
    skipped: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a ReconConfig, store: &'a dyn ReconStore, lookup: &'a dyn OwnershipLookup) -> Self {
        Self {
            config,
            normalizer: ProviderNormalizer::new(&config.aliases),
            store,
            lookup,
            clock: Box::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Reconcile every known site. Only listing the sites can fail the batch.
    pub fn run_batch(&self, cancel: &CancelToken) -> Result<BatchReport, ReconError> {
        let run_at = (self.clock)();
        let sites = self.store.list_sites()?;
        log::info!("reconciling {} sites", sites.len());

        let mut reports = Vec::with_capacity(sites.len());
        let mut not_reached = 0;
        for (i, site) in sites.iter().enumerate() {
            if cancel.is_cancelled() {
                not_reached = sites.len() - i;
                log::warn!("batch cancelled; {not_reached} sites not reached");
                break;
            }
            reports.push(self.run_site(site));
        }

        let summary = compute_summary(&reports, not_reached);
        log::info!(
            "batch done: {} succeeded, {} failed, {} excluded, {} defects",
            summary.succeeded,
            summary.failed,
            summary.excluded,
            summary.defects
        );
        Ok(BatchReport {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: run_at.to_rfc3339(),
            cancelled: not_reached > 0,
            summary,
            sites: reports,
        })
    }

    /// On-demand refresh of one site through the batch pipeline.
    pub fn refresh_site(&self, site: &str) -> SiteReport {
        self.run_site(site)
    }

    pub fn run_site(&self, site: &str) -> SiteReport {
        let now = (self.clock)();

        // LOAD
        let snapshot = match self.store.load_site(site) {
            Ok(s) => s,
            Err(e) => return self.fail(site, PipelineStep::Load, e.to_string(), 0),
        };

        // NORMALIZE
        let Normalized { mut circuits, observations, skipped } =
            normalize_site(site, snapshot.circuits, snapshot.observations);
        let previous = snapshot.previous;

        let mut evidence: Vec<InterfaceEvidence> = observations
            .iter()
            .map(|o| InterfaceEvidence {
                interface: o.interface,
                observed_ip: non_blank(o.observed_ip.as_deref()),
                notes_label: parse_device_notes(&o.notes).for_interface(o.interface).cloned(),
                registry_org: None,
            })
            .collect();

        let pre_exclusion = {
            let ctx = SiteContext { site, observations: &observations, circuits: &circuits, evidence: &evidence };
            pre_match_exclusion(&self.config.classifier, &ctx)
        };

        let mut candidates: Vec<AssignmentCandidate> = Vec::new();
        let mut new_circuits: Vec<CircuitRecord> = Vec::new();
        if pre_exclusion.is_none() {
            // RESOLVE_REGISTRY
            for ev in &mut evidence {
                let Some(ip) = ev.observed_ip.as_deref() else {
                    continue;
                };
                let result = self.lookup.resolve(ip);
                if let Some(err) = &result.error {
                    log::warn!("site {site} {}: registry lookup for {ip} degraded: {err}", ev.interface);
                }
                ev.registry_org = result.organization;
            }

            // MATCH
            let matcher = Matcher::new(&self.config.matcher, &self.normalizer);
            candidates = matcher.match_site(&circuits, &evidence, &previous);
            if self.config.orchestrator.create_cellular_circuits {
                new_circuits = cellular_backfill(site, &circuits, &evidence, &candidates);
                if !new_circuits.is_empty() {
                    circuits.extend(new_circuits.iter().cloned());
                    candidates = matcher.match_site(&circuits, &evidence, &previous);
                }
            }
        }

        // CLASSIFY
        let classification = {
            let ctx = SiteContext { site, observations: &observations, circuits: &circuits, evidence: &evidence };
            classify(&self.config.classifier, &ctx, &candidates)
        };
        if let Some(reason) = classification.exclusion {
            log::debug!("site {site}: {reason}");
        }

        // GUARD_OVERRIDES
        let fresh = self.build_assignments(site, &classification, &candidates, &circuits, &evidence, now);
        let guarded = guard_overrides(site, fresh, &previous, &circuits, now);

        // PERSIST
        let commit = SiteCommit {
            status: SiteStatus {
                site: site.to_string(),
                confidence: classification.confidence,
                exclusion: classification.exclusion,
                reconciled_at: now,
            },
            assignments: guarded.assignments,
            circuit_updates: guarded.circuit_updates,
            new_circuits,
            audits: guarded.audits,
        };
        let receipt = match self.store.commit_site(&commit) {
            Ok(r) => r,
            Err(e) => return self.fail(site, PipelineStep::Persist, e.to_string(), skipped),
        };

        SiteReport {
            site: site.to_string(),
            state: SiteState::Done,
            exclusion: classification.exclusion,
            confidence: Some(classification.confidence),
            assignments: commit.assignments,
            skipped_records: skipped,
            audits: commit.audits.len(),
            circuits_updated: receipt.circuits_updated,
            circuits_created: receipt.circuits_created,
        }
    }

    fn fail(&self, site: &str, step: PipelineStep, error: String, skipped: usize) -> SiteReport {
        log::error!("site {site}: {step} failed: {error}");
        SiteReport::failed(site, step, error, skipped)
    }

    fn build_assignments(
        &self,
        site: &str,
        classification: &SiteClassification,
        candidates: &[AssignmentCandidate],
        circuits: &[CircuitRecord],
        evidence: &[InterfaceEvidence],
        now: DateTime<Utc>,
    ) -> Vec<EnrichedAssignment> {
        if classification.exclusion.is_some_and(|e| e.excludes_site()) {
            return Vec::new();
        }

        candidates
            .iter()
            .filter_map(|cand| {
                let ev = evidence.iter().find(|e| e.interface == cand.interface)?;
                let circuit = cand
                    .circuit_id
                    .as_deref()
                    .and_then(|id| circuits.iter().find(|c| c.id == id));
                let notes_speed = ev.notes_label.as_ref().map(|l| l.speed.render()).unwrap_or_default();

                let (provider, speed) = match circuit {
                    Some(c) => {
                        let speed = if c.speed_label().is_specified() { c.speed.clone() } else { notes_speed };
                        (c.carrier.clone(), speed)
                    }
                    None => {
                        let provider = ev.carrier_signals().first().map(|s| s.to_string()).unwrap_or_default();
                        (provider, notes_speed)
                    }
                };

                let exclusion = if cand.is_matched() {
                    None
                } else if classification.exclusion.is_some() {
                    classification.exclusion
                } else if ev.has_signal() {
                    Some(ExclusionReason::ProviderMismatch)
                } else {
                    None
                };

                Some(EnrichedAssignment {
                    site: site.to_string(),
                    interface: cand.interface,
                    circuit_id: cand.circuit_id.clone(),
                    role: cand.circuit_role,
                    provider,
                    speed,
                    confidence: cand.confidence,
                    match_reason: cand.reason,
                    exclusion,
                    flipped: cand.flipped,
                    observed_ip: ev.observed_ip.clone(),
                    registry_org: ev.registry_org.clone(),
                    confirmed: false,
                    reconciled_at: now,
                })
            })
            .collect()
    }
}

/// Drop invalid records and keep the newest observation per interface.
fn normalize_site(site: &str, circuits: Vec<CircuitRecord>, observations: Vec<WanObservation>) -> Normalized {
    let mut skipped = 0;

    let circuits: Vec<CircuitRecord> = circuits
        .into_iter()
        .filter(|c| match c.validate() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("site {site}: skipping {e}");
                skipped += 1;
                false
            }
        })
        .collect();

    let mut latest: BTreeMap<InterfaceId, WanObservation> = BTreeMap::new();
    for obs in observations {
        if let Err(e) = obs.validate() {
            log::warn!("site {site}: skipping {e}");
            skipped += 1;
            continue;
        }
        match latest.get(&obs.interface) {
            Some(kept) if kept.observed_at >= obs.observed_at => {}
            _ => {
                latest.insert(obs.interface, obs);
            }
        }
    }

    Normalized { circuits, observations: latest.into_values().collect(), skipped }
}

/// New records for unmatched cellular/satellite uplinks with no ordered
/// circuit for their natural role.
fn cellular_backfill(
    site: &str,
    circuits: &[CircuitRecord],
    evidence: &[InterfaceEvidence],
    candidates: &[AssignmentCandidate],
) -> Vec<CircuitRecord> {
    let role_covered = |role: CircuitRole| circuits.iter().any(|c| c.is_enabled() && c.role == role);

    candidates
        .iter()
        .filter(|c| !c.is_matched())
        .filter_map(|cand| {
            let ev = evidence.iter().find(|e| e.interface == cand.interface)?;
            let label = ev.notes_label.as_ref().filter(|l| l.speed.is_wireless())?;
            let role = cand.interface.natural_role();
            if role_covered(role) {
                return None;
            }
            let carrier = non_blank(Some(label.carrier.as_str())).or_else(|| non_blank(ev.registry_org.as_deref()))?;
            let id = format!("auto:{site}:{}", cand.interface);
            if circuits.iter().any(|c| c.id == id) {
                return None;
            }
            log::info!("site {site}: creating {role} {} circuit {id} for {carrier}", label.speed.render());
            Some(CircuitRecord {
                id,
                site: site.to_string(),
                role,
                carrier,
                speed: label.speed.render(),
                monthly_cost_cents: 0,
                ip: None,
                status: "Enabled".to_string(),
                source: RecordSource::Automated,
                manual_override: false,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Confidence, MatchReason, OwnershipResult, OwnershipSource};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 6, 0, 0).unwrap()
    }

    fn config() -> ReconConfig {
        let mut config = ReconConfig::default_config();
        config.classifier.required_tag = None;
        config
    }

    fn circuit(id: &str, site: &str, role: CircuitRole, carrier: &str, ip: Option<&str>, speed: &str) -> CircuitRecord {
        CircuitRecord {
            id: id.into(),
            site: site.into(),
            role,
            carrier: carrier.into(),
            speed: speed.into(),
            monthly_cost_cents: 5000,
            ip: ip.map(Into::into),
            status: "Enabled".into(),
            source: RecordSource::OrderingSystem,
            manual_override: false,
        }
    }

    fn obs(site: &str, interface: InterfaceId, ip: Option<&str>, notes: &str) -> WanObservation {
        WanObservation {
            site: site.into(),
            interface,
            observed_ip: ip.map(Into::into),
            provisioned_ip: None,
            notes: notes.into(),
            device_tags: vec!["Discount-Tire".into()],
            observed_at: now(),
        }
    }

    fn no_registry(_ip: &str) -> OwnershipResult {
        OwnershipResult::none()
    }

    #[test]
    fn invalid_records_skipped_and_counted() {
        let bad = circuit("bad", "S", CircuitRole::Secondary, "AT&T", Some("999.1.1.1"), "");
        let store = MemoryStore::with_data(
            vec![circuit("c1", "S", CircuitRole::Primary, "Comcast", Some("96.81.183.205"), "300M x 30M"), bad],
            vec![
                obs("S", InterfaceId::Wan1, Some("96.81.183.205"), ""),
                obs("S", InterfaceId::Wan2, Some("bogus"), ""),
            ],
        );
        let cfg = config();
        let report = Reconciler::new(&cfg, &store, &no_registry).with_clock(now).run_site("S");
        assert_eq!(report.state, SiteState::Done);
        assert_eq!(report.skipped_records, 2);
        assert_eq!(report.assignments.len(), 1);
        assert_eq!(report.assignments[0].match_reason, MatchReason::ExactIp);
    }

    #[test]
    fn newest_observation_per_interface_wins() {
        let mut old = obs("S", InterfaceId::Wan1, Some("1.1.1.1"), "");
        old.observed_at = now() - chrono::Duration::hours(1);
        let fresh = obs("S", InterfaceId::Wan1, Some("96.81.183.205"), "");
        let n = normalize_site("S", Vec::new(), vec![fresh.clone(), old]);
        assert_eq!(n.observations, vec![fresh]);
    }

    #[test]
    fn registry_org_feeds_provider_match() {
        let store = MemoryStore::with_data(
            vec![circuit("c1", "S", CircuitRole::Primary, "Charter Spectrum", None, "300M x 20M")],
            vec![obs("S", InterfaceId::Wan1, Some("24.1.1.1"), "")],
        );
        let lookup = |ip: &str| {
            assert_eq!(ip, "24.1.1.1");
            OwnershipResult::found(Some("Charter Communications Inc".into()), OwnershipSource::Live)
        };
        let cfg = config();
        let report = Reconciler::new(&cfg, &store, &lookup).with_clock(now).run_site("S");
        let a = &report.assignments[0];
        assert_eq!(a.match_reason, MatchReason::ProviderEquality);
        assert_eq!(a.registry_org.as_deref(), Some("Charter Communications Inc"));
        assert_eq!(a.provider, "Charter Spectrum");
    }

    #[test]
    fn registry_failure_degrades() {
        let store = MemoryStore::with_data(
            vec![circuit("c1", "S", CircuitRole::Primary, "Comcast", None, "300M x 30M")],
            vec![obs("S", InterfaceId::Wan1, Some("73.1.1.1"), "WAN 1 Comcast 300M x 30M")],
        );
        let lookup = |_: &str| OwnershipResult::failed("timed out");
        let cfg = config();
        let report = Reconciler::new(&cfg, &store, &lookup).with_clock(now).run_site("S");
        assert_eq!(report.state, SiteState::Done);
        assert_eq!(report.assignments[0].confidence, Confidence::High);
        assert_eq!(report.assignments[0].registry_org, None);
    }

    #[test]
    fn excluded_site_skips_registry_and_writes_status_only() {
        let store = MemoryStore::with_data(
            vec![circuit("c1", "HUB 1", CircuitRole::Primary, "Comcast", None, "")],
            vec![obs("HUB 1", InterfaceId::Wan1, Some("73.1.1.1"), "")],
        );
        let lookup = |_: &str| -> OwnershipResult { panic!("excluded sites must not hit the registry") };
        let cfg = config();
        let report = Reconciler::new(&cfg, &store, &lookup).with_clock(now).run_site("HUB 1");
        assert_eq!(report.exclusion, Some(ExclusionReason::ExcludedSiteClass));
        assert!(report.assignments.is_empty());
        let status = store.site_status("HUB 1").unwrap().unwrap();
        assert_eq!(status.exclusion, Some(ExclusionReason::ExcludedSiteClass));
    }

    #[test]
    fn cellular_backfill_creates_and_matches() {
        let store = MemoryStore::with_data(
            vec![circuit("p", "S", CircuitRole::Primary, "Comcast", None, "300M x 30M")],
            vec![
                obs("S", InterfaceId::Wan1, None, "WAN 1 Comcast 300M x 30M WAN 2 VZW Cell"),
                obs("S", InterfaceId::Wan2, None, "WAN 1 Comcast 300M x 30M WAN 2 VZW Cell"),
            ],
        );
        let mut cfg = config();
        cfg.orchestrator.create_cellular_circuits = true;
        let reconciler = Reconciler::new(&cfg, &store, &no_registry).with_clock(now);

        let first = reconciler.run_site("S");
        assert_eq!(first.circuits_created, 1);
        let wan2 = first.assignments.iter().find(|a| a.interface == InterfaceId::Wan2).unwrap();
        assert_eq!(wan2.circuit_id.as_deref(), Some("auto:S:wan2"));
        assert_eq!(wan2.match_reason, MatchReason::CellularProvider);

        let created = store.circuits().into_iter().find(|c| c.id == "auto:S:wan2").unwrap();
        assert_eq!(created.source, RecordSource::Automated);
        assert_eq!(created.speed, "Cell");
        assert_eq!(created.carrier, "VZW");

        let second = reconciler.run_site("S");
        assert_eq!(second.circuits_created, 0);
        for (a, b) in first.assignments.iter().zip(&second.assignments) {
            assert!(a.content_eq(b));
        }
    }

    #[test]
    fn backfill_disabled_leaves_mismatch() {
        let store = MemoryStore::with_data(
            vec![circuit("p", "S", CircuitRole::Primary, "Comcast", None, "300M x 30M")],
            vec![obs("S", InterfaceId::Wan2, None, "WAN 2 VZW Cell")],
        );
        let cfg = config();
        let report = Reconciler::new(&cfg, &store, &no_registry).with_clock(now).run_site("S");
        assert_eq!(report.exclusion, Some(ExclusionReason::ProviderMismatch));
        assert_eq!(report.circuits_created, 0);
        assert_eq!(report.assignments[0].exclusion, Some(ExclusionReason::ProviderMismatch));
    }

    #[test]
    fn cancelled_batch_reaches_no_sites() {
        let store = MemoryStore::with_data(
            vec![
                circuit("a", "A", CircuitRole::Primary, "Comcast", None, ""),
                circuit("b", "B", CircuitRole::Primary, "Comcast", None, ""),
            ],
            Vec::new(),
        );
        let cfg = config();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = Reconciler::new(&cfg, &store, &no_registry).run_batch(&cancel).unwrap();
        assert!(report.cancelled);
        assert!(report.sites.is_empty());
        assert_eq!(report.summary.not_reached, 2);
        assert!(store.site_status("A").unwrap().is_none());
    }
}

//! Override guard.
//!
//! Runs between classification and persistence. A human-confirmed assignment
//! keeps its provider and speed no matter what the pipeline computed, and a
//! circuit record flagged `manual_override` is never written. Every suppressed
//! write becomes an [`OverrideAudit`] row.

use chrono::{DateTime, Utc};

use crate::model::{
    CircuitRecord, CircuitUpdate, EnrichedAssignment, GuardReason, GuardedField, OverrideAudit,
    RecordSource,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardOutcome {
    pub assignments: Vec<EnrichedAssignment>,
    pub circuit_updates: Vec<CircuitUpdate>,
    pub audits: Vec<OverrideAudit>,
}

fn field_value(a: &EnrichedAssignment, field: GuardedField) -> &str {
    match field {
        GuardedField::Provider => &a.provider,
        GuardedField::Speed => &a.speed,
    }
}

fn set_field(a: &mut EnrichedAssignment, field: GuardedField, value: String) {
    match field {
        GuardedField::Provider => a.provider = value,
        GuardedField::Speed => a.speed = value,
    }
}

const FIELDS: [GuardedField; 2] = [GuardedField::Provider, GuardedField::Speed];

/// Apply confirmed values and decide circuit write-backs for one site.
///
/// `fresh` holds the assignments computed by this run. Confirmed previous
/// rows for interfaces missing from `fresh` are carried forward unchanged so
/// an exclusion or a vanished uplink never deletes them.
///
/// A confirmation belongs to the circuit it was made on. When this run
/// matched the interface to another circuit that still exists, the confirmed
/// row stays pinned to its circuit and the new match is audited instead.
/// Write-back only ever targets the confirmed circuit.
pub fn guard_overrides(
    site: &str,
    fresh: Vec<EnrichedAssignment>,
    previous: &[EnrichedAssignment],
    circuits: &[CircuitRecord],
    now: DateTime<Utc>,
) -> GuardOutcome {
    let mut outcome = GuardOutcome::default();

    for mut assignment in fresh {
        let prior = previous.iter().find(|p| p.interface == assignment.interface);
        let Some(prior) = prior.filter(|p| p.confirmed) else {
            assignment.confirmed = false;
            outcome.assignments.push(assignment);
            continue;
        };

        let confirmed_circuit = prior
            .circuit_id
            .as_deref()
            .and_then(|id| circuits.iter().find(|c| c.id == id));
        let same_circuit = prior.circuit_id == assignment.circuit_id;

        if let (false, Some(circuit)) = (same_circuit, confirmed_circuit) {
            log::warn!(
                "site {site} {}: confirmed on circuit {} but matched {}; keeping the confirmed circuit",
                prior.interface,
                circuit.id,
                assignment.circuit_id.as_deref().unwrap_or("nothing")
            );
            keep_confirmed(site, prior, &mut assignment, now, &mut outcome);
            write_back(site, prior, circuit, now, &mut outcome);
            outcome.assignments.push(prior.clone());
            continue;
        }

        if let (Some(old_id), None) = (prior.circuit_id.as_deref(), confirmed_circuit) {
            log::error!(
                "site {site}: confirmed {} assignment references circuit {old_id} which no longer exists; keeping confirmed values",
                prior.interface
            );
        }

        assignment.confirmed = true;
        keep_confirmed(site, prior, &mut assignment, now, &mut outcome);
        if let (true, Some(circuit)) = (same_circuit, confirmed_circuit) {
            write_back(site, &assignment, circuit, now, &mut outcome);
        }
        outcome.assignments.push(assignment);
    }

    for prior in previous.iter().filter(|p| p.confirmed) {
        if !outcome.assignments.iter().any(|a| a.interface == prior.interface) {
            outcome.assignments.push(prior.clone());
        }
    }
    outcome.assignments.sort_by_key(|a| a.interface);
    outcome
}

/// Overwrite computed provider/speed with the confirmed ones, auditing each
/// value that differed.
fn keep_confirmed(
    site: &str,
    prior: &EnrichedAssignment,
    assignment: &mut EnrichedAssignment,
    now: DateTime<Utc>,
    outcome: &mut GuardOutcome,
) {
    for field in FIELDS {
        let kept = field_value(prior, field);
        let computed = field_value(assignment, field);
        if kept == computed {
            continue;
        }
        log::warn!(
            "site {site} {}: keeping confirmed {} '{kept}' over computed '{computed}'",
            assignment.interface,
            field.as_str()
        );
        outcome.audits.push(OverrideAudit {
            site: site.to_string(),
            interface: Some(assignment.interface),
            circuit_id: assignment.circuit_id.clone(),
            field,
            old_value: kept.to_string(),
            attempted_value: computed.to_string(),
            reason: GuardReason::Confirmed,
            recorded_at: now,
        });
        set_field(assignment, field, kept.to_string());
    }
}

/// Sync confirmed provider/speed onto a circuit record the engine may edit.
fn write_back(
    site: &str,
    assignment: &EnrichedAssignment,
    circuit: &CircuitRecord,
    now: DateTime<Utc>,
    outcome: &mut GuardOutcome,
) {
    if circuit.source == RecordSource::OrderingSystem {
        return;
    }
    let current = |field: GuardedField| match field {
        GuardedField::Provider => circuit.carrier.as_str(),
        GuardedField::Speed => circuit.speed.as_str(),
    };
    let differing: Vec<GuardedField> = FIELDS
        .into_iter()
        .filter(|&f| current(f) != field_value(assignment, f))
        .collect();
    if differing.is_empty() {
        return;
    }

    if circuit.manual_override {
        for field in differing {
            log::warn!(
                "site {site}: circuit {} is manual_override; not writing {} '{}'",
                circuit.id,
                field.as_str(),
                field_value(assignment, field)
            );
            outcome.audits.push(OverrideAudit {
                site: site.to_string(),
                interface: Some(assignment.interface),
                circuit_id: Some(circuit.id.clone()),
                field,
                old_value: current(field).to_string(),
                attempted_value: field_value(assignment, field).to_string(),
                reason: GuardReason::ManualOverride,
                recorded_at: now,
            });
        }
        return;
    }

    outcome.circuit_updates.push(CircuitUpdate {
        circuit_id: circuit.id.clone(),
        carrier: assignment.provider.clone(),
        speed: assignment.speed.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CircuitRole, Confidence, InterfaceId, MatchReason};
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, 0, 0).unwrap()
    }

    fn assignment(interface: InterfaceId, circuit: &str, provider: &str, speed: &str) -> EnrichedAssignment {
        EnrichedAssignment {
            site: "ALB 03".into(),
            interface,
            circuit_id: Some(circuit.into()),
            role: Some(CircuitRole::Primary),
            provider: provider.into(),
            speed: speed.into(),
            confidence: Confidence::High,
            match_reason: MatchReason::ExactIp,
            exclusion: None,
            flipped: false,
            observed_ip: None,
            registry_org: None,
            confirmed: false,
            reconciled_at: at(1),
        }
    }

    fn circuit(id: &str, source: RecordSource, manual_override: bool) -> CircuitRecord {
        CircuitRecord {
            id: id.into(),
            site: "ALB 03".into(),
            role: CircuitRole::Primary,
            carrier: "Comcast".into(),
            speed: "300M x 30M".into(),
            monthly_cost_cents: 0,
            ip: None,
            status: "Enabled".into(),
            source,
            manual_override,
        }
    }

    #[test]
    fn unconfirmed_passes_through() {
        let fresh = vec![assignment(InterfaceId::Wan1, "c1", "Comcast", "300M x 30M")];
        let prev = vec![assignment(InterfaceId::Wan1, "c1", "Old", "1M x 1M")];
        let out = guard_overrides("ALB 03", fresh.clone(), &prev, &[], at(2));
        assert_eq!(out.assignments, fresh);
        assert!(out.audits.is_empty());
        assert!(out.circuit_updates.is_empty());
    }

    #[test]
    fn confirmed_values_copied_forward_and_audited() {
        let fresh = vec![assignment(InterfaceId::Wan1, "c1", "Comcast", "300M x 30M")];
        let mut prior = assignment(InterfaceId::Wan1, "c1", "Comcast Business", "300M x 30M");
        prior.confirmed = true;
        let circuits = [circuit("c1", RecordSource::OrderingSystem, false)];
        let out = guard_overrides("ALB 03", fresh, &[prior], &circuits, at(2));

        let a = &out.assignments[0];
        assert!(a.confirmed);
        assert_eq!(a.provider, "Comcast Business");
        assert_eq!(out.audits.len(), 1);
        let audit = &out.audits[0];
        assert_eq!(audit.field, GuardedField::Provider);
        assert_eq!(audit.old_value, "Comcast Business");
        assert_eq!(audit.attempted_value, "Comcast");
        assert_eq!(audit.reason, GuardReason::Confirmed);
        // Ordering-system records are never rewritten.
        assert!(out.circuit_updates.is_empty());
    }

    #[test]
    fn write_back_to_manual_circuit() {
        let fresh = vec![assignment(InterfaceId::Wan1, "m1", "Comcast", "300M x 30M")];
        let mut prior = assignment(InterfaceId::Wan1, "m1", "Comcast", "500M x 50M");
        prior.confirmed = true;
        let circuits = [circuit("m1", RecordSource::Manual, false)];
        let out = guard_overrides("ALB 03", fresh, &[prior], &circuits, at(2));
        assert_eq!(
            out.circuit_updates,
            vec![CircuitUpdate { circuit_id: "m1".into(), carrier: "Comcast".into(), speed: "500M x 50M".into() }]
        );
    }

    #[test]
    fn manual_override_blocks_write_back() {
        let fresh = vec![assignment(InterfaceId::Wan1, "m1", "Comcast", "300M x 30M")];
        let mut prior = assignment(InterfaceId::Wan1, "m1", "Xfinity", "500M x 50M");
        prior.confirmed = true;
        let circuits = [circuit("m1", RecordSource::Automated, true)];
        let out = guard_overrides("ALB 03", fresh, &[prior], &circuits, at(2));
        assert!(out.circuit_updates.is_empty());
        let overrides: Vec<_> = out
            .audits
            .iter()
            .filter(|a| a.reason == GuardReason::ManualOverride)
            .collect();
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[0].old_value, "Comcast");
        assert_eq!(overrides[0].attempted_value, "Xfinity");
    }

    #[test]
    fn confirmed_rows_survive_when_not_recomputed() {
        let mut prior = assignment(InterfaceId::Wan2, "c2", "AT&T", "50M x 50M");
        prior.confirmed = true;
        let stale = assignment(InterfaceId::Wan1, "c1", "Comcast", "300M x 30M");
        let out = guard_overrides("ALB 03", Vec::new(), &[stale, prior.clone()], &[], at(2));
        assert_eq!(out.assignments, vec![prior]);
    }

    #[test]
    fn rematch_to_other_circuit_stays_pinned() {
        let mut cox = circuit("a", RecordSource::Manual, false);
        cox.carrier = "Cox Business".into();
        let mut att = circuit("b", RecordSource::Manual, false);
        att.carrier = "AT&T Broadband II".into();
        att.role = CircuitRole::Secondary;

        let mut prior = assignment(InterfaceId::Wan1, "a", "Cox Business", "300M x 30M");
        prior.confirmed = true;
        let fresh = vec![assignment(InterfaceId::Wan1, "b", "AT&T Broadband II", "300M x 30M")];
        let out = guard_overrides("ALB 03", fresh, &[prior.clone()], &[cox, att], at(2));

        assert_eq!(out.assignments, vec![prior]);
        assert!(out.circuit_updates.is_empty());
        assert_eq!(out.audits.len(), 1);
        assert_eq!(out.audits[0].circuit_id.as_deref(), Some("b"));
        assert_eq!(out.audits[0].old_value, "Cox Business");
        assert_eq!(out.audits[0].attempted_value, "AT&T Broadband II");
    }

    #[test]
    fn pinned_row_writes_back_only_to_confirmed_circuit() {
        let mut prior = assignment(InterfaceId::Wan1, "a", "Cox Business", "500M x 50M");
        prior.confirmed = true;
        let fresh = vec![assignment(InterfaceId::Wan1, "b", "AT&T", "300M x 30M")];
        let circuits = [circuit("a", RecordSource::Manual, false), circuit("b", RecordSource::Manual, false)];
        let out = guard_overrides("ALB 03", fresh, &[prior], &circuits, at(2));

        assert_eq!(out.assignments[0].circuit_id.as_deref(), Some("a"));
        assert_eq!(
            out.circuit_updates,
            vec![CircuitUpdate { circuit_id: "a".into(), carrier: "Cox Business".into(), speed: "500M x 50M".into() }]
        );
    }

    #[test]
    fn vanished_circuit_never_writes_to_new_match() {
        let fresh = vec![assignment(InterfaceId::Wan1, "c9", "Spectrum", "")];
        let mut prior = assignment(InterfaceId::Wan1, "gone", "Cox", "100M x 10M");
        prior.confirmed = true;
        let circuits = [circuit("c9", RecordSource::Manual, false)];
        let out = guard_overrides("ALB 03", fresh, &[prior], &circuits, at(2));
        assert_eq!(out.assignments[0].circuit_id.as_deref(), Some("c9"));
        assert_eq!(out.assignments[0].provider, "Cox");
        assert!(out.circuit_updates.is_empty());
    }

    #[test]
    fn vanished_circuit_keeps_confirmed_value() {
        let fresh = vec![assignment(InterfaceId::Wan1, "c9", "Spectrum", "")];
        let mut prior = assignment(InterfaceId::Wan1, "gone", "Cox", "100M x 10M");
        prior.confirmed = true;
        let out = guard_overrides("ALB 03", fresh, &[prior], &[], at(2));
        assert_eq!(out.assignments[0].provider, "Cox");
        assert_eq!(out.assignments[0].speed, "100M x 10M");
        assert_eq!(out.audits.len(), 2);
    }
}

//! Circuit-to-Interface Matcher.
//!
//! Rules are tried per interface in priority order: exact IP, normalized
//! provider equality, fuzzy provider similarity. Exact-IP matches claim their
//! circuits first; the remaining interfaces then compete for the remaining
//! circuits, and when two interfaces want the same circuit the tie-break in
//! [`Matcher::break_tie`] decides and the loser tries again without it.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::config::MatcherConfig;
use crate::fuzzy;
use crate::model::{
    AssignmentCandidate, CircuitRecord, CircuitRole, Confidence, EnrichedAssignment, InterfaceId,
    MatchReason,
};
use crate::normalize::{clean, ProviderNormalizer};
use crate::notes::NotesLabel;

/// Everything known about one uplink by the time matching runs.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceEvidence {
    pub interface: InterfaceId,
    pub observed_ip: Option<String>,
    pub notes_label: Option<NotesLabel>,
    pub registry_org: Option<String>,
}

impl InterfaceEvidence {
    /// Carrier signals in preference order: device notes, then registry.
    pub fn carrier_signals(&self) -> Vec<&str> {
        let mut signals = Vec::with_capacity(2);
        if let Some(label) = &self.notes_label {
            if !label.carrier.trim().is_empty() {
                signals.push(label.carrier.as_str());
            }
        }
        if let Some(org) = &self.registry_org {
            if !org.trim().is_empty() {
                signals.push(org.as_str());
            }
        }
        signals
    }

    /// Any evidence at all that a matcher rule could act on.
    pub fn has_signal(&self) -> bool {
        self.observed_ip.is_some() || !self.carrier_signals().is_empty()
    }
}

/// Compare addresses numerically when both parse, textually otherwise.
pub fn same_ip(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a.is_empty() || b.is_empty() {
        return false;
    }
    match (a.parse::<Ipv4Addr>(), b.parse::<Ipv4Addr>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

/// At most one Enabled circuit per role is authoritative: the first one seen.
pub fn authoritative_circuits(circuits: &[CircuitRecord]) -> Vec<&CircuitRecord> {
    let mut by_role: BTreeMap<CircuitRole, &CircuitRecord> = BTreeMap::new();
    for circuit in circuits.iter().filter(|c| c.is_enabled()) {
        match by_role.get(&circuit.role) {
            Some(kept) => log::warn!(
                "site {}: ignoring duplicate Enabled {} circuit {} (keeping {})",
                circuit.site,
                circuit.role,
                circuit.id,
                kept.id
            ),
            None => {
                by_role.insert(circuit.role, circuit);
            }
        }
    }
    by_role.into_values().collect()
}

#[derive(Debug, Clone, Copy)]
struct Proposal {
    circuit: usize,
    confidence: Confidence,
    reason: MatchReason,
    score: Option<u8>,
}

pub struct Matcher<'a> {
    config: &'a MatcherConfig,
    normalizer: &'a ProviderNormalizer,
}

impl<'a> Matcher<'a> {
    pub fn new(config: &'a MatcherConfig, normalizer: &'a ProviderNormalizer) -> Self {
        Self { config, normalizer }
    }

    /// Match one site's circuits to its observed interfaces.
    ///
    /// `previous` is the last persisted assignment set for the site; it only
    /// feeds the stability tie-break.
    pub fn match_site(
        &self,
        circuits: &[CircuitRecord],
        interfaces: &[InterfaceEvidence],
        previous: &[EnrichedAssignment],
    ) -> Vec<AssignmentCandidate> {
        let pool = authoritative_circuits(circuits);
        let mut claimed = vec![false; pool.len()];
        let mut results: BTreeMap<InterfaceId, AssignmentCandidate> = BTreeMap::new();

        // Rule 1: exact IP.
        for ev in interfaces {
            if let Some(idx) = self.exact_ip(ev, &pool, &claimed) {
                claimed[idx] = true;
                let proposal = Proposal {
                    circuit: idx,
                    confidence: Confidence::High,
                    reason: MatchReason::ExactIp,
                    score: None,
                };
                results.insert(ev.interface, candidate(ev.interface, pool[idx], proposal));
            }
        }

        // Rules 2 and 3 with many-to-one resolution.
        let mut open: Vec<&InterfaceEvidence> =
            interfaces.iter().filter(|ev| !results.contains_key(&ev.interface)).collect();
        loop {
            let proposals: Vec<Option<Proposal>> =
                open.iter().map(|ev| self.propose(ev, &pool, &claimed)).collect();

            let conflict = (0..open.len()).find_map(|i| {
                let pi = proposals[i]?;
                (i + 1..open.len())
                    .find(|&j| proposals[j].map(|pj| pj.circuit) == Some(pi.circuit))
                    .map(|j| (i, j))
            });

            let Some((i, j)) = conflict else {
                for (ev, proposal) in open.iter().zip(proposals) {
                    let c = match proposal {
                        Some(p) => candidate(ev.interface, pool[p.circuit], p),
                        None => AssignmentCandidate::unmatched(ev.interface),
                    };
                    results.insert(ev.interface, c);
                }
                break;
            };

            let (Some(pi), Some(pj)) = (proposals[i], proposals[j]) else {
                break;
            };
            let circuit = pool[pi.circuit];
            let (winner, mut proposal) =
                match self.break_tie((open[i], pi), (open[j], pj), circuit, previous) {
                    TieWinner::First(p) => (i, p),
                    TieWinner::Second(p) => (j, p),
                };
            log::debug!(
                "site {}: {} and {} both match circuit {}; assigning {}",
                circuit.site,
                open[i].interface,
                open[j].interface,
                circuit.id,
                open[winner].interface
            );
            proposal.circuit = pi.circuit;
            claimed[pi.circuit] = true;
            let ev = open.remove(winner);
            results.insert(ev.interface, candidate(ev.interface, circuit, proposal));
        }

        interfaces
            .iter()
            .filter_map(|ev| results.remove(&ev.interface))
            .collect()
    }

    fn exact_ip(
        &self,
        ev: &InterfaceEvidence,
        pool: &[&CircuitRecord],
        claimed: &[bool],
    ) -> Option<usize> {
        let observed = ev.observed_ip.as_deref()?;
        pool.iter().enumerate().position(|(idx, c)| {
            !claimed[idx]
                && !c.is_wireless()
                && c.ip.as_deref().is_some_and(|ip| same_ip(ip, observed))
        })
    }

    /// Unclaimed circuits, the interface's natural-role circuit first.
    fn open_circuits(&self, ev: &InterfaceEvidence, pool: &[&CircuitRecord], claimed: &[bool]) -> Vec<usize> {
        let mut idxs: Vec<usize> = (0..pool.len()).filter(|&i| !claimed[i]).collect();
        idxs.sort_by_key(|&i| pool[i].role != ev.interface.natural_role());
        idxs
    }

    fn propose(
        &self,
        ev: &InterfaceEvidence,
        pool: &[&CircuitRecord],
        claimed: &[bool],
    ) -> Option<Proposal> {
        let signals = ev.carrier_signals();
        if signals.is_empty() {
            return None;
        }
        let candidates = self.open_circuits(ev, pool, claimed);

        // Rule 2: canonical equality.
        for signal in &signals {
            let Some(wanted) = self.normalizer.normalize(signal) else {
                continue;
            };
            for &idx in &candidates {
                let circuit = pool[idx];
                if self.normalizer.normalize(&circuit.carrier).as_ref() != Some(&wanted) {
                    continue;
                }
                if circuit.is_wireless() {
                    return Some(Proposal {
                        circuit: idx,
                        confidence: Confidence::High,
                        reason: MatchReason::CellularProvider,
                        score: None,
                    });
                }
                // A different circuit provisioned with exactly the observed IP.
                let ip_conflict = ev.observed_ip.as_deref().is_some_and(|observed| {
                    pool.iter().enumerate().any(|(other, c)| {
                        other != idx
                            && !c.is_wireless()
                            && c.ip.as_deref().is_some_and(|ip| same_ip(ip, observed))
                    })
                });
                return Some(Proposal {
                    circuit: idx,
                    confidence: if ip_conflict { Confidence::Medium } else { Confidence::High },
                    reason: MatchReason::ProviderEquality,
                    score: None,
                });
            }
        }

        // Rule 3: fuzzy. Cellular and satellite circuits only match on rule 2.
        let fuzzy_pool: Vec<usize> =
            candidates.into_iter().filter(|&i| !pool[i].is_wireless()).collect();
        let threshold = if fuzzy_pool.len() > 1 {
            self.config.strict_threshold
        } else {
            self.config.single_candidate_threshold
        };
        let mut best: Option<(usize, u8)> = None;
        for &idx in &fuzzy_pool {
            let carrier = clean(&pool[idx].carrier);
            let score = signals
                .iter()
                .map(|s| fuzzy::similarity(&carrier, &clean(s)))
                .max()
                .unwrap_or(0);
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((idx, score));
            }
        }
        let (idx, score) = best?;
        if score < threshold || score < self.config.low_floor {
            return None;
        }
        let confidence = if score > self.config.medium_above {
            Confidence::Medium
        } else {
            Confidence::Low
        };
        Some(Proposal {
            circuit: idx,
            confidence,
            reason: MatchReason::FuzzyProvider,
            score: Some(score),
        })
    }

    /// Decide which of two interfaces keeps a contested circuit.
    ///
    /// Stronger confidence wins outright. Otherwise the interface whose role
    /// label agrees with the circuit's role wins; an interface's role label is
    /// the role it was last assigned, or its natural role when it has none.
    /// Still tied: the interface currently holding the circuit, else WAN1, and
    /// the winner is capped at Medium.
    fn break_tie(
        &self,
        (a_ev, a): (&InterfaceEvidence, Proposal),
        (b_ev, b): (&InterfaceEvidence, Proposal),
        circuit: &CircuitRecord,
        previous: &[EnrichedAssignment],
    ) -> TieWinner {
        if a.confidence.rank() != b.confidence.rank() {
            return if a.confidence.rank() > b.confidence.rank() {
                TieWinner::First(a)
            } else {
                TieWinner::Second(b)
            };
        }

        let role_label = |iface: InterfaceId| {
            previous
                .iter()
                .find(|p| p.interface == iface)
                .and_then(|p| p.role)
                .unwrap_or_else(|| iface.natural_role())
        };
        let a_agrees = role_label(a_ev.interface) == circuit.role;
        let b_agrees = role_label(b_ev.interface) == circuit.role;
        if a_agrees != b_agrees {
            return if a_agrees { TieWinner::First(a) } else { TieWinner::Second(b) };
        }

        let holder = previous
            .iter()
            .find(|p| p.circuit_id.as_deref() == Some(circuit.id.as_str()))
            .map(|p| p.interface)
            .filter(|iface| *iface == a_ev.interface || *iface == b_ev.interface);
        let pick_a = match holder {
            Some(iface) => iface == a_ev.interface,
            None => a_ev.interface <= b_ev.interface,
        };
        let cap = |mut p: Proposal| {
            if p.confidence == Confidence::High {
                p.confidence = Confidence::Medium;
            }
            p
        };
        if pick_a {
            TieWinner::First(cap(a))
        } else {
            TieWinner::Second(cap(b))
        }
    }
}

enum TieWinner {
    First(Proposal),
    Second(Proposal),
}

fn candidate(interface: InterfaceId, circuit: &CircuitRecord, p: Proposal) -> AssignmentCandidate {
    AssignmentCandidate {
        interface,
        circuit_id: Some(circuit.id.clone()),
        circuit_role: Some(circuit.role),
        confidence: p.confidence,
        reason: p.reason,
        score: p.score,
        flipped: circuit.role != interface.natural_role(),
    }
}

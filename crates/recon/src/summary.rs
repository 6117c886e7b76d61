use std::collections::BTreeMap;

use crate::model::{BatchSummary, SiteReport, SiteState};

/// Compute batch statistics from per-site reports.
pub fn compute_summary(sites: &[SiteReport], not_reached: usize) -> BatchSummary {
    let mut exclusion_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut confidence_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut succeeded = 0;
    let mut failed = 0;
    let mut excluded = 0;
    let mut assigned = 0;
    let mut defects = 0;
    let mut audits = 0;

    for site in sites {
        match site.state {
            SiteState::Done => succeeded += 1,
            SiteState::Failed { .. } => {
                failed += 1;
                continue;
            }
        }
        audits += site.audits;

        if let Some(reason) = site.exclusion {
            *exclusion_counts.entry(reason.as_str().to_string()).or_insert(0) += 1;
            if reason.is_defect() {
                defects += 1;
            } else {
                excluded += 1;
            }
        }

        for a in &site.assignments {
            *confidence_counts.entry(a.confidence.as_str().to_string()).or_insert(0) += 1;
            if a.circuit_id.is_some() {
                assigned += 1;
            }
        }
    }

    BatchSummary {
        total_sites: sites.len() + not_reached,
        succeeded,
        failed,
        excluded,
        assigned,
        defects,
        not_reached,
        audits,
        exclusion_counts,
        confidence_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Confidence, EnrichedAssignment, ExclusionReason, InterfaceId, MatchReason, PipelineStep,
    };
    use chrono::Utc;

    fn done(site: &str, exclusion: Option<ExclusionReason>, assignments: Vec<EnrichedAssignment>) -> SiteReport {
        SiteReport {
            site: site.into(),
            state: SiteState::Done,
            exclusion,
            confidence: Some(Confidence::High),
            assignments,
            skipped_records: 0,
            audits: 1,
            circuits_updated: 0,
            circuits_created: 0,
        }
    }

    fn assignment(confidence: Confidence, circuit: Option<&str>) -> EnrichedAssignment {
        EnrichedAssignment {
            site: "S".into(),
            interface: InterfaceId::Wan1,
            circuit_id: circuit.map(Into::into),
            role: None,
            provider: String::new(),
            speed: String::new(),
            confidence,
            match_reason: MatchReason::NoMatch,
            exclusion: None,
            flipped: false,
            observed_ip: None,
            registry_org: None,
            confirmed: false,
            reconciled_at: Utc::now(),
        }
    }

    #[test]
    fn summary_counts() {
        let sites = vec![
            done("A", None, vec![assignment(Confidence::High, Some("c1")), assignment(Confidence::Low, Some("c2"))]),
            done("B", Some(ExclusionReason::NoDevice), Vec::new()),
            done("C", Some(ExclusionReason::EligibleWithoutAssignment), vec![assignment(Confidence::Unmatched, None)]),
            SiteReport::failed("D", PipelineStep::Persist, "disk full".into(), 0),
        ];
        let s = compute_summary(&sites, 2);
        assert_eq!(s.total_sites, 6);
        assert_eq!(s.succeeded, 3);
        assert_eq!(s.failed, 1);
        assert_eq!(s.excluded, 1);
        assert_eq!(s.defects, 1);
        assert_eq!(s.assigned, 2);
        assert_eq!(s.not_reached, 2);
        assert_eq!(s.audits, 3);
        assert_eq!(s.exclusion_counts["no_device"], 1);
        assert_eq!(s.confidence_counts["high"], 1);
        assert_eq!(s.confidence_counts["unmatched"], 1);
    }
}

use crate::config::ClassifierConfig;
use crate::matcher::InterfaceEvidence;
use crate::model::{
    AssignmentCandidate, CircuitRecord, Confidence, ExclusionReason, SiteClassification,
    WanObservation,
};

/// Inputs the classifier looks at besides the matcher output.
#[derive(Debug, Clone, Copy)]
pub struct SiteContext<'a> {
    pub site: &'a str,
    pub observations: &'a [WanObservation],
    pub circuits: &'a [CircuitRecord],
    pub evidence: &'a [InterfaceEvidence],
}

/// Site-level exclusion check that needs no matcher output (rules 1-4).
///
/// The orchestrator calls this before matching so excluded sites skip the
/// registry lookup entirely.
pub fn pre_match_exclusion(config: &ClassifierConfig, ctx: &SiteContext<'_>) -> Option<ExclusionReason> {
    if ctx.observations.is_empty() {
        return Some(ExclusionReason::NoDevice);
    }

    if let Some(tag) = config.required_tag.as_deref() {
        let tagged = ctx
            .observations
            .iter()
            .any(|o| o.device_tags.iter().any(|t| t.trim().eq_ignore_ascii_case(tag)));
        if !tagged {
            return Some(ExclusionReason::MissingProgramTag);
        }
    }

    let site = ctx.site.to_lowercase();
    if config
        .excluded_site_patterns
        .iter()
        .any(|p| !p.is_empty() && site.contains(&p.to_lowercase()))
    {
        return Some(ExclusionReason::ExcludedSiteClass);
    }

    if config.exclude_already_configured
        && ctx
            .observations
            .iter()
            .any(|o| o.provisioned_ip.as_deref().is_some_and(|ip| !ip.trim().is_empty()))
    {
        return Some(ExclusionReason::AlreadyConfigured);
    }

    None
}

/// Assign the site confidence tier and exclusion reason.
///
/// Rules are evaluated in order and the first applicable wins. Site
/// confidence is the weakest tier among matched interfaces, or Unmatched.
pub fn classify(
    config: &ClassifierConfig,
    ctx: &SiteContext<'_>,
    candidates: &[AssignmentCandidate],
) -> SiteClassification {
    if let Some(reason) = pre_match_exclusion(config, ctx) {
        return SiteClassification { confidence: Confidence::Unmatched, exclusion: Some(reason) };
    }

    if !ctx.circuits.iter().any(|c| c.is_enabled()) {
        return SiteClassification {
            confidence: Confidence::Unmatched,
            exclusion: Some(ExclusionReason::NoOrderedCircuit),
        };
    }

    let weakest = candidates
        .iter()
        .filter(|c| c.is_matched())
        .map(|c| c.confidence)
        .min_by_key(|c| c.rank());
    if let Some(confidence) = weakest {
        return SiteClassification { confidence, exclusion: None };
    }

    let exclusion = if ctx.evidence.iter().any(|e| e.has_signal()) {
        ExclusionReason::ProviderMismatch
    } else {
        log::error!(
            "site {}: eligible with ordered circuits but no assignment and no usable signal",
            ctx.site
        );
        ExclusionReason::EligibleWithoutAssignment
    };
    SiteClassification { confidence: Confidence::Unmatched, exclusion: Some(exclusion) }
}

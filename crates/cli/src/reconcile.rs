//! `cmap run` / `cmap refresh` - the reconciliation pipeline.

use std::path::Path;

use circuitmap_recon::model::{EnrichedAssignment, SiteState};
use circuitmap_recon::{CancelToken, Reconciler, SiteReport};

use crate::exit_codes::{EXIT_DEFECT, EXIT_SITES_FAILED};
use crate::{build_resolver, load_config, open_store, print_json, CliError};

pub fn cmd_run(config_path: Option<&Path>, db: &Path, json: bool, offline: bool) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let store = open_store(db)?;
    let resolver = build_resolver(&config, &store, offline)?;

    let report = Reconciler::new(&config, &store, &resolver)
        .run_batch(&CancelToken::new())?;

    if json {
        print_json(&report)?;
    } else {
        for site in &report.sites {
            print_site(site);
        }
    }

    let s = &report.summary;
    eprintln!(
        "{} sites: {} succeeded, {} failed, {} excluded, {} defects, {} interfaces assigned",
        s.total_sites, s.succeeded, s.failed, s.excluded, s.defects, s.assigned,
    );
    if s.audits > 0 {
        eprintln!("{} overrides suppressed (see `cmap audit`)", s.audits);
    }

    if s.failed > 0 {
        return Err(CliError::silent(EXIT_SITES_FAILED));
    }
    if s.defects > 0 {
        return Err(CliError::silent(EXIT_DEFECT));
    }
    Ok(())
}

pub fn cmd_refresh(
    config_path: Option<&Path>,
    db: &Path,
    site: &str,
    json: bool,
    offline: bool,
) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let store = open_store(db)?;
    let resolver = build_resolver(&config, &store, offline)?;

    let report = Reconciler::new(&config, &store, &resolver).refresh_site(site);

    if json {
        print_json(&report)?;
    } else {
        print_site(&report);
    }

    match &report.state {
        SiteState::Failed { step, error } => {
            Err(CliError::new(EXIT_SITES_FAILED, format!("{site} failed at {step}: {error}")))
        }
        SiteState::Done if report.exclusion.is_some_and(|e| e.is_defect()) => {
            Err(CliError::new(EXIT_DEFECT, format!("{site}: eligible but nothing was assigned")))
        }
        SiteState::Done => Ok(()),
    }
}

fn print_site(site: &SiteReport) {
    match &site.state {
        SiteState::Failed { step, error } => {
            println!("{}  FAILED at {step}: {error}", site.site);
            return;
        }
        SiteState::Done => {}
    }

    let confidence = site.confidence.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
    match site.exclusion {
        Some(reason) => println!("{}  {confidence}  excluded: {reason}", site.site),
        None => println!("{}  {confidence}", site.site),
    }
    for a in &site.assignments {
        println!("  {}", describe(a));
    }
}

fn describe(a: &EnrichedAssignment) -> String {
    let circuit = a.circuit_id.as_deref().unwrap_or("-");
    let mut line = format!(
        "{}  {circuit}  {} / {}  [{}, {}]",
        a.interface, a.provider, a.speed, a.confidence, a.match_reason
    );
    if a.flipped {
        line.push_str("  flipped");
    }
    if a.confirmed {
        line.push_str("  confirmed");
    }
    line
}

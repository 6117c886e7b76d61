//! `cmap ingest` - load JSON feeds into the store.

use std::path::Path;

use serde::Serialize;

use circuitmap_io::{feed, FeedError, SkippedRecord};
use circuitmap_recon::ReconStore;

use crate::{open_store, print_json, CliError};

#[derive(Debug, Default, Serialize)]
struct FeedSummary {
    loaded: usize,
    skipped: Vec<SkippedRecord>,
    /// Existing `manual_override` circuits the import left untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    protected: Option<usize>,
}

#[derive(Debug, Default, Serialize)]
struct IngestSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    circuits: Option<FeedSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    telemetry: Option<FeedSummary>,
}

fn feed_err(path: &Path, e: FeedError) -> CliError {
    CliError::usage(format!("{}: {e}", path.display()))
}

pub fn cmd_ingest(
    db: &Path,
    circuits: Option<&Path>,
    telemetry: Option<&Path>,
    json: bool,
) -> Result<(), CliError> {
    if circuits.is_none() && telemetry.is_none() {
        return Err(CliError::usage("nothing to ingest").with_hint("pass --circuits and/or --telemetry"));
    }

    // Parse everything before touching the store.
    let circuit_load = circuits.map(|p| feed::read_circuits(p).map_err(|e| feed_err(p, e))).transpose()?;
    let telemetry_load = telemetry.map(|p| feed::read_observations(p).map_err(|e| feed_err(p, e))).transpose()?;

    let store = open_store(db)?;
    let mut summary = IngestSummary::default();

    if let Some(load) = circuit_load {
        let loaded = store.upsert_circuits(&load.records)?;
        let protected = load.records.len() - loaded;
        log::info!("upserted {loaded} circuit records ({} skipped)", load.skipped.len());
        if protected > 0 {
            log::warn!("{protected} circuit records are manual_override; import left them unchanged");
        }
        summary.circuits = Some(FeedSummary { loaded, skipped: load.skipped, protected: Some(protected) });
    }
    if let Some(load) = telemetry_load {
        let loaded = store.replace_observations(&load.records)?;
        log::info!("replaced telemetry with {loaded} observations ({} skipped)", load.skipped.len());
        summary.telemetry = Some(FeedSummary { loaded, skipped: load.skipped, protected: None });
    }

    if json {
        return print_json(&summary);
    }
    for (name, feed) in [("circuits", &summary.circuits), ("telemetry", &summary.telemetry)] {
        if let Some(feed) = feed {
            match feed.protected {
                Some(protected) if protected > 0 => println!(
                    "{name}: {} loaded, {} skipped, {protected} protected",
                    feed.loaded,
                    feed.skipped.len()
                ),
                _ => println!("{name}: {} loaded, {} skipped", feed.loaded, feed.skipped.len()),
            }
            for s in &feed.skipped {
                println!("  #{}: {}", s.index, s.reason);
            }
        }
    }
    Ok(())
}

//! `cmap audit` / `cmap confirm` - human-confirmed values and the guard log.

use std::path::Path;

use circuitmap_recon::model::InterfaceId;
use circuitmap_recon::ReconStore;

use crate::{open_store, print_json, CliError};

pub fn cmd_audit(db: &Path, site: Option<&str>, json: bool) -> Result<(), CliError> {
    let store = open_store(db)?;
    let audits = store.audits(site)?;

    if json {
        return print_json(&audits);
    }
    if audits.is_empty() {
        eprintln!("no suppressed overrides");
        return Ok(());
    }
    for a in &audits {
        let target = match (&a.interface, &a.circuit_id) {
            (Some(i), _) => i.to_string(),
            (None, Some(id)) => id.clone(),
            (None, None) => "-".to_string(),
        };
        println!(
            "{}  {}  {target}  {}: kept '{}', refused '{}' ({})",
            a.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            a.site,
            a.field.as_str(),
            a.old_value,
            a.attempted_value,
            a.reason.as_str(),
        );
    }
    Ok(())
}

pub fn cmd_confirm(
    db: &Path,
    site: &str,
    interface: InterfaceId,
    provider: Option<&str>,
    speed: Option<&str>,
) -> Result<(), CliError> {
    let store = open_store(db)?;
    if !store.confirm_assignment(site, interface, provider, speed)? {
        return Err(CliError::usage(format!("no assignment for {site} {interface}"))
            .with_hint(format!("run `cmap refresh '{site}'` first")));
    }
    eprintln!("confirmed {site} {interface}");
    Ok(())
}

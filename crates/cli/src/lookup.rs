//! `cmap resolve` - one registry ownership lookup.

use std::path::Path;

use circuitmap_recon::OwnershipLookup;

use crate::{build_resolver, load_config, open_store, print_json, CliError};

pub fn cmd_resolve(config_path: Option<&Path>, db: &Path, ip: &str, offline: bool) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    // The store doubles as the ownership cache.
    let store = open_store(db)?;
    let resolver = build_resolver(&config, &store, offline)?;

    let result = resolver.resolve(ip);
    print_json(&result)?;

    if let Some(error) = &result.error {
        eprintln!("lookup degraded: {error}");
    }
    Ok(())
}

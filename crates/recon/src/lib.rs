//! `circuitmap-recon`: circuit-to-interface reconciliation engine.
//!
//! Pure engine crate: matches ordered circuits to observed WAN uplinks,
//! classifies sites and guards human-confirmed values. Storage and the
//! registry lookup sit behind the [`store::ReconStore`] and
//! [`lookup::OwnershipLookup`] traits; no network or disk access here.

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod fuzzy;
pub mod guard;
pub mod lookup;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod notes;
pub mod speed;
pub mod store;
pub mod summary;

pub use config::ReconConfig;
pub use engine::{CancelToken, Reconciler};
pub use error::{ReconError, StoreError};
pub use lookup::OwnershipLookup;
pub use model::{BatchReport, CircuitRecord, EnrichedAssignment, OwnershipResult, SiteReport, WanObservation};
pub use store::{MemoryStore, ReconStore};

//! Registry ownership lookup for circuitmap.
//!
//! Resolves a public IPv4 address to the organization registered for it,
//! over RDAP. The engine only sees [`RdapResolver`] through the
//! `OwnershipLookup` trait; every failure becomes an `OwnershipResult`
//! with `error` set.
//!
//! Blocking HTTP. No retries beyond the configured backoff.

pub mod cache;
mod client;
pub mod entity;
mod error;
pub mod ranges;
mod resolver;
mod throttle;

pub use cache::{MemoryCache, OwnershipCache};
pub use client::RdapClient;
pub use error::RegistryError;
pub use resolver::RdapResolver;
pub use throttle::Throttle;

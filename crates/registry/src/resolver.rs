//! Registry Ownership Resolver.
//!
//! `resolve(ip)` never fails. Lookup order:
//!
//! 1. not IPv4 → `none` with an error
//! 2. private/reserved → `none`, no call
//! 3. configured static range → `static`
//! 4. fresh cache entry → `cache`
//! 5. throttled RDAP call → `live`, written back to the cache
//!
//! Offline resolvers stop after step 4 and also accept stale cache entries.

use std::net::Ipv4Addr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use circuitmap_recon::config::RegistryConfig;
use circuitmap_recon::model::{OwnershipResult, OwnershipSource, RegistryOwnership};
use circuitmap_recon::OwnershipLookup;

use crate::cache::{is_fresh, OwnershipCache};
use crate::client::RdapClient;
use crate::entity::select_organization;
use crate::error::RegistryError;
use crate::ranges::{is_reserved, StaticRanges};
use crate::throttle::Throttle;

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

pub struct RdapResolver<'a> {
    config: RegistryConfig,
    client: Option<RdapClient>,
    cache: &'a dyn OwnershipCache,
    static_ranges: StaticRanges,
    throttle: Throttle,
    ttl: Duration,
    clock: Clock,
}

impl<'a> RdapResolver<'a> {
    pub fn new(config: &RegistryConfig, cache: &'a dyn OwnershipCache) -> Result<Self, RegistryError> {
        let client = RdapClient::new(config)?;
        Self::build(config, Some(client), cache)
    }

    /// Resolver that never leaves the process: static ranges and cache only.
    pub fn offline(config: &RegistryConfig, cache: &'a dyn OwnershipCache) -> Result<Self, RegistryError> {
        Self::build(config, None, cache)
    }

    fn build(
        config: &RegistryConfig,
        client: Option<RdapClient>,
        cache: &'a dyn OwnershipCache,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            config: config.clone(),
            client,
            cache,
            static_ranges: StaticRanges::new(&config.static_ranges)?,
            throttle: Throttle::new(StdDuration::from_millis(config.throttle_ms)),
            ttl: Duration::hours(config.cache_ttl_hours),
            clock: Box::new(Utc::now),
        })
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn is_offline(&self) -> bool {
        self.client.is_none()
    }

    fn cached(&self, ip: &str, now: DateTime<Utc>) -> Option<RegistryOwnership> {
        match self.cache.get(ip) {
            Ok(Some(entry)) if self.is_offline() || is_fresh(&entry, self.ttl, now) => Some(entry),
            Ok(_) => None,
            Err(e) => {
                log::warn!("ownership cache read for {ip} failed: {e}");
                None
            }
        }
    }

    fn lookup_live(&self, client: &RdapClient, ip: &str, now: DateTime<Utc>) -> OwnershipResult {
        self.throttle.wait();
        let network = match client.fetch_network(ip) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("rdap lookup for {ip} failed: {e}");
                return OwnershipResult::failed(e.to_string());
            }
        };

        let organization = select_organization(&network, &self.config);
        log::debug!("rdap {ip}: {}", organization.as_deref().unwrap_or("<no organization>"));
        let entry = RegistryOwnership { ip: ip.to_string(), organization: organization.clone(), resolved_at: now };
        if let Err(e) = self.cache.put(&entry) {
            log::warn!("ownership cache write for {ip} failed: {e}");
        }
        OwnershipResult::found(organization, OwnershipSource::Live)
    }
}

impl OwnershipLookup for RdapResolver<'_> {
    fn resolve(&self, ip: &str) -> OwnershipResult {
        let ip = ip.trim();
        let Ok(addr) = ip.parse::<Ipv4Addr>() else {
            return OwnershipResult::failed(RegistryError::InvalidAddress(ip.to_string()).to_string());
        };

        if is_reserved(addr) {
            return OwnershipResult::none();
        }
        if let Some(org) = self.static_ranges.lookup(addr) {
            return OwnershipResult::found(Some(org.to_string()), OwnershipSource::Static);
        }

        let now = (self.clock)();
        if let Some(entry) = self.cached(ip, now) {
            return OwnershipResult::found(entry.organization, OwnershipSource::Cache);
        }

        match &self.client {
            Some(client) => self.lookup_live(client, ip, now),
            None => OwnershipResult::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use chrono::TimeZone;
    use httpmock::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 6, 0, 0).unwrap()
    }

    fn config(server: &MockServer) -> RegistryConfig {
        RegistryConfig {
            base_url: server.base_url(),
            backoff_base_ms: 1,
            throttle_ms: 0,
            ..circuitmap_recon::ReconConfig::default_config().registry
        }
    }

    fn comcast_doc() -> serde_json::Value {
        serde_json::json!({
            "name": "COMCAST-16",
            "entities": [{
                "vcardArray": ["vcard", [
                    ["fn", {}, "text", "Comcast Cable Communications, LLC"],
                    ["kind", {}, "text", "org"]
                ]]
            }]
        })
    }

    #[test]
    fn private_address_never_calls_out() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET);
            then.status(200).json_body(comcast_doc());
        });
        let cache = MemoryCache::new();
        let resolver = RdapResolver::new(&config(&server), &cache).unwrap();

        let result = resolver.resolve("10.1.2.3");
        mock.assert_calls(0);
        assert_eq!(result, OwnershipResult::none());
        assert!(cache.is_empty());
    }

    #[test]
    fn live_lookup_then_cache() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/ip/96.81.183.205");
            then.status(200).json_body(comcast_doc());
        });
        let cache = MemoryCache::new();
        let resolver = RdapResolver::new(&config(&server), &cache).unwrap().with_clock(t0);

        let first = resolver.resolve("96.81.183.205");
        assert_eq!(first.source, OwnershipSource::Live);
        assert_eq!(first.organization.as_deref(), Some("Comcast"));

        let second = resolver.resolve("96.81.183.205");
        assert_eq!(second.source, OwnershipSource::Cache);
        assert_eq!(second.organization.as_deref(), Some("Comcast"));
        mock.assert_calls(1);
    }

    #[test]
    fn stale_cache_is_refreshed() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/ip/96.81.183.205");
            then.status(200).json_body(comcast_doc());
        });
        let cache = MemoryCache::new();
        cache
            .put(&RegistryOwnership {
                ip: "96.81.183.205".into(),
                organization: Some("Old Name".into()),
                resolved_at: t0() - Duration::hours(25),
            })
            .unwrap();
        let resolver = RdapResolver::new(&config(&server), &cache).unwrap().with_clock(t0);

        let result = resolver.resolve("96.81.183.205");
        mock.assert_calls(1);
        assert_eq!(result.source, OwnershipSource::Live);
        assert_eq!(cache.get("96.81.183.205").unwrap().unwrap().resolved_at, t0());
    }

    #[test]
    fn exhausted_retries_degrade_to_none() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/ip/8.8.8.8");
            then.status(500);
        });
        let cache = MemoryCache::new();
        let resolver = RdapResolver::new(&config(&server), &cache).unwrap();

        let result = resolver.resolve("8.8.8.8");
        mock.assert_calls(4);
        assert_eq!(result.organization, None);
        assert_eq!(result.source, OwnershipSource::None);
        assert!(result.error.as_deref().unwrap_or_default().contains("500"));
        assert!(cache.is_empty());
    }

    #[test]
    fn static_range_short_circuits() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET);
            then.status(500);
        });
        let cache = MemoryCache::new();
        let resolver = RdapResolver::new(&config(&server), &cache).unwrap();

        let result = resolver.resolve("166.80.1.2");
        mock.assert_calls(0);
        assert_eq!(result.source, OwnershipSource::Static);
        assert_eq!(result.organization.as_deref(), Some("Verizon Business"));
    }

    #[test]
    fn invalid_address_is_an_error_value() {
        let cache = MemoryCache::new();
        let resolver = RdapResolver::offline(&RegistryConfig::default(), &cache).unwrap();
        let result = resolver.resolve("not-an-ip");
        assert_eq!(result.source, OwnershipSource::None);
        assert!(result.error.is_some());
    }

    #[test]
    fn offline_uses_stale_cache_only() {
        let cache = MemoryCache::new();
        cache
            .put(&RegistryOwnership {
                ip: "8.8.8.8".into(),
                organization: Some("Google LLC".into()),
                resolved_at: t0() - Duration::days(30),
            })
            .unwrap();
        let resolver = RdapResolver::offline(&RegistryConfig::default(), &cache).unwrap().with_clock(t0);
        assert!(resolver.is_offline());
        assert_eq!(resolver.resolve("8.8.8.8").source, OwnershipSource::Cache);
        assert_eq!(resolver.resolve("1.1.1.1"), OwnershipResult::none());
    }
}

//! Server name/IP resolution with a shared bidirectional cache.
//!
//! The cache is an explicit service: create one per process (or per test)
//! and hand it to every stream. Entries are keyed both ways, so a lookup in
//! either direction populates the reverse mapping too. Each key owns a
//! once-cell, so concurrent misses on the same key share a single lookup.
//! A failed lookup is remembered and never retried.

use std::net::IpAddr;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::debug;

/// Name service used on cache misses.
pub trait HostLookup: Send + Sync {
    fn ip_to_name(&self, ip: &str) -> Option<String>;
    fn name_to_ip(&self, name: &str) -> Option<String>;
    fn local_host(&self) -> (Option<String>, Option<String>);
}

/// System resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsLookup;

impl HostLookup for DnsLookup {
    fn ip_to_name(&self, ip: &str) -> Option<String> {
        let addr: IpAddr = ip.trim().parse().ok()?;
        dns_lookup::lookup_addr(&addr).ok()
    }

    fn name_to_ip(&self, name: &str) -> Option<String> {
        dns_lookup::lookup_host(name.trim())
            .ok()?
            .into_iter()
            .find(|a| a.is_ipv4())
            .map(|a| a.to_string())
    }

    fn local_host(&self) -> (Option<String>, Option<String>) {
        let name = dns_lookup::get_hostname().ok();
        let ip = name.as_deref().and_then(|n| self.name_to_ip(n));
        (name, ip)
    }
}

/// `None` marks a key that failed to resolve.
type Entry = Arc<OnceLock<Option<String>>>;

pub struct HostCache {
    entries: DashMap<String, Entry>,
    local: OnceLock<(Option<String>, Option<String>)>,
    lookup: Box<dyn HostLookup>,
}

impl HostCache {
    pub fn new(lookup: Box<dyn HostLookup>) -> Self {
        Self {
            entries: DashMap::new(),
            local: OnceLock::new(),
            lookup,
        }
    }

    /// Shared cache backed by the system resolver.
    pub fn system() -> Arc<Self> {
        Arc::new(Self::new(Box::new(DnsLookup)))
    }

    /// Host name for `ip`, or `None` when it cannot be resolved.
    pub fn name_for_ip(&self, ip: &str) -> Option<String> {
        self.resolve(ip, |key| self.lookup.ip_to_name(key))
    }

    /// IP address for `name`, or `None` when it cannot be resolved.
    pub fn ip_for_name(&self, name: &str) -> Option<String> {
        self.resolve(name, |key| self.lookup.name_to_ip(key))
    }

    /// Local host name and IP, looked up once.
    pub fn local_host(&self) -> (Option<String>, Option<String>) {
        self.local.get_or_init(|| self.lookup.local_host()).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn resolve<F>(&self, key: &str, lookup: F) -> Option<String>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        // clone the cell out so the shard lock is not held during the lookup
        let cell = Arc::clone(&self.entries.entry(key.to_string()).or_default());
        cell.get_or_init(|| match lookup(key).filter(|v| !v.is_empty()) {
            Some(found) => {
                self.entries
                    .entry(found.clone())
                    .or_insert_with(|| Arc::new(OnceLock::from(Some(key.to_string()))));
                Some(found)
            }
            None => {
                debug!("Host '{}' could not be resolved", key);
                None
            }
        })
        .clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed host table that counts lookups.
    #[derive(Default)]
    pub(crate) struct CountingLookup {
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl HostLookup for CountingLookup {
        fn ip_to_name(&self, ip: &str) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (ip == "10.0.0.1").then(|| "db01".to_string())
        }

        fn name_to_ip(&self, name: &str) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (name == "db01").then(|| "10.0.0.1".to_string())
        }

        fn local_host(&self) -> (Option<String>, Option<String>) {
            (Some("localhost".to_string()), Some("127.0.0.1".to_string()))
        }
    }

    #[test]
    fn test_resolution_is_cached_both_ways() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = HostCache::new(Box::new(CountingLookup { calls: calls.clone() }));

        assert_eq!(cache.name_for_ip("10.0.0.1").as_deref(), Some("db01"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.name_for_ip("10.0.0.1").as_deref(), Some("db01"));
        assert_eq!(cache.ip_for_name("db01").as_deref(), Some("10.0.0.1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_lookup_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = HostCache::new(Box::new(CountingLookup { calls: calls.clone() }));

        assert_eq!(cache.name_for_ip("192.168.9.9"), None);
        assert_eq!(cache.name_for_ip("192.168.9.9"), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_misses_share_one_lookup() {
        struct SlowLookup {
            calls: Arc<AtomicUsize>,
        }

        impl HostLookup for SlowLookup {
            fn ip_to_name(&self, _ip: &str) -> Option<String> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(50));
                Some("app07".to_string())
            }

            fn name_to_ip(&self, _name: &str) -> Option<String> {
                None
            }

            fn local_host(&self) -> (Option<String>, Option<String>) {
                (None, None)
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(HostCache::new(Box::new(SlowLookup { calls: calls.clone() })));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.name_for_ip("10.1.1.7"))
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join().unwrap().as_deref(), Some("app07"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.ip_for_name("app07").as_deref(), Some("10.1.1.7"));
    }
}

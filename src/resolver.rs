//! External name resolution used to flatten ALIAS targets.

use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

use crate::error::{Error, ResolveFailure};

/// Hostname to IPv4 address lookup.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve `host` to its A record addresses.
    ///
    /// A missing name and an unreachable upstream are distinct failures.
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, ResolveFailure>;
}

/// Resolver backed by hickory's tokio resolver.
pub struct HickoryNameResolver {
    resolver: TokioResolver,
}

impl HickoryNameResolver {
    /// Build from the host's resolv.conf.
    pub fn from_system_conf() -> Result<Self, Error> {
        let resolver = TokioResolver::builder_tokio()
            .map_err(|e| Error::Resolver(e.to_string()))?
            .build();
        Ok(Self { resolver })
    }

    /// Build from an explicit upstream configuration.
    pub fn with_config(config: ResolverConfig) -> Self {
        let resolver =
            TokioResolver::builder_with_config(config, TokioConnectionProvider::default()).build();
        Self { resolver }
    }
}

#[async_trait]
impl NameResolver for HickoryNameResolver {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, ResolveFailure> {
        match self.resolver.ipv4_lookup(host).await {
            Ok(lookup) => {
                let addresses: Vec<Ipv4Addr> = lookup.iter().map(|a| a.0).collect();
                trace!(host, count = addresses.len(), "resolved");
                Ok(addresses)
            }
            Err(e) if e.is_nx_domain() || e.is_no_records_found() => {
                Err(ResolveFailure::NotFound(host.to_string()))
            }
            Err(e) => Err(ResolveFailure::Transport(e.to_string())),
        }
    }
}

/// Resolver with fixed answers, for tests and dry runs.
///
/// Unknown hosts fail with [`ResolveFailure::NotFound`].
#[derive(Debug, Default)]
pub struct StaticResolver {
    answers: RwLock<HashMap<String, Result<Vec<Ipv4Addr>, ResolveFailure>>>,
    lookups: AtomicUsize,
}

impl StaticResolver {
    /// Empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `host` with `addresses`.
    pub fn set(&self, host: &str, addresses: &[Ipv4Addr]) {
        self.answers
            .write()
            .insert(normalize(host), Ok(addresses.to_vec()));
    }

    /// Answer `host` with a failure.
    pub fn fail(&self, host: &str, failure: ResolveFailure) {
        self.answers.write().insert(normalize(host), Err(failure));
    }

    /// Number of lookups served.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

fn normalize(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, ResolveFailure> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.answers
            .read()
            .get(&normalize(host))
            .cloned()
            .unwrap_or_else(|| Err(ResolveFailure::NotFound(host.to_string())))
    }
}

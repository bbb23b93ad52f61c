//! The capability every key lookup strategy shares, and an explicit registry of them.
//!
//! The registry only orders strategies. Running them and weighing their
//! results is left to the caller.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;
use crate::keydata::KeyData;
use crate::keyring::ImportResult;

/// Keys found by one discovery, by fingerprint. Empty if nothing was published.
pub type LookupResult = BTreeMap<String, KeyData>;

/// Static declarations an orchestrator uses to order and weight strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupInfo {
    /// Display name.
    pub name: String,
    /// Lower runs earlier.
    pub priority: u32,
    /// Confidence in keys found by this strategy.
    pub score: i32,
    /// Why [`Self::score`] is what it is.
    pub score_reason: String,
    /// Traffic may be routed over an anonymizing transport such as Tor.
    pub privacy_safe: bool,
    /// Bound on a single discovery round trip.
    pub timeout: Duration,
}

/// A way of finding keys for an email address.
#[async_trait]
pub trait KeyLookup: Debug + Send + Sync {
    /// Static declarations for this strategy.
    fn info(&self) -> &LookupInfo;

    /// Look for keys published for `address`.
    async fn discover(&self, address: &str) -> Result<LookupResult>;

    /// Import a key previously returned by [`Self::discover`] on this instance.
    async fn materialize(&self, key: &KeyData) -> Result<ImportResult>;
}

/// Builds a [`LookupRegistry`].
#[derive(Debug, Default, Clone)]
#[must_use]
pub struct LookupRegistryBuilder {
    strategies: Vec<Arc<dyn KeyLookup>>,
}

impl LookupRegistryBuilder {
    /// Add a strategy.
    pub fn register(&mut self, strategy: Arc<dyn KeyLookup>) -> &mut Self {
        self.strategies.push(strategy);
        self
    }

    /// Order by priority. Equal priorities keep registration order.
    pub fn build(&self) -> LookupRegistry {
        let mut strategies = self.strategies.clone();
        strategies.sort_by_key(|s| s.info().priority);
        LookupRegistry { strategies }
    }
}

/// Lookup strategies in the order they should be tried.
#[derive(Debug, Default, Clone)]
pub struct LookupRegistry {
    strategies: Vec<Arc<dyn KeyLookup>>,
}

impl LookupRegistry {
    pub fn builder() -> LookupRegistryBuilder {
        LookupRegistryBuilder::default()
    }

    /// All strategies, lowest priority value first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn KeyLookup>> {
        self.strategies.iter()
    }

    /// Only strategies whose traffic may go over an anonymizing transport.
    pub fn privacy_safe(&self) -> impl Iterator<Item = &Arc<dyn KeyLookup>> {
        self.strategies.iter().filter(|s| s.info().privacy_safe)
    }

    /// Strategy registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn KeyLookup>> {
        self.strategies.iter().find(|s| s.info().name == name)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

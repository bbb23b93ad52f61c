//! Web Key Directory lookup strategy.
//!
//! Discovery derives the "advanced" WKD URL for an address, fetches it once,
//! and caches the raw bytes of the key it finds. Materialization later hands
//! those bytes to the keyring importer, exactly once per discovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::address::{Address, DiscoveryUrl};
use crate::cache::KeyCache;
use crate::errors::{Error, Result};
use crate::fetcher::{FetchError, FetchRequest, Fetcher};
use crate::keydata::{KeyData, KeyDataError, KeyDataParser};
use crate::keyring::{ImportResult, KeyringImporter};
use crate::strategy::{KeyLookup, LookupInfo, LookupResult};

/// Display name of this strategy.
pub const NAME: &str = "Web Key Directory";
/// WKD is tried before keyservers and DNS based lookups.
pub const PRIORITY: u32 = 50;
/// Confidence in a key served by the address's own domain.
pub const SCORE: i32 = 5;
/// Reason given alongside [`SCORE`].
pub const SCORE_REASON: &str = "Found key in Web Key Directory";
/// Bound on the single fetch a discovery performs.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for creating a [`WkdLookupHandler`].
#[derive(Debug, Clone)]
pub struct WkdSettings {
    pub(crate) timeout: Duration,
    pub(crate) connect_errors_as_not_found: bool,
}

impl Default for WkdSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_errors_as_not_found: false,
        }
    }
}

impl WkdSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fetch timeout.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Treat every failed connection (DNS, refused, unreachable) like an
    /// unpublished key instead of a transport error.
    pub fn connect_errors_as_not_found(&mut self, enabled: bool) -> &mut Self {
        self.connect_errors_as_not_found = enabled;
        self
    }
}

/// What a single WKD fetch amounted to, once expected failures are folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Nothing is published for this address.
    NotFound,
    /// The domain served this body.
    Found(Vec<u8>),
}

impl FetchOutcome {
    /// Fold a raw fetch result into an outcome.
    ///
    /// HTTP 404 and TLS rejections mean the domain does not run WKD; most
    /// domains don't, so both are ordinary "not found". Anything else is
    /// returned as an error.
    pub fn classify(
        fetched: std::result::Result<Vec<u8>, FetchError>,
        settings: &WkdSettings,
    ) -> std::result::Result<Self, FetchError> {
        match fetched {
            Ok(body) => Ok(FetchOutcome::Found(body)),
            Err(FetchError::Status(404)) | Err(FetchError::Tls(_)) => Ok(FetchOutcome::NotFound),
            Err(FetchError::Connect(_)) if settings.connect_errors_as_not_found => {
                Ok(FetchOutcome::NotFound)
            }
            Err(e) => Err(e),
        }
    }
}

/// Discovers keys through the Web Key Directory of the address's domain.
#[derive(Debug)]
pub struct WkdLookupHandler {
    info: LookupInfo,
    settings: WkdSettings,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn KeyDataParser>,
    importer: Arc<dyn KeyringImporter>,
    cache: KeyCache,
}

impl WkdLookupHandler {
    /// Creates a handler with default settings.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn KeyDataParser>,
        importer: Arc<dyn KeyringImporter>,
    ) -> Self {
        Self::new_with_settings(fetcher, parser, importer, WkdSettings::default())
    }

    pub fn new_with_settings(
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn KeyDataParser>,
        importer: Arc<dyn KeyringImporter>,
        settings: WkdSettings,
    ) -> Self {
        let info = LookupInfo {
            name: NAME.to_owned(),
            priority: PRIORITY,
            score: SCORE,
            score_reason: SCORE_REASON.to_owned(),
            privacy_safe: true,
            timeout: settings.timeout,
        };
        Self {
            info,
            settings,
            fetcher,
            parser,
            importer,
            cache: KeyCache::new(),
        }
    }

    /// The URL a discovery for `address` fetches.
    pub fn discovery_url(address: &str) -> DiscoveryUrl {
        Address::parse(address).discovery_url()
    }

    /// Look up the key published for `address`.
    ///
    /// Returns an empty map if the domain publishes nothing. On success the
    /// map has exactly one entry and its raw bytes are kept for
    /// [`Self::materialize`].
    pub async fn discover(&self, address: &str) -> Result<LookupResult> {
        let url = Self::discovery_url(address);
        tracing::debug!("WKD lookup for {address} at {url}");

        let request = FetchRequest {
            url: url.into(),
            timeout: self.settings.timeout,
            privacy_safe: self.info.privacy_safe,
        };
        let fetched = self.fetcher.fetch(&request).await;

        let body = match FetchOutcome::classify(fetched, &self.settings) {
            Ok(FetchOutcome::Found(body)) => body,
            Ok(FetchOutcome::NotFound) => {
                tracing::debug!("No WKD key published for {address}");
                return Ok(LookupResult::new());
            }
            Err(e) => {
                tracing::warn!("WKD lookup for {address} failed: {e}");
                return Err(e.into());
            }
        };

        let key = self
            .parser
            .parse(&body)?
            .into_iter()
            .next()
            .ok_or(KeyDataError::NoKeys)?;

        tracing::info!("Found WKD key {} for {address}", key.fingerprint);
        self.cache.insert(key.fingerprint.clone(), body);

        let mut result = LookupResult::new();
        result.insert(key.fingerprint.clone(), key);
        Ok(result)
    }

    /// Import the key behind `key`, consuming what [`Self::discover`] cached.
    ///
    /// Fails with [`Error::KeyNotCached`] if `key` was not discovered by this
    /// handler or was already materialized.
    pub async fn materialize(&self, key: &KeyData) -> Result<ImportResult> {
        let data = self
            .cache
            .take(&key.fingerprint)
            .ok_or_else(|| Error::KeyNotCached {
                fingerprint: key.fingerprint.clone(),
            })?;

        Ok(self.importer.import(data).await?)
    }

    /// Fingerprints discovered and not yet materialized.
    pub fn cached_fingerprints(&self) -> Vec<String> {
        self.cache.fingerprints()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl KeyLookup for WkdLookupHandler {
    fn info(&self) -> &LookupInfo {
        &self.info
    }

    async fn discover(&self, address: &str) -> Result<LookupResult> {
        WkdLookupHandler::discover(self, address).await
    }

    async fn materialize(&self, key: &KeyData) -> Result<ImportResult> {
        WkdLookupHandler::materialize(self, key).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::keydata::tests::{alice_key, ALICE_FINGERPRINT};
    use crate::keydata::OpenPgpParser;
    use crate::keyring::{KeyringError, MemoryKeyring};

    const ALICE_URL: &str =
        "https://example.org/.well-known/openpgpkey/hu/kei1q4tipxxu1yj79k9kfukdhfy631xe";

    #[derive(Debug, Default)]
    struct ScriptedFetcher {
        responses: Mutex<HashMap<String, std::result::Result<Vec<u8>, FetchError>>>,
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl ScriptedFetcher {
        fn with(url: &str, response: std::result::Result<Vec<u8>, FetchError>) -> Arc<Self> {
            let fetcher = Self::default();
            fetcher
                .responses
                .lock()
                .unwrap()
                .insert(url.to_owned(), response);
            Arc::new(fetcher)
        }

        fn requests(&self) -> Vec<FetchRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            request: &FetchRequest,
        ) -> std::result::Result<Vec<u8>, FetchError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .get(&request.url)
                .cloned()
                .unwrap_or(Err(FetchError::Status(404)))
        }
    }

    #[derive(Debug)]
    struct EmptyParser;

    impl KeyDataParser for EmptyParser {
        fn parse(&self, _data: &[u8]) -> std::result::Result<Vec<KeyData>, KeyDataError> {
            Ok(Vec::new())
        }
    }

    #[derive(Debug)]
    struct BrokenKeyring;

    #[async_trait]
    impl KeyringImporter for BrokenKeyring {
        async fn import(&self, _data: Vec<u8>) -> std::result::Result<ImportResult, KeyringError> {
            Err(KeyringError::Gpg {
                code: Some(2),
                stderr: "keyring locked".into(),
            })
        }
    }

    fn handler(fetcher: Arc<ScriptedFetcher>) -> (WkdLookupHandler, Arc<MemoryKeyring>) {
        let keyring = Arc::new(MemoryKeyring::new());
        let importer = Arc::clone(&keyring);
        let handler = WkdLookupHandler::new(fetcher, Arc::new(OpenPgpParser), importer);
        (handler, keyring)
    }

    #[tokio::test]
    async fn request_is_derived_from_address() {
        let fetcher = ScriptedFetcher::with(ALICE_URL, Ok(alice_key()));
        let (handler, _) = handler(Arc::clone(&fetcher));

        handler.discover("Alice@example.org").await.unwrap();

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, ALICE_URL);
        assert_eq!(requests[0].timeout, Duration::from_secs(10));
        assert!(requests[0].privacy_safe);
    }

    #[tokio::test]
    async fn http_404_is_empty_result() {
        let fetcher = ScriptedFetcher::with(ALICE_URL, Err(FetchError::Status(404)));
        let (handler, _) = handler(fetcher);

        let result = handler.discover("alice@example.org").await.unwrap();
        assert!(result.is_empty());
        assert_eq!(handler.cached_len(), 0);
    }

    #[tokio::test]
    async fn tls_failure_is_empty_result() {
        let fetcher = ScriptedFetcher::with(
            ALICE_URL,
            Err(FetchError::Tls("invalid peer certificate: NotValidForName".into())),
        );
        let (handler, _) = handler(fetcher);

        let result = handler.discover("alice@example.org").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn other_failures_are_transport_errors() {
        for failure in [
            FetchError::Status(500),
            FetchError::Status(403),
            FetchError::Timeout,
            FetchError::Connect("dns error".into()),
            FetchError::ProxyRequired,
        ] {
            let fetcher = ScriptedFetcher::with(ALICE_URL, Err(failure.clone()));
            let (handler, _) = handler(fetcher);

            let err = handler.discover("alice@example.org").await.unwrap_err();
            assert!(err.is_transport(), "{failure:?} gave {err:?}");
            assert!(matches!(err, Error::Transport(ref e) if *e == failure));
        }
    }

    #[tokio::test]
    async fn connect_errors_can_be_not_found() {
        let fetcher = ScriptedFetcher::with(ALICE_URL, Err(FetchError::Connect("refused".into())));
        let mut settings = WkdSettings::new();
        settings.connect_errors_as_not_found(true);
        let handler = WkdLookupHandler::new_with_settings(
            fetcher,
            Arc::new(OpenPgpParser),
            Arc::new(MemoryKeyring::new()),
            settings,
        );

        assert!(handler.discover("alice@example.org").await.unwrap().is_empty());
    }

    #[test]
    fn classify_outcomes() {
        let settings = WkdSettings::default();
        assert_eq!(
            FetchOutcome::classify(Ok(vec![1]), &settings),
            Ok(FetchOutcome::Found(vec![1]))
        );
        assert_eq!(
            FetchOutcome::classify(Err(FetchError::Status(404)), &settings),
            Ok(FetchOutcome::NotFound)
        );
        assert_eq!(
            FetchOutcome::classify(Err(FetchError::Status(410)), &settings),
            Err(FetchError::Status(410))
        );
    }

    #[tokio::test]
    async fn invalid_body_is_parse_error() {
        let fetcher = ScriptedFetcher::with(ALICE_URL, Ok(b"<html>hello</html>".to_vec()));
        let (handler, _) = handler(fetcher);

        let err = handler.discover("alice@example.org").await.unwrap_err();
        assert!(err.is_parse());
        assert_eq!(handler.cached_len(), 0);
    }

    #[tokio::test]
    async fn parser_returning_no_keys_is_parse_error() {
        let fetcher = ScriptedFetcher::with(ALICE_URL, Ok(alice_key()));
        let handler = WkdLookupHandler::new(
            fetcher,
            Arc::new(EmptyParser),
            Arc::new(MemoryKeyring::new()),
        );

        let err = handler.discover("alice@example.org").await.unwrap_err();
        assert!(matches!(err, Error::Parse(KeyDataError::NoKeys)));
    }

    #[tokio::test]
    async fn discover_then_materialize_once() {
        let fetcher = ScriptedFetcher::with(ALICE_URL, Ok(alice_key()));
        let (handler, keyring) = handler(fetcher);

        let result = handler.discover("alice@example.org").await.unwrap();
        assert_eq!(result.len(), 1);
        let key = &result[ALICE_FINGERPRINT];
        assert_eq!(key.fingerprint, ALICE_FINGERPRINT);
        assert_eq!(handler.cached_fingerprints(), vec![ALICE_FINGERPRINT.to_string()]);

        let imported = handler.materialize(key).await.unwrap();
        assert_eq!(imported.imported, vec![ALICE_FINGERPRINT.to_string()]);
        assert_eq!(keyring.get(ALICE_FINGERPRINT), Some(alice_key()));
        assert_eq!(handler.cached_len(), 0);

        let err = handler.materialize(key).await.unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn materialize_unknown_key_fails() {
        let (handler, _) = handler(Arc::new(ScriptedFetcher::default()));
        let key = OpenPgpParser.parse(&alice_key()).unwrap().remove(0);

        let err = handler.materialize(&key).await.unwrap_err();
        assert!(
            matches!(err, Error::KeyNotCached { ref fingerprint } if fingerprint == ALICE_FINGERPRINT)
        );
    }

    #[tokio::test]
    async fn importer_errors_propagate() {
        let fetcher = ScriptedFetcher::with(ALICE_URL, Ok(alice_key()));
        let handler =
            WkdLookupHandler::new(fetcher, Arc::new(OpenPgpParser), Arc::new(BrokenKeyring));

        let result = handler.discover("alice@example.org").await.unwrap();
        let err = handler
            .materialize(&result[ALICE_FINGERPRINT])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Keyring(KeyringError::Gpg { code: Some(2), .. })));
    }

    #[tokio::test]
    async fn concurrent_materialize_delivers_once() {
        let fetcher = ScriptedFetcher::with(ALICE_URL, Ok(alice_key()));
        let (handler, _) = handler(fetcher);
        let handler = Arc::new(handler);

        let result = handler.discover("alice@example.org").await.unwrap();
        let key = result[ALICE_FINGERPRINT].clone();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let handler = Arc::clone(&handler);
                let key = key.clone();
                tokio::spawn(async move { handler.materialize(&key).await })
            })
            .collect();

        let mut successes = 0;
        let mut contract_errors = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) if e.is_contract_violation() => contract_errors += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(contract_errors, 15);
    }

    #[tokio::test]
    async fn each_discovery_is_fresh() {
        let fetcher = ScriptedFetcher::with(ALICE_URL, Ok(alice_key()));
        let (handler, _) = handler(fetcher);

        assert_eq!(handler.discover("alice@example.org").await.unwrap().len(), 1);
        assert!(handler.discover("bob@example.org").await.unwrap().is_empty());
        assert_eq!(handler.cached_len(), 1);
    }

    #[test]
    fn static_declarations() {
        let (handler, _) = handler(Arc::new(ScriptedFetcher::default()));
        let info = KeyLookup::info(&handler);
        assert_eq!(info.name, "Web Key Directory");
        assert_eq!(info.priority, 50);
        assert_eq!(info.score, 5);
        assert_eq!(info.score_reason, "Found key in Web Key Directory");
        assert!(info.privacy_safe);
        assert_eq!(info.timeout, Duration::from_secs(10));
    }
}

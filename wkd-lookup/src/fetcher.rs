//! Network fetcher used by lookups, and its reqwest implementation.

use std::error::Error as StdError;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

const DEFAULT_USER_AGENT: &str = concat!("wkd-lookup", "@", env!("CARGO_PKG_VERSION"),);

/// A single GET the lookup wants performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Absolute URL to fetch.
    pub url: String,
    /// Upper bound on the whole round trip, body included.
    pub timeout: Duration,
    /// Whether this request may be routed over an anonymizing proxy.
    pub privacy_safe: bool,
}

impl FetchRequest {
    /// A privacy-safe GET of `url` bounded by `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            privacy_safe: true,
        }
    }
}

/// Transport level failures of a fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("server responded with HTTP {0}")]
    Status(u16),

    /// TLS handshake or certificate validation failed.
    #[error("TLS validation failed: {0}")]
    Tls(String),

    /// Could not connect (DNS failure, refused, unreachable).
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// The transport policy demands a proxy that is not available for this request.
    #[error("an anonymizing proxy is required but not usable for this request")]
    ProxyRequired,

    /// Any other transport failure, including malformed URLs.
    #[error("HTTP transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Returns true for HTTP 404.
    pub fn is_not_found_status(&self) -> bool {
        matches!(self, FetchError::Status(404))
    }

    /// Returns true if TLS validation failed.
    pub fn is_tls(&self) -> bool {
        matches!(self, FetchError::Tls(_))
    }

    /// Returns true if the connection could not be established.
    pub fn is_connect(&self) -> bool {
        matches!(self, FetchError::Connect(_))
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        let err = err.without_url();
        let message = error_chain(&err);
        if err.is_timeout() {
            FetchError::Timeout
        } else if is_tls_failure(&err) {
            FetchError::Tls(message)
        } else if err.is_connect() {
            FetchError::Connect(message)
        } else {
            FetchError::Transport(message)
        }
    }
}

/// Performs GET requests for lookups.
///
/// The fetcher owns transport selection. Lookups only declare whether a
/// request is privacy-safe.
#[async_trait]
pub trait Fetcher: Debug + Send + Sync {
    /// Fetch the body of `request.url`. Non-2xx statuses are errors.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError>;
}

/// Configures an [`HttpFetcher`] before construction.
///
/// # Defaults
/// - No proxy, proxy not required.
/// - User-agent: `wkd-lookup@<crate-version>` plus any [`Self::user_agent_extra`]
///
/// # Example
/// ```no_run
/// # use wkd_lookup::HttpFetcher;
/// let fetcher = HttpFetcher::builder()
///     .proxy("socks5h://127.0.0.1:9050".parse().unwrap())
///     .require_proxy(true)
///     .build()?;
/// # Ok::<_, wkd_lookup::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct HttpFetcherBuilder {
    user_agent_extra: Option<String>,
    proxy: Option<Url>,
    require_proxy: bool,
}

impl HttpFetcherBuilder {
    /// Append an extra user-agent segment after the default `wkd-lookup@<version>`.
    pub fn user_agent_extra<S: Into<String>>(&mut self, extra: S) -> &mut Self {
        self.user_agent_extra = Some(extra.into());
        self
    }

    /// Route privacy-safe requests through this proxy, e.g. `socks5h://127.0.0.1:9050` for Tor.
    pub fn proxy(&mut self, proxy: Url) -> &mut Self {
        self.proxy = Some(proxy);
        self
    }

    /// Refuse any request that cannot go through the proxy.
    pub fn require_proxy(&mut self, require: bool) -> &mut Self {
        self.require_proxy = require;
        self
    }

    /// Build [`HttpFetcher`]
    pub fn build(&self) -> crate::Result<HttpFetcher> {
        let user_agent = match &self.user_agent_extra {
            Some(extra) if !extra.trim().is_empty() => {
                format!("{DEFAULT_USER_AGENT} {}", extra.trim())
            }
            _ => DEFAULT_USER_AGENT.to_owned(),
        };

        let direct = reqwest::Client::builder()
            .user_agent(user_agent.as_str())
            .build()?;

        let proxied = match &self.proxy {
            Some(proxy) => Some(
                reqwest::Client::builder()
                    .user_agent(user_agent.as_str())
                    .proxy(reqwest::Proxy::all(proxy.as_str())?)
                    .build()?,
            ),
            None => None,
        };

        Ok(HttpFetcher {
            direct,
            proxied,
            require_proxy: self.require_proxy,
        })
    }
}

/// [`Fetcher`] backed by reqwest with rustls.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    direct: reqwest::Client,
    proxied: Option<reqwest::Client>,
    require_proxy: bool,
}

impl HttpFetcher {
    /// A fetcher without proxy.
    pub fn new() -> crate::Result<Self> {
        Self::builder().build()
    }

    /// Returns a builder to edit settings before creating [`HttpFetcher`].
    pub fn builder() -> HttpFetcherBuilder {
        HttpFetcherBuilder::default()
    }

    /// Returns true if a proxy is configured.
    pub fn has_proxy(&self) -> bool {
        self.proxied.is_some()
    }

    fn client_for(&self, request: &FetchRequest) -> Result<&reqwest::Client, FetchError> {
        match (&self.proxied, request.privacy_safe) {
            (Some(proxied), true) => Ok(proxied),
            _ if self.require_proxy => Err(FetchError::ProxyRequired),
            _ => Ok(&self.direct),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        let client = self.client_for(request)?;

        let response = client
            .get(request.url.as_str())
            .timeout(request.timeout)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(FetchError::from_reqwest)?;
        Ok(body.to_vec())
    }
}

/// Walks the source chain looking for a [`rustls::Error`], bare or wrapped
/// in the [`std::io::Error`] the TLS stream reports it through.
pub(crate) fn is_tls_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<rustls::Error>() {
            return true;
        }
        // `io::Error::source` skips the error it wraps.
        current = match e.downcast_ref::<std::io::Error>().and_then(std::io::Error::get_ref) {
            Some(inner) => Some(inner as &(dyn StdError + 'static)),
            None => e.source(),
        };
    }
    false
}

/// `outer: inner: innermost`
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        message.push_str(": ");
        message.push_str(&e.to_string());
        current = e.source();
    }
    message
}

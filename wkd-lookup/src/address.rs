//! Email address to WKD discovery URL.

use std::fmt;

use sha1::{Digest, Sha1};

use crate::zbase32;

/// Path prefix of the "advanced" WKD method, after the domain.
pub const WELL_KNOWN_HU_PATH: &str = "/.well-known/openpgpkey/hu/";

/// An email address split at its first `@`.
///
/// No validation happens here. An address without `@` yields an empty
/// domain, and the derived URL will not be fetchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address<'a> {
    local: &'a str,
    domain: &'a str,
}

impl<'a> Address<'a> {
    /// Split `address` into local part and domain.
    pub fn parse(address: &'a str) -> Self {
        let (local, domain) = address.split_once('@').unwrap_or((address, ""));
        Self { local, domain }
    }

    /// Local part as written.
    pub fn local(&self) -> &'a str {
        self.local
    }

    /// Domain as written. It is not case folded.
    pub fn domain(&self) -> &'a str {
        self.domain
    }

    /// SHA-1 of the UTF-8 of the lowercased local part.
    ///
    /// SHA-1 is mandated by the WKD protocol for this URL form; it is not used
    /// for any security property here.
    pub fn local_digest(&self) -> [u8; 20] {
        let lowered = self.local.to_lowercase();
        Sha1::digest(lowered.as_bytes()).into()
    }

    /// z-base-32 of [`Self::local_digest`]. Always 32 symbols.
    pub fn encoded_local(&self) -> String {
        zbase32::encode(&self.local_digest())
    }

    /// The URL at which the domain would publish this address's key.
    pub fn discovery_url(&self) -> DiscoveryUrl {
        DiscoveryUrl(format!(
            "https://{}{WELL_KNOWN_HU_PATH}{}",
            self.domain,
            self.encoded_local()
        ))
    }
}

/// `https://{domain}/.well-known/openpgpkey/hu/{encoded local part}`
///
/// Kept as the literal string so the domain keeps its original case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryUrl(String);

impl DiscoveryUrl {
    /// Returns the URL string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiscoveryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DiscoveryUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<DiscoveryUrl> for String {
    fn from(url: DiscoveryUrl) -> Self {
        url.0
    }
}

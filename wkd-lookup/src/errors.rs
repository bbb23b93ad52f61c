//! Unified error types for the `wkd-lookup` crate.
//!
//! "No key published" is not an error: lookups return an empty result for
//! it. Everything here is a failure the caller may want to act on, for
//! example by trying the next lookup strategy.

use thiserror::Error;

use crate::fetcher::FetchError;
use crate::keydata::KeyDataError;
use crate::keyring::KeyringError;

/// The crate's top-level error type.
///
/// - [`Error::Transport`]: the fetch failed in a way that is not "not found"
/// - [`Error::Parse`]: bytes were served but are not a usable key
/// - [`Error::KeyNotCached`]: materialize was called without a matching discovery
/// - [`Error::Keyring`]: the importer failed
/// - [`Error::Build`]: the HTTP client could not be built
#[derive(Debug, Error)]
pub enum Error {
    /// Network failure other than TLS rejection or HTTP 404.
    #[error("Lookup transport failed: {0}")]
    Transport(#[from] FetchError),

    /// The domain served something, but it is not an OpenPGP key.
    #[error("Fetched key data is invalid: {0}")]
    Parse(#[from] KeyDataError),

    /// No discovered key material for this fingerprint, or it was already consumed.
    #[error("Key not found: no cached key material for {fingerprint}")]
    KeyNotCached {
        /// Fingerprint that was asked for.
        fingerprint: String,
    },

    /// Importing into the keyring failed.
    #[error("Keyring import failed: {0}")]
    Keyring(#[from] KeyringError),

    /// Building the HTTP client failed (reqwest configuration).
    #[error("Failed to build the HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

impl Error {
    /// Returns true for network failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Returns true if fetched bytes could not be parsed.
    pub fn is_parse(&self) -> bool {
        matches!(self, Error::Parse(_))
    }

    /// Returns true if materialize was misused.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::KeyNotCached { .. })
    }
}

/// A specialized `Result` type for `wkd-lookup` operations.
pub type Result<T> = std::result::Result<T, Error>;

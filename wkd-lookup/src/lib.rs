#![doc = include_str!("../README.md")]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(any(), deny(clippy::unwrap_used))]

pub mod address;
pub mod cache;
pub mod config;
pub mod errors;
pub mod fetcher;
pub mod handler;
pub mod keydata;
pub mod keyring;
pub mod strategy;
pub mod zbase32;

// --- PUBLIC API EXPORTS ---
pub use address::{Address, DiscoveryUrl};
pub use config::ConfigToml;
pub use errors::{Error, Result};
pub use fetcher::{FetchError, FetchRequest, Fetcher, HttpFetcher, HttpFetcherBuilder};
pub use handler::{FetchOutcome, WkdLookupHandler, WkdSettings};
pub use keydata::{KeyData, KeyDataError, KeyDataParser, OpenPgpParser};
pub use keyring::{GnupgImporter, ImportResult, KeyringError, KeyringImporter, MemoryKeyring};
pub use strategy::{KeyLookup, LookupInfo, LookupRegistry, LookupRegistryBuilder, LookupResult};

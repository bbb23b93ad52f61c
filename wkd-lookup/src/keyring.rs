//! Keyring importers: where materialized keys end up.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::keydata::{KeyDataError, KeyDataParser, OpenPgpParser};

/// Outcome of importing one key blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportResult {
    /// Fingerprints that were new or changed.
    pub imported: Vec<String>,
    /// Number of keys that were already present unchanged.
    pub unchanged: usize,
}

impl ImportResult {
    /// Total keys processed.
    pub fn count(&self) -> usize {
        self.imported.len() + self.unchanged
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    #[error("failed to run gpg: {0}")]
    Io(#[from] std::io::Error),

    #[error("gpg exited with {code:?}: {stderr}")]
    Gpg { code: Option<i32>, stderr: String },

    #[error("keyring rejected key data: {0}")]
    Rejected(#[from] KeyDataError),
}

/// Imports raw key bytes into a keyring.
#[async_trait]
pub trait KeyringImporter: Debug + Send + Sync {
    async fn import(&self, data: Vec<u8>) -> Result<ImportResult, KeyringError>;
}

/// Imports through the `gpg` command line.
#[derive(Debug, Clone)]
pub struct GnupgImporter {
    binary: PathBuf,
    homedir: Option<PathBuf>,
}

impl Default for GnupgImporter {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("gpg"),
            homedir: None,
        }
    }
}

impl GnupgImporter {
    pub fn new(binary: impl Into<PathBuf>, homedir: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            homedir,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(homedir) = &self.homedir {
            cmd.arg("--homedir").arg(homedir);
        }
        cmd.args(["--batch", "--status-fd", "1", "--import"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl KeyringImporter for GnupgImporter {
    async fn import(&self, data: Vec<u8>) -> Result<ImportResult, KeyringError> {
        let mut child = self.command().spawn()?;
        let mut stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gpg stdin unavailable")
        })?;

        let write = async move {
            stdin.write_all(&data).await?;
            stdin.shutdown().await
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            return Err(KeyringError::Gpg {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        written?;

        let result = parse_import_status(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!(
            "gpg imported {} key(s), {} unchanged",
            result.imported.len(),
            result.unchanged
        );
        Ok(result)
    }
}

/// Reads `[GNUPG:] IMPORT_OK <flags> <fingerprint>` status lines.
fn parse_import_status(status: &str) -> ImportResult {
    let mut result = ImportResult::default();
    for line in status.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("[GNUPG:]") || fields.next() != Some("IMPORT_OK") {
            continue;
        }
        match (fields.next(), fields.next()) {
            (Some("0"), Some(_)) => result.unchanged += 1,
            (Some(_), Some(fingerprint)) => result.imported.push(fingerprint.to_owned()),
            _ => {}
        }
    }
    result
}

/// Keyring held in memory, keyed by fingerprint.
#[derive(Debug, Default)]
pub struct MemoryKeyring {
    keys: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes imported for `fingerprint`.
    pub fn get(&self, fingerprint: &str) -> Option<Vec<u8>> {
        self.lock().get(fingerprint).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        // The map stays consistent even if a holder panicked.
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyringImporter for MemoryKeyring {
    async fn import(&self, data: Vec<u8>) -> Result<ImportResult, KeyringError> {
        let keys = OpenPgpParser.parse(&data)?;
        let mut result = ImportResult::default();
        let mut stored = self.lock();
        for key in keys {
            if stored.get(&key.fingerprint) == Some(&data) {
                result.unchanged += 1;
            } else {
                stored.insert(key.fingerprint.clone(), data.clone());
                result.imported.push(key.fingerprint);
            }
        }
        Ok(result)
    }
}

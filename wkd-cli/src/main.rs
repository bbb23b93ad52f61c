//!
//! Look up OpenPGP keys for email addresses in their domain's Web Key Directory.
//!
//! Run with `cargo run -p wkd-cli -- discover joe.doe@example.org --import`
//!

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use url::Url;
use wkd_lookup::{
    ConfigToml, KeyData, KeyringImporter, MemoryKeyring, OpenPgpParser, WkdLookupHandler,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Web Key Directory lookups.")]
struct Cli {
    /// Config file, layered over the built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Route lookups through this proxy, e.g. socks5h://127.0.0.1:9050
    #[arg(long, global = true)]
    proxy: Option<Url>,

    /// Fetch timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the discovery URL of each address without fetching.
    Url {
        #[arg(required = true)]
        addresses: Vec<String>,
    },
    /// Look up keys and print what was found.
    Discover {
        #[arg(required = true)]
        addresses: Vec<String>,

        /// Import found keys with gpg.
        #[arg(long)]
        import: bool,

        /// Import into a throwaway in-memory keyring instead of gpg.
        #[arg(long, requires = "import")]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Command::Url { addresses } => {
            for address in addresses {
                println!("{}", WkdLookupHandler::discovery_url(&address));
            }
            Ok(())
        }
        Command::Discover {
            addresses,
            import,
            dry_run,
        } => discover(&config, &addresses, import, dry_run).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ConfigToml> {
    let mut config = match &cli.config {
        Some(path) => ConfigToml::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => ConfigToml::default(),
    };

    if let Some(proxy) = &cli.proxy {
        config.fetch.proxy = Some(proxy.clone());
    }
    if let Some(timeout) = cli.timeout {
        config.fetch.timeout_s = timeout
            .try_into()
            .context("--timeout must be at least 1 second")?;
    }
    Ok(config)
}

async fn discover(
    config: &ConfigToml,
    addresses: &[String],
    import: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    let importer: Arc<dyn KeyringImporter> = if dry_run {
        Arc::new(MemoryKeyring::new())
    } else {
        Arc::new(config.gpg_importer())
    };

    let handler = WkdLookupHandler::new_with_settings(
        Arc::new(config.http_fetcher()?),
        Arc::new(OpenPgpParser),
        importer,
        config.wkd_settings(),
    );

    let failures = lookup_all(&handler, addresses, import).await;
    if failures > 0 {
        anyhow::bail!("{failures} of {} addresses failed", addresses.len());
    }
    Ok(())
}

/// Looks up every address, importing what is found if asked to.
/// Returns how many addresses failed to look up or import.
async fn lookup_all(handler: &WkdLookupHandler, addresses: &[String], import: bool) -> usize {
    let mut failures = 0;
    for address in addresses {
        let found = match handler.discover(address).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!("{address}: {e}");
                failures += 1;
                continue;
            }
        };

        if found.is_empty() {
            println!("{address}: no key published");
            continue;
        }

        for key in found.values() {
            print_key(address, key);
            if !import {
                continue;
            }
            match handler.materialize(key).await {
                Ok(result) => println!(
                    "  imported {}, unchanged {}",
                    result.imported.len(),
                    result.unchanged
                ),
                Err(e) => {
                    tracing::error!("{address}: importing {} failed: {e}", key.fingerprint);
                    failures += 1;
                }
            }
        }
    }
    failures
}

fn print_key(address: &str, key: &KeyData) {
    println!("{address}: {}", key.fingerprint);
    println!(
        "  v{} {} created {}",
        key.version,
        key.algorithm_name(),
        key.created
    );
    for user_id in &key.user_ids {
        println!("  uid {user_id}");
    }
    for subkey in &key.subkeys {
        println!("  sub {subkey}");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use wkd_lookup::{FetchError, FetchRequest, Fetcher, ImportResult, KeyringError};

    use super::*;

    const ALICE_KEY_HEX: &str = "c633046553f10016092b06010401da470f01010740000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1fcd19416c696365203c616c696365406578616d706c652e6f72673ec203000000ce38046553f101120a2b060104019755010501010740202122232425262728292a2b2c2d2e2f303132333435363738393a3b3c3d3e3f03010807";

    /// Serves the same key for every URL.
    #[derive(Debug)]
    struct AlwaysAlice;

    #[async_trait]
    impl Fetcher for AlwaysAlice {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
            Ok(hex::decode(ALICE_KEY_HEX).unwrap())
        }
    }

    #[derive(Debug)]
    struct LockedKeyring;

    #[async_trait]
    impl KeyringImporter for LockedKeyring {
        async fn import(&self, _data: Vec<u8>) -> Result<ImportResult, KeyringError> {
            Err(KeyringError::Gpg {
                code: Some(2),
                stderr: "keyring locked".into(),
            })
        }
    }

    #[tokio::test]
    async fn failed_imports_are_counted_and_skipped() {
        let handler = WkdLookupHandler::new(
            Arc::new(AlwaysAlice),
            Arc::new(OpenPgpParser),
            Arc::new(LockedKeyring),
        );
        let addresses = vec!["alice@example.org".to_string(), "bob@example.org".to_string()];

        assert_eq!(lookup_all(&handler, &addresses, true).await, 2);
        assert_eq!(handler.cached_len(), 0);
    }

    #[tokio::test]
    async fn successful_imports_are_not_failures() {
        let handler = WkdLookupHandler::new(
            Arc::new(AlwaysAlice),
            Arc::new(OpenPgpParser),
            Arc::new(MemoryKeyring::new()),
        );
        let addresses = vec!["alice@example.org".to_string()];

        assert_eq!(lookup_all(&handler, &addresses, true).await, 0);
        assert_eq!(lookup_all(&handler, &addresses, false).await, 0);
        assert_eq!(handler.cached_len(), 1);
    }

    #[test]
    fn dry_run_requires_import() {
        assert!(Cli::try_parse_from(["wkd", "discover", "a@b.c", "--dry-run"]).is_err());
        assert!(Cli::try_parse_from(["wkd", "discover", "a@b.c", "--import", "--dry-run"]).is_ok());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "wkd",
            "url",
            "a@b.c",
            "--proxy",
            "socks5h://127.0.0.1:9050",
            "--timeout",
            "3",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.fetch.timeout_s.get(), 3);
        assert_eq!(
            config.fetch.proxy.unwrap().as_str(),
            "socks5h://127.0.0.1:9050"
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cli = Cli::try_parse_from(["wkd", "url", "a@b.c", "--timeout", "0"]).unwrap();
        assert!(load_config(&cli).is_err());
    }
}

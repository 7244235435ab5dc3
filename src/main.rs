//! Command line interface for the nullpoga bot. Runs the HTTP dispatcher,
//! signs replies offline, verifies events, searches relay history and
//! maintains the on-disk relay cache.

mod bot;
mod cache;
mod config;
mod error;
mod event;
mod factory;
mod first_post;
mod memo;
mod relay;
mod server;
mod signer;
mod storage;
mod tags;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use config::Settings;
use relay::WsRelay;
use storage::FileStore;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "nullpoga",
    author,
    version,
    about = "Nostr reply bot",
    short_flag = 'v',
    long_flag = "version"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP dispatcher.
    Serve,
    /// Print the bot's public key as hex and npub.
    Pubkey,
    /// Build and sign a message in response to the event stored in FILE.
    Sign {
        #[arg(value_enum)]
        mode: SignMode,
        /// Content of the reply or note.
        #[arg(long, default_value = "")]
        body: String,
        /// Extra tags as a JSON array of string arrays, e.g. `[["t","nostr"]]`.
        #[arg(long)]
        tags: Option<String>,
        /// JSON file holding the causing event.
        file: String,
    },
    /// Check the id and signature of the event stored in FILE.
    Verify { file: String },
    /// Find the earliest event of an author on the configured relay.
    FirstPost {
        /// Author as hex or `npub1…`.
        pubkey: String,
        #[arg(long, default_value_t = event::KIND_NOTE)]
        kind: u32,
    },
    /// Delete stale relay cache entries.
    Purge {
        /// Delete every entry, fresh or not.
        #[arg(long)]
        all: bool,
    },
}

/// Message shapes `nullpoga sign` can produce.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum SignMode {
    Reply,
    Quiet,
    Note,
    Reaction,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Serve => {
            let keys = signer::Keys::parse(&cfg.secret_key)?;
            let store = FileStore::new(cfg.store_root.clone());
            store.init()?;
            let http_addr: SocketAddr = cfg
                .bind_http
                .as_str()
                .parse()
                .with_context(|| format!("BIND_HTTP {}", cfg.bind_http))?;
            let relay = WsRelay::new(
                cfg.relay_url.clone(),
                cfg.relay_socks.clone(),
                cfg.relay_timeout,
            );
            tracing::info!(pubkey = keys.public_key(), relay = %cfg.relay_url, "starting bot");
            let state = server::AppState::new(cfg, keys, Arc::new(store), Arc::new(relay))?;
            server::serve_http(http_addr, Arc::new(state), shutdown_signal()).await?;
        }
        Commands::Pubkey => {
            let keys = signer::Keys::parse(&cfg.secret_key)?;
            println!("{}", keys.public_key());
            println!("{}", signer::encode_npub(keys.public_key())?);
        }
        Commands::Sign {
            mode,
            body,
            tags,
            file,
        } => {
            let keys = signer::Keys::parse(&cfg.secret_key)?;
            let extra = match tags {
                Some(raw) => {
                    let value: serde_json::Value = serde_json::from_str(&raw)?;
                    event::tags_from_value(&value)?
                }
                None => Vec::new(),
            };
            let data = fs::read(&file).with_context(|| format!("reading {file}"))?;
            let cause = event::Event::from_json(&data)?;
            let signed = match mode {
                SignMode::Reply => factory::build_reply(&keys, &cause, &body, &extra)?,
                SignMode::Quiet => factory::build_reply_quiet(&keys, &cause, &body, &extra)?,
                SignMode::Note => factory::build_note(&keys, &cause, &body, &extra)?,
                SignMode::Reaction => factory::build_reaction(&keys, &cause)?,
            };
            println!("{}", serde_json::to_string(&signed)?);
        }
        Commands::Verify { file } => {
            let data = fs::read(&file).with_context(|| format!("reading {file}"))?;
            let ev = event::Event::from_json(&data)?;
            signer::verify_event(&ev).with_context(|| format!("event {}", ev.id))?;
            println!("ok {}", ev.id);
        }
        Commands::FirstPost { pubkey, kind } => {
            let pubkey = signer::parse_pubkey(&pubkey)?;
            let relay = WsRelay::new(
                cfg.relay_url.clone(),
                cfg.relay_socks.clone(),
                cfg.relay_timeout,
            );
            let finder = first_post::FirstPostFinder::new(&relay);
            match finder.find(&pubkey, kind, cache::now_secs()).await? {
                Some(ev) => println!("{}", serde_json::to_string(&ev)?),
                None => bail!("no kind {kind} events by {pubkey} on {}", cfg.relay_url),
            }
        }
        Commands::Purge { all } => {
            let store = FileStore::new(cfg.store_root.clone());
            let ttl = cfg.cache_ttl.as_secs();
            let now = cache::now_secs();
            let removed = store.purge(|data| all || entry_is_stale(data, ttl, now))?;
            tracing::info!(removed, "purged cache entries");
            println!("removed {removed}");
        }
    }
    Ok(())
}

/// Unreadable entries count as stale.
fn entry_is_stale(data: &[u8], ttl: u64, now: u64) -> bool {
    match serde_json::from_slice::<cache::CacheEntry<serde_json::Value>>(data) {
        Ok(entry) => now.saturating_sub(entry.fetched_at) > ttl,
        Err(_) => true,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("nullpoga-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("BIND_HTTP=127.0.0.1:7777\n");
    content.push_str("BOT_SECRET_KEY=\n");
    content.push_str(&format!("RELAY_URL={}\n", config::DEFAULT_RELAY));
    content.push_str("RELAY_SOCKS=\n");
    content.push_str("RELAY_TIMEOUT_SECS=10\n");
    content.push_str(&format!(
        "CACHE_TTL_SECS={}\n",
        cache::DEFAULT_TTL.as_secs()
    ));
    content.push_str("BEARER_TOKEN=\n");
    content.push_str("IMAGE_LISTS=\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::config::{ENV_MUTEX, ENV_VARS};
    use crate::storage::KvStore;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::{net::TcpListener, task};

    const SECRET: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    fn clear_env() {
        for v in ENV_VARS {
            std::env::remove_var(v);
        }
    }

    fn write_env(dir: &TempDir, extra: &str) -> String {
        let env_path = dir.path().join(".env");
        let content = format!(
            "STORE_ROOT={}\nBIND_HTTP=127.0.0.1:0\nRELAY_URL=ws://127.0.0.1:9\n{}",
            dir.path().to_str().unwrap(),
            extra
        );
        fs::write(&env_path, content).unwrap();
        env_path.to_str().unwrap().into()
    }

    #[tokio::test]
    async fn purge_creates_default_env() {
        let _g = ENV_MUTEX.lock();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join("conf").join(".env");
        run(Cli {
            env: env_path.to_string_lossy().into_owned(),
            command: Commands::Purge { all: false },
        })
        .await
        .unwrap();

        let data = fs::read_to_string(&env_path).unwrap();
        let expected_root = dir.path().join("conf").join("nullpoga-data");
        assert!(data.contains(&format!("STORE_ROOT={}", expected_root.to_string_lossy())));
        assert!(data.contains("BIND_HTTP=127.0.0.1:7777"));
        assert!(data.contains("RELAY_URL=wss://yabu.me"));
        assert!(data.contains("CACHE_TTL_SECS=1800"));
    }

    #[tokio::test]
    async fn purge_drops_stale_and_unreadable_entries() {
        let _g = ENV_MUTEX.lock();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "CACHE_TTL_SECS=60\n");
        let store = FileStore::new(dir.path().to_path_buf());
        store.init().unwrap();
        let now = cache::now_secs();
        let fresh = CacheEntry {
            value: "x",
            fetched_at: now,
        };
        let stale = CacheEntry {
            value: "y",
            fetched_at: now - 3600,
        };
        store
            .put("profile:fresh", &serde_json::to_vec(&fresh).unwrap())
            .unwrap();
        store
            .put("profile:stale", &serde_json::to_vec(&stale).unwrap())
            .unwrap();
        store.put("profile:junk", b"not json").unwrap();

        run(Cli {
            env: env_file.clone(),
            command: Commands::Purge { all: false },
        })
        .await
        .unwrap();
        assert!(store.get("profile:fresh").unwrap().is_some());
        assert!(store.get("profile:stale").unwrap().is_none());
        assert!(store.get("profile:junk").unwrap().is_none());

        run(Cli {
            env: env_file,
            command: Commands::Purge { all: true },
        })
        .await
        .unwrap();
        assert!(store.get("profile:fresh").unwrap().is_none());
    }

    #[test]
    fn stale_entry_boundary() {
        let entry = serde_json::to_vec(&CacheEntry {
            value: 1,
            fetched_at: 100,
        })
        .unwrap();
        assert!(!entry_is_stale(&entry, 1800, 1900));
        assert!(entry_is_stale(&entry, 1800, 1901));
        assert!(entry_is_stale(b"{}", 1800, 0));
    }

    #[tokio::test]
    async fn serve_requires_secret_key() {
        let _g = ENV_MUTEX.lock();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "BOT_SECRET_KEY=\n");
        let err = run(Cli {
            env: env_file,
            command: Commands::Serve,
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("secret key"));
    }

    #[tokio::test]
    async fn sign_rejects_own_message() {
        let _g = ENV_MUTEX.lock();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, &format!("BOT_SECRET_KEY={SECRET}\n"));
        let own = signer::Keys::parse(SECRET).unwrap();
        let cause = signer::finalize(&own, 10, event::KIND_NOTE, vec![], "ping".into()).unwrap();
        let cause_path = dir.path().join("cause.json");
        fs::write(&cause_path, serde_json::to_vec(&cause).unwrap()).unwrap();
        let err = run(Cli {
            env: env_file,
            command: Commands::Sign {
                mode: SignMode::Reply,
                body: "pong".into(),
                tags: None,
                file: cause_path.to_string_lossy().into_owned(),
            },
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("own message"));
    }

    #[tokio::test]
    async fn sign_rejects_non_string_tags() {
        let _g = ENV_MUTEX.lock();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, &format!("BOT_SECRET_KEY={SECRET}\n"));
        let cause_path = dir.path().join("cause.json");
        fs::write(
            &cause_path,
            r#"{"id":"abc","pubkey":"X","kind":1,"created_at":5,"tags":[],"content":"hi","sig":""}"#,
        )
        .unwrap();
        let err = run(Cli {
            env: env_file,
            command: Commands::Sign {
                mode: SignMode::Note,
                body: "hello".into(),
                tags: Some(r#"[["t", 1]]"#.into()),
                file: cause_path.to_string_lossy().into_owned(),
            },
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("non-string tag element"));
    }

    #[tokio::test]
    async fn run_serve_starts_http() {
        let _g = ENV_MUTEX.lock();
        clear_env();
        let dir = TempDir::new().unwrap();
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_port = http_listener.local_addr().unwrap().port();
        drop(http_listener);
        let env_path = dir.path().join(".env");
        let content = format!(
            "STORE_ROOT={}\nBIND_HTTP=127.0.0.1:{}\nBOT_SECRET_KEY={}\nRELAY_URL=ws://127.0.0.1:9\n",
            dir.path().to_str().unwrap(),
            http_port,
            SECRET
        );
        fs::write(&env_path, content).unwrap();

        let handle = task::spawn(run(Cli {
            env: env_path.to_str().unwrap().to_string(),
            command: Commands::Serve,
        }));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let url = format!("http://127.0.0.1:{}/healthz", http_port);
        let resp = reqwest::get(url).await.unwrap();
        assert!(resp.status().is_success());
        assert!(dir.path().join("kv").exists());
        handle.abort();
    }
}

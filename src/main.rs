use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};

use racewatch::dom::ObserveOptions;
use racewatch::healthbar::HealthBarReconciler;
use racewatch::leaderboard::{parse_race_payload, LeaderboardReconciler, RaceDataSlot};
use racewatch::model::Driver;
use racewatch::reconciler::MutationReconciler;
use racewatch::waiter::ElementWaiter;
use racewatch::{ApiClient, Document, FileStore, HttpTransport, KeyValueStore, MemoryStore, Namespaced, SyncConfig};

#[derive(Parser)]
#[command(name = "racewatch", version, about = "Leaderboard sync engine tools")]
struct Cli {
    /// JSON config file; missing fields take their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Durable key/value store (JSON). In-memory when omitted.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe a key and report its access level
    ValidateKey {
        key: String,
        /// Persist the key once it validates
        #[arg(long)]
        save: bool,
    },
    /// Issue one cached GET and print the JSON body
    Request {
        /// API root, e.g. `user`
        root: String,
        /// Path below the root, e.g. `123/personalstats`
        #[arg(default_value = "")]
        path: String,
        /// Query parameter as name=value; repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Use this key instead of the stored one
        #[arg(long)]
        key: Option<String>,
    },
    /// Reconcile a saved page once and print the resulting markup
    Watch {
        /// Saved HTML of the racing page
        html: PathBuf,
        /// Race payload captured from the page's traffic
        #[arg(long)]
        race: Option<PathBuf>,
        /// Current user id; read from the identity element when omitted
        #[arg(long)]
        driver: Option<u64>,
        /// Element whose text is the identity JSON
        #[arg(long, default_value = "#torn-user")]
        identity: String,
        /// Also mirror progress bars
        #[arg(long)]
        health: bool,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw.split_once('=').ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    Ok((name.to_string(), value.to_string()))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn open_store(path: Option<&Path>) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    Ok(match path {
        Some(path) => Arc::new(FileStore::open(path).with_context(|| format!("opening store {}", path.display()))?),
        None => Arc::new(MemoryStore::new()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let store = Namespaced::new(open_store(cli.store.as_deref())?, config.store_prefix.clone());
    let transport = Arc::new(HttpTransport::new(config.api.request_timeout_ms, &config.user_agent)?);
    let api = ApiClient::new(transport, store.clone(), config.api.clone())?;

    match cli.command {
        Command::ValidateKey { key, save } => {
            let info = api.validate(&key).await?;
            println!("access level {} ({})", info.access_level, info.access_type.as_deref().unwrap_or("unknown"));
            if save {
                api.save_key()?;
                println!("key saved");
            }
        }
        Command::Request { root, path, params, key } => {
            match key {
                Some(key) => api.use_key(&key)?,
                None => {
                    api.load_key().ok_or_else(|| anyhow!("no stored key; pass --key or run validate-key --save"))?;
                }
            }
            let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let body = api.request(&root, &path, &pairs).await?;
            println!("{}", serde_json::to_string_pretty(&*body)?);
        }
        Command::Watch { html, race, driver, identity, health } => {
            let markup = std::fs::read_to_string(&html).with_context(|| format!("reading {}", html.display()))?;
            let doc = Document::parse_html(&markup);

            let slot = RaceDataSlot::new();
            if let Some(path) = race {
                let body = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
                slot.set(parse_race_payload(&body).context("parsing race payload")?);
            }

            let driver_id = match driver {
                Some(id) => id,
                None => {
                    let node = doc
                        .query_selector(&identity)?
                        .ok_or_else(|| anyhow!("identity element '{}' not found; pass --driver", identity))?;
                    Driver::from_identity_payload(&doc.text_content(node))?.id
                }
            };
            api.load_key();

            let waiter = ElementWaiter::new(doc.clone(), &config.waiter);
            let container = waiter.defer(&config.reconciler.container_selector).await?;
            let board = LeaderboardReconciler::new(
                api.clone(),
                store.clone(),
                Driver::load(&store, driver_id),
                slot,
                config.reconciler.clone(),
            )?;
            let mut reconciler = MutationReconciler::new(doc.clone(), container, board, ObserveOptions::all())?;
            let writes = reconciler.pass().await?;
            eprintln!("leaderboard: {} nodes updated", writes);

            if health {
                let mut bars =
                    MutationReconciler::new(doc.clone(), doc.root(), HealthBarReconciler::new()?, ObserveOptions::all())?;
                let writes = bars.pass().await?;
                eprintln!("progress bars: {} nodes updated", writes);
            }
            println!("{}", doc.html());
        }
    }
    Ok(())
}

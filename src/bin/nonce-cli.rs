use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use chain_gateway::nonce::{ChainScope, NonceStore};
use chain_gateway::storage::{FileStore, KeyValueStore};

#[derive(Parser)]
#[command(name = "nonce-cli")]
#[command(about = "Inspect the gateway's persisted nonce state", long_about = None)]
struct Cli {
    /// Path to the nonce store file
    #[arg(short, long, default_value = "db/nonces.json")]
    db: PathBuf,

    /// Chain name as configured in the gateway
    #[arg(short, long, default_value = "ethereum")]
    chain: String,

    /// Numeric chain id
    #[arg(long, default_value_t = 1)]
    chain_id: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the confirmed nonce of every address (or one)
    Show {
        #[arg(short, long)]
        address: Option<String>,
    },
    /// Show queued pending nonces of every address (or one)
    Pending {
        #[arg(short, long)]
        address: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let file = Arc::new(FileStore::new(&cli.db));
    let kv: Arc<dyn KeyValueStore> = file.clone();
    let store = NonceStore::new(kv, ChainScope::new(cli.chain.clone(), cli.chain_id));
    store.open()?;

    let output = match cli.command {
        Commands::Show { address } => {
            let current: BTreeMap<_, _> = store
                .current_nonces()?
                .into_iter()
                .filter(|(addr, _)| address.as_deref().map_or(true, |a| a == addr))
                .collect();
            json!({ "scope": store.scope().to_string(), "current": current })
        }
        Commands::Pending { address } => {
            let pending: BTreeMap<_, _> = store
                .pending_nonces()?
                .into_iter()
                .filter(|(addr, _)| address.as_deref().map_or(true, |a| a == addr))
                .collect();
            json!({ "scope": store.scope().to_string(), "pending": pending })
        }
    };

    file.close()?;
    print_json(&output)
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

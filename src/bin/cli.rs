use clap::{Parser, Subcommand};
use dispatch_store::engine::{Envelope, OrderOptions, Query};
use dispatch_store::{sdk, Config};
use serde_json::Value;

#[derive(Parser)]
#[command(author, version, about = "Inspect and edit the local dispatch store", long_about = None)]
struct Cli {
    /// Directory holding the store (defaults to $DISPATCH_DATA_DIR, then ./data)
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Slot key the store is persisted under (defaults to $DISPATCH_STORAGE_KEY)
    #[arg(short, long)]
    storage_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// List collection names
    Collections,
    /// Read rows from a collection
    Select {
        collection: String,
        /// Equality filter as column=value; repeatable
        #[arg(long = "eq", value_parser = parse_pair)]
        eq: Vec<(String, Value)>,
        #[arg(long)]
        order: Option<String>,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        limit: Option<usize>,
        /// Return exactly one row, failing if none match
        #[arg(long)]
        single: bool,
    },
    /// Insert a JSON object or array of objects
    Insert { collection: String, json: String },
    /// Merge a JSON object into every matching row
    Update {
        collection: String,
        json: String,
        #[arg(long = "eq", value_parser = parse_pair)]
        eq: Vec<(String, Value)>,
    },
    /// Remove every matching row
    Delete {
        collection: String,
        #[arg(long = "eq", value_parser = parse_pair)]
        eq: Vec<(String, Value)>,
    },
    /// Replace everything with the demonstration dataset
    Reset,
}

fn parse_pair(raw: &str) -> Result<(String, Value), String> {
    let (column, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected column=value, got {:?}", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((column.to_string(), value))
}

fn with_filters(mut query: Query, filters: Vec<(String, Value)>) -> Query {
    for (column, value) in filters {
        query = query.eq(&column, value);
    }
    query
}

fn print(envelope: &Envelope) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    if !envelope.success {
        anyhow::bail!(envelope.error.clone().unwrap_or_default());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(key) = cli.storage_key {
        config = config.with_storage_key(key);
    }
    let engine = sdk::new(&config).await?;
    let store = engine.store;

    match cli.command {
        Commands::Collections => {
            println!("{}", serde_json::to_string_pretty(&store.collection_names())?);
        }
        Commands::Select { collection, eq, order, desc, limit, single } => {
            let mut query = with_filters(store.collection(&collection).select(), eq);
            if let Some(column) = order {
                query = query.order_with(&column, OrderOptions { ascending: !desc });
            }
            if let Some(n) = limit {
                query = query.limit(n);
            }
            let envelope = if single { query.single().await } else { query.await };
            print(&envelope)?;
        }
        Commands::Insert { collection, json } => {
            let data: Value = serde_json::from_str(&json)?;
            print(&store.collection(&collection).insert(data).await)?;
        }
        Commands::Update { collection, json, eq } => {
            let patch: Value = serde_json::from_str(&json)?;
            print(&with_filters(store.collection(&collection).update(patch), eq).await)?;
        }
        Commands::Delete { collection, eq } => {
            print(&with_filters(store.collection(&collection).delete(), eq).await)?;
        }
        Commands::Reset => {
            store.reset().await;
            println!("OK");
        }
    }

    Ok(())
}

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use storefront_sync::{
    DisplayFields, ItemDraft, LoadOutcome, OptimisticCollection, RestRemoteStore, RestStoreConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "storefront-sync")]
#[command(about = "Inspect and edit a shopper's favorites or cart in the hosted row store")]
struct Cli {
    /// Table holding the collection; overrides STOREFRONT_SYNC_TABLE
    #[arg(long)]
    table: Option<String>,
    /// Owner (user) id whose rows are read and written
    #[arg(long)]
    owner: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    List,
    Add {
        #[command(flatten)]
        item: ItemArgs,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
    },
    Toggle {
        #[command(flatten)]
        item: ItemArgs,
    },
    Remove {
        #[arg(long)]
        item: String,
    },
    Quantity {
        #[arg(long)]
        item: String,
        #[arg(long)]
        quantity: u32,
    },
    Clear,
}

#[derive(clap::Args)]
struct ItemArgs {
    #[arg(long)]
    item: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    price: f64,
    #[arg(long)]
    image: Option<String>,
}

impl ItemArgs {
    fn into_draft(self) -> ItemDraft {
        let mut fields = DisplayFields::new(self.name, self.price);
        fields.image_ref = self.image;
        ItemDraft::new(self.item, fields)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("storefront_sync=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let mut config =
        RestStoreConfig::from_env().context("Failed to read STOREFRONT_SYNC_* settings")?;
    if let Some(table) = &cli.table {
        config = config.table(table);
    }
    let table = config.table.clone();
    let store = RestRemoteStore::new(config)?;
    let collection = OptimisticCollection::new(table.clone(), Arc::new(store));

    if let LoadOutcome::FailedOpen { error } = collection.attach(&cli.owner).await {
        return Err(anyhow!("Failed to load '{}' for '{}': {}", table, cli.owner, error));
    }

    let outcome = match cli.command {
        Command::List => None,
        Command::Add { item, quantity } => {
            Some(collection.add(item.into_draft().with_quantity(quantity)).await?)
        }
        Command::Toggle { item } => Some(collection.toggle(item.into_draft()).await?),
        Command::Remove { item } => Some(collection.remove(&item).await?),
        Command::Quantity { item, quantity } => {
            Some(collection.set_quantity(&item, quantity).await?)
        }
        Command::Clear => Some(collection.clear().await?),
    };

    if let Some(outcome) = outcome {
        println!("{:?}", outcome);
    }
    print_collection(&collection);
    Ok(())
}

fn print_collection(collection: &OptimisticCollection) {
    let items = collection.items();
    if items.is_empty() {
        println!("{} is empty", collection.name());
        return;
    }

    for item in &items {
        println!(
            "{:<24} {:<32} {:>3} x {:>10.2}  {}",
            item.item_id, item.fields.name, item.quantity, item.fields.price, item.remote_row_id
        );
    }
    println!("{} item(s), total {:.2}", items.len(), collection.total());
}

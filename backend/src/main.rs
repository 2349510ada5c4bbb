//! WeldAdmin stock ledger - operator CLI
//!
//! Maintenance commands over the stock ledger: schema migration, item
//! listing, ledger history, ledger verification and the duplicate-code pass.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use weldstock::{db, Config, StockEngine};

#[derive(Parser)]
#[command(name = "weldstock")]
#[command(about = "Stock ledger maintenance for WeldAdmin")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// List stock items with status and value
    Items {
        /// Only items in this category
        #[arg(long)]
        category: Option<String>,
    },

    /// Show an item's ledger, most recent first
    Ledger {
        item_id: Uuid,

        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Check that an item's ledger reproduces its quantity
    Verify { item_id: Uuid },

    /// List duplicate item codes and the proposed fixes
    Duplicates {
        /// Rename the duplicates as proposed
        #[arg(long)]
        apply: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::debug!("Environment: {}", config.environment);

    let pool = db::connect(&config.database).await?;
    let engine = StockEngine::postgres(pool.clone(), &config);

    match cli.command {
        Commands::Migrate => {
            db::migrate(&pool).await?;
            println!("Migrations applied");
        }
        Commands::Items { category } => {
            let items = engine.list_items(category.as_deref()).await?;
            println!(
                "{:<12} {:<32} {:>8} {:<14} {:>12}",
                "CODE", "DESCRIPTION", "QTY", "STATUS", "VALUE"
            );
            for item in &items {
                let value = match item.total_stock_value() {
                    Ok(value) => shared::round_currency(value).to_string(),
                    Err(_) => "overflow".to_string(),
                };
                println!(
                    "{:<12} {:<32} {:>8} {:<14} {:>12}",
                    item.item_code,
                    truncate(&item.description, 32),
                    item.quantity,
                    item.status().to_string(),
                    value
                );
            }
            println!("{} item(s)", items.len());
        }
        Commands::Ledger { item_id, from, to } => {
            let item = engine.get_item(item_id).await?;
            println!("{} - {}", item.item_code, item.description);
            for entry in engine.get_ledger(item_id, from, to).await? {
                println!(
                    "{}  {:<6} {:>8} {:>8}  {}",
                    entry.occurred_at.format("%Y-%m-%d %H:%M"),
                    entry.direction.as_str(),
                    entry.quantity,
                    entry.running_balance,
                    entry.reference.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Verify { item_id } => {
            let audit = engine.verify(item_id).await?;
            println!(
                "quantity {} / replayed {} / cached {} over {} entries",
                audit.item_quantity,
                audit.replayed_balance,
                audit
                    .cached_balance
                    .map_or_else(|| "-".to_string(), |b| b.to_string()),
                audit.entry_count
            );
            if !audit.is_consistent() {
                anyhow::bail!("ledger does not reproduce the item quantity");
            }
            println!("consistent");
        }
        Commands::Duplicates { apply } => {
            let groups = engine.find_duplicate_codes().await?;
            if groups.is_empty() {
                println!("No duplicate item codes");
                return Ok(());
            }

            let proposals = engine.integrity.propose_fixes().await?;
            for proposal in proposals.iter().filter(|p| p.is_change()) {
                println!(
                    "{}  {} -> {}",
                    proposal.id, proposal.current_code, proposal.proposed_code
                );
            }

            if apply {
                let renamed = engine.integrity.apply_fixes(&proposals).await?;
                println!("Renamed {} item(s)", renamed);
            } else {
                println!("{} group(s); rerun with --apply to rename", groups.len());
            }
        }
    }

    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('~');
    cut
}

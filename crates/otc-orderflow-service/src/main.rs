//! Orderflow service: the shared order index behind an HTTP API
//!
//! `serve` runs the index; the `orders` subcommands inspect and close
//! listings on a running service through the same HTTP client the desk's
//! coordinators use.

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use otc_desk_logic::config::DeskConfig;
use otc_desk_logic::index::{MemoryOrderIndex, Order, OrderFilter, OrderIndex};
use otc_desk_logic::index_client::HttpOrderIndex;
use otc_desk_logic::types::Address;

mod handlers;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "orderflow-service")]
#[command(about = "Order index service for the OTC escrow desk")]
struct Cli {
    /// Path to desk configuration file
    #[arg(short, long, default_value = "desk.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (long-running)
    Serve {
        /// Listen address (overrides bind_addr)
        #[arg(long)]
        bind: Option<String>,
        /// Snapshot file for listings (overrides store_path)
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Query or close listings on a running service
    Orders {
        /// Service base URL (overrides orderflow_api_url)
        #[arg(long, global = true)]
        api_url: Option<String>,
        #[command(subcommand)]
        command: OrderCommands,
    },
}

#[derive(Subcommand)]
enum OrderCommands {
    /// List listings, most recent first
    List {
        #[arg(long)]
        escrow: Option<Address>,
        #[arg(long)]
        sell_token: Option<Address>,
        #[arg(long)]
        buy_token: Option<Address>,
        /// Show count only
        #[arg(long)]
        count: bool,
    },
    /// Show one listing
    Get {
        /// Order ID
        id: String,
    },
    /// Remove a listing without touching its escrow
    Close {
        /// Order ID
        id: String,
    },
}

#[actix_web::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Initialize logging (LOG_DESTINATION=console|file); the guard flushes file output on exit
    let _log_guard = otc_desk_logic::logging::init_logging(cli.verbose, &["orderflow_service"], "orderflow-service")?;

    let config = DeskConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    match cli.command {
        Commands::Serve { bind, store } => run_serve(config, bind, store).await,
        Commands::Orders { api_url, command } => run_orders(config, api_url, command).await,
    }
}

// ============================================================================
// Service
// ============================================================================

async fn run_serve(config: DeskConfig, bind: Option<String>, store: Option<PathBuf>) -> Result<()> {
    let bind_addr = bind.unwrap_or(config.bind_addr);

    let index: Arc<dyn OrderIndex> = match store.or(config.store_path) {
        Some(path) => {
            let index = MemoryOrderIndex::open(&path)
                .with_context(|| format!("Failed to open order store {}", path.display()))?;
            info!("Order store {} loaded with {} listings", path.display(), index.len().await);
            Arc::new(index)
        }
        None => {
            warn!("No store_path configured, listings will not survive a restart");
            Arc::new(MemoryOrderIndex::new())
        }
    };
    let index = web::Data::from(index);

    info!("Orderflow service listening on {}", bind_addr);
    HttpServer::new(move || {
        App::new()
            .app_data(index.clone())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await
    .context("HTTP server stopped with an error")
}

// ============================================================================
// Order commands
// ============================================================================

async fn run_orders(config: DeskConfig, api_url: Option<String>, command: OrderCommands) -> Result<()> {
    let url = api_url.unwrap_or(config.orderflow_api_url);
    let index = HttpOrderIndex::new(&url, config.http_timeout)?;

    match command {
        OrderCommands::List {
            escrow,
            sell_token,
            buy_token,
            count,
        } => {
            let filter = OrderFilter {
                escrow_address: escrow,
                sell_token_address: sell_token,
                buy_token_address: buy_token,
            };
            let orders = index.list_filtered(&filter).await?;
            if count {
                println!("{}", orders.len());
                return Ok(());
            }
            if orders.is_empty() {
                println!("No listings");
            }
            for order in &orders {
                print_order(order);
            }
        }
        OrderCommands::Get { id } => match index.get_by_id(&id).await? {
            Some(order) => println!("{}", serde_json::to_string_pretty(&order)?),
            None => anyhow::bail!("Order {} not found", id),
        },
        OrderCommands::Close { id } => {
            if index.remove(&id).await? {
                println!("Order {} removed", id);
            } else {
                println!("Order {} was not listed", id);
            }
        }
    }
    Ok(())
}

fn print_order(order: &Order) {
    println!("{}  {}", order.order_id, order.created_at.to_rfc3339());
    println!("   escrow: {}", order.escrow_address);
    println!("   sell:   {} of {}", order.sell_token_amount, order.sell_token_address);
    println!("   buy:    {} of {}", order.buy_token_amount, order.buy_token_address);
}

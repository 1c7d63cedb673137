mod ai;
mod categories;
mod config;
mod currency;
mod db;
mod executor;
mod ingest;
mod normalize;
mod server;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::ai::interpreter::Interpreter;
use crate::ai::llm::LlmProvider;
use crate::categories::CategoryVocabulary;
use crate::config::Config;
use crate::currency::{HttpRateProvider, RateCache};
use crate::db::Database;
use crate::executor::OperationExecutor;
use crate::ingest::ImportOptions;
use crate::server::AppState;

fn print_usage() {
    println!("Usage: budget-assistant <command> [args]");
    println!("Commands:");
    println!("  serve                          start the HTTP API");
    println!("  import <path>                  import a CSV or PDF bank statement");
    println!("  convert <amount> <from> <to>   convert between currencies");
    println!("  categories list                list known categories");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let config = Config::from_env()?;

    match args[1].as_str() {
        "serve" => run_serve(&config).await,
        "import" => match args.get(2) {
            Some(path) => run_import(&config, Path::new(path)).await,
            None => {
                println!("Usage: budget-assistant import <path>");
                Ok(())
            }
        },
        "convert" => {
            let amount = args.get(2).and_then(|s| s.parse::<f64>().ok());
            match (amount, args.get(3), args.get(4)) {
                (Some(amount), Some(from), Some(to)) => {
                    run_convert(&config, amount, from, to).await
                }
                _ => {
                    println!("Usage: budget-assistant convert <amount> <from> <to>");
                    Ok(())
                }
            }
        }
        "categories" => {
            let sub = args.get(2).map(|s| s.as_str()).unwrap_or("list");
            match sub {
                "list" => {
                    let db = open_database(&config).await?;
                    let vocabulary = CategoryVocabulary::new(db.distinct_categories().await?);
                    println!("Known categories:");
                    for name in vocabulary.names() {
                        println!("- {}", name);
                    }
                    Ok(())
                }
                other => {
                    println!("Unknown categories subcommand: {}", other);
                    Ok(())
                }
            }
        }
        unknown => {
            println!("Unknown command: {}", unknown);
            print_usage();
            Ok(())
        }
    }
}

async fn open_database(config: &Config) -> Result<Arc<Database>, Box<dyn std::error::Error>> {
    // Ensure the data directory exists before SQLite creates the file
    if let Some(path) = config.database_url.strip_prefix("sqlite:") {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(Arc::new(Database::open(&config.database_url).await?))
}

fn build_rates(config: &Config) -> Result<Arc<RateCache>, Box<dyn std::error::Error>> {
    if config.exchange_api_key.is_empty() {
        warn!("EXCHANGE_API_KEY not set; cross-currency conversion will be unavailable");
    }
    let provider =
        HttpRateProvider::new(config.exchange_api_key.clone(), config.request_timeout)?;
    Ok(Arc::new(RateCache::new(Box::new(provider), config.rate_ttl)))
}

async fn run_serve(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let api_key = config.require_anthropic_key()?.to_string();

    let db = open_database(config).await?;
    let vocabulary = Arc::new(CategoryVocabulary::new(db.distinct_categories().await?));
    let rates = build_rates(config)?;

    let llm = LlmProvider::new(
        api_key,
        config.anthropic_model.clone(),
        config.request_timeout,
    )?;
    let interpreter = Arc::new(Interpreter::new(
        llm,
        vocabulary.clone(),
        &config.base_currency,
    ));
    let executor = Arc::new(OperationExecutor::new(
        db.clone(),
        rates.clone(),
        &config.base_currency,
    ));

    let state = AppState {
        db,
        vocabulary,
        rates,
        interpreter,
        executor,
        import_options: ImportOptions {
            default_currency: config.base_currency.clone(),
            base_currency: config.base_currency.clone(),
        },
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(
        bind_address = %config.bind_address,
        database = %config.database_url,
        model = %config.anthropic_model,
        "listening"
    );
    axum::serve(listener, server::router(state)).await?;
    Ok(())
}

async fn run_import(config: &Config, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_database(config).await?;
    let vocabulary = CategoryVocabulary::new(db.distinct_categories().await?);
    let rates = build_rates(config)?;

    let options = ImportOptions {
        default_currency: config.base_currency.clone(),
        base_currency: config.base_currency.clone(),
    };

    println!("Importing {}", path.display());
    let summary = ingest::import_file(&db, &vocabulary, &rates, path, &options).await?;

    println!("Import Complete");
    println!("  Accepted:   {}", summary.accepted);
    println!("  Duplicates: {}", summary.duplicates);
    println!("  Rejected:   {}", summary.rejected.len());
    for rejected in &summary.rejected {
        println!("    {} [{}]: {}", rejected.source, rejected.row, rejected.reason);
    }

    Ok(())
}

async fn run_convert(
    config: &Config,
    amount: f64,
    from: &str,
    to: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let rates = build_rates(config)?;

    match rates.convert(amount, from, to).await {
        Ok(conversion) => {
            println!(
                "{:.2} {} = {:.2} {} (rate {:.4})",
                amount,
                from.to_uppercase(),
                conversion.amount,
                to.to_uppercase(),
                conversion.rate
            );
            if conversion.stale {
                println!("  Note: rate provider unreachable, using last cached rate");
            }
        }
        Err(err) => println!("Conversion unavailable: {}", err),
    }

    Ok(())
}

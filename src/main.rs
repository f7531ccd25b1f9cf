use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use watchdog_ledger::adapters::PostgresLedgerStore;
use watchdog_ledger::chain::client::parse_signing_key;
use watchdog_ledger::chain::{Anchor, ChainAnchor, ChainAnchorConfig, DisabledAnchor};
use watchdog_ledger::cli::{self, Cli, Commands, DbCommands};
use watchdog_ledger::config::Config;
use watchdog_ledger::use_cases::TransactionStateMachine;
use watchdog_ledger::{create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Config) => cli::handle_config_validate(&config),
        Some(Commands::Tx(command)) => {
            let chain = chain_anchor(&config)?;
            let workflow = build_workflow(&config, as_anchor(chain.clone())).await?;
            cli::handle_tx(&workflow, chain.as_ref(), command).await
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn chain_anchor(config: &Config) -> anyhow::Result<Option<ChainAnchor>> {
    let Some(chain) = &config.chain else {
        return Ok(None);
    };

    let signing_key = parse_signing_key(&chain.signing_key)?;
    let anchor = ChainAnchor::new(
        ChainAnchorConfig {
            rpc_url: chain.rpc_url.clone(),
            logger_address: chain.logger_address.clone(),
            fund_manager_address: chain.fund_manager_address.clone(),
            gas_limit: chain.gas_limit,
            failure_threshold: chain.failure_threshold,
            reset_timeout_secs: chain.reset_timeout_secs,
            request_timeout: config.anchor_timeout,
        },
        signing_key,
    );
    tracing::info!(
        rpc_url = %chain.rpc_url,
        signer = %anchor.address(),
        "Chain anchoring enabled"
    );
    Ok(Some(anchor))
}

fn as_anchor(chain: Option<ChainAnchor>) -> Arc<dyn Anchor> {
    match chain {
        Some(anchor) => Arc::new(anchor),
        None => {
            tracing::info!("CHAIN_RPC_URL not set; chain anchoring disabled");
            Arc::new(DisabledAnchor)
        }
    }
}

async fn build_workflow(
    config: &Config,
    anchor: Arc<dyn Anchor>,
) -> anyhow::Result<Arc<TransactionStateMachine>> {
    let pool = db::create_pool(config).await?;
    let store = Arc::new(PostgresLedgerStore::new(pool));

    Ok(Arc::new(TransactionStateMachine::new(
        store,
        anchor,
        config.anchor_timeout,
    )))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool, Path::new("./migrations")).await?;

    let workflow = Arc::new(TransactionStateMachine::new(
        Arc::new(PostgresLedgerStore::new(pool)),
        as_anchor(chain_anchor(&config)?),
        config.anchor_timeout,
    ));
    let app = create_app(AppState::new(workflow, &config.anomaly_webhook_secret));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::Path;
use uuid::Uuid;

use crate::chain::ChainAnchor;
use crate::config::Config;
use crate::domain::Transaction;
use crate::use_cases::TransactionStateMachine;

#[derive(Parser)]
#[command(name = "watchdog-ledger")]
#[command(about = "Watchdog Ledger - public fund transaction ledger with chain anchoring", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Transaction workflow commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Show a transaction with its fund, line item and entities
    Show {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },

    /// Approve a pending or flagged transaction
    Approve {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
        /// Approving user
        #[arg(long)]
        actor: Uuid,
    },

    /// Reject a pending or flagged transaction
    Reject {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
        /// Rejecting user
        #[arg(long)]
        actor: Uuid,
        #[arg(long)]
        reason: String,
    },

    /// Complete an approved transaction and apply its balance effect
    Complete {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },

    /// Record an auditor review
    Review {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
        #[arg(long)]
        auditor: Uuid,
    },

    /// List the events anchored on chain for a transaction
    Events {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },

    /// Show the audit trail of a transaction
    Audit {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_tx(
    workflow: &TransactionStateMachine,
    chain: Option<&ChainAnchor>,
    command: TxCommands,
) -> anyhow::Result<()> {
    let tx = match command {
        TxCommands::Show { tx_id } => {
            let details = workflow.read(tx_id).await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
            return Ok(());
        }
        TxCommands::Events { tx_id } => {
            let chain = chain.context("chain anchoring is not configured (set CHAIN_RPC_URL)")?;
            let events = chain.transaction_events(tx_id).await?;
            println!("{}", serde_json::to_string_pretty(&events)?);
            return Ok(());
        }
        TxCommands::Audit { tx_id } => {
            let entries = workflow.audit_trail(tx_id).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }
        TxCommands::Approve { tx_id, actor } => workflow.approve(tx_id, actor).await?,
        TxCommands::Reject {
            tx_id,
            actor,
            reason,
        } => workflow.reject(tx_id, actor, &reason).await?,
        TxCommands::Complete { tx_id } => workflow.complete(tx_id).await?,
        TxCommands::Review { tx_id, auditor } => workflow.review(tx_id, auditor).await?,
    };

    print_transition(&tx);
    Ok(())
}

fn print_transition(tx: &Transaction) {
    println!("✓ Transaction {} is {}", tx.id, tx.status);
    match &tx.chain_tx_hash {
        Some(hash) => println!("  Chain: {} ({})", tx.chain_status, hash),
        None => println!("  Chain: not anchored"),
    }
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool, Path::new("./migrations")).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Database Max Connections: {}", config.database_max_connections);
    println!("  Anchor Timeout: {}s", config.anchor_timeout.as_secs());
    match &config.chain {
        Some(chain) => {
            println!("  Chain RPC URL: {}", chain.rpc_url);
            println!("  Chain Logger Address: {}", chain.logger_address);
            println!(
                "  Chain Fund Manager Address: {}",
                chain.fund_manager_address.as_deref().unwrap_or("(none)")
            );
            println!("  Chain Gas Limit: {}", chain.gas_limit);
        }
        None => println!("  Chain: disabled"),
    }

    println!("✓ Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_database_password() {
        assert_eq!(
            mask_password("postgres://ledger:hunter2@db:5432/ledger"),
            "postgres://ledger:****@db:5432/ledger"
        );
        assert_eq!(
            mask_password("postgres://localhost/ledger"),
            "postgres://localhost/ledger"
        );
    }

    #[test]
    fn parses_reject_command() {
        let id = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let (id_arg, actor_arg) = (id.to_string(), actor.to_string());
        let cli = Cli::try_parse_from([
            "watchdog-ledger",
            "tx",
            "reject",
            id_arg.as_str(),
            "--actor",
            actor_arg.as_str(),
            "--reason",
            "no invoice",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Tx(TxCommands::Reject {
                tx_id,
                actor: parsed_actor,
                reason,
            })) => {
                assert_eq!(tx_id, id);
                assert_eq!(parsed_actor, actor);
                assert_eq!(reason, "no invoice");
            }
            _ => panic!("expected tx reject"),
        }
    }

    #[test]
    fn parses_events_command() {
        let id = Uuid::new_v4();
        let id_arg = id.to_string();
        let cli = Cli::try_parse_from(["watchdog-ledger", "tx", "events", id_arg.as_str()]).unwrap();

        assert!(matches!(
            cli.command,
            Some(Commands::Tx(TxCommands::Events { tx_id })) if tx_id == id
        ));
    }

    #[tokio::test]
    async fn events_require_a_configured_chain() {
        let workflow = TransactionStateMachine::new(
            std::sync::Arc::new(crate::adapters::InMemoryLedgerStore::new()),
            std::sync::Arc::new(crate::chain::DisabledAnchor),
            crate::use_cases::DEFAULT_ANCHOR_TIMEOUT,
        );

        let result = handle_tx(&workflow, None, TxCommands::Events { tx_id: Uuid::new_v4() }).await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("CHAIN_RPC_URL"), "{}", message);
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["watchdog-ledger"]).unwrap();
        assert!(cli.command.is_none());
    }
}

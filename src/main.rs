use clap::{Parser, Subcommand};
use uuid::Uuid;
use wishlist_core::config::Config;
use wishlist_core::db::{create_pool, run_migrations};
use wishlist_core::notifier;
use wishlist_core::registry::idempotency;
use wishlist_core::Registry;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "wishlist-core",
    about = "Maintenance commands for the wishlist attachment and reservation store",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations and exit
    Migrate,
    /// Delete an account's items, wishlists and reservations in one transaction
    CascadeDelete {
        /// Account whose data is removed
        owner_id: Uuid,
    },
    /// Remove idempotency keys older than the configured window
    PurgeIdempotencyKeys,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wishlist_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config).await?;
    tracing::info!("Database connection established");

    run_migrations(&pool).await?;
    tracing::info!("Schema is up to date");

    match cli.command {
        Commands::Migrate => {}
        Commands::CascadeDelete { owner_id } => {
            let notifier = notifier::from_config(&config)?;
            let registry = Registry::from_config(pool.clone(), notifier, &config);
            let report = registry.cleanup.cascade_delete_owner(owner_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::PurgeIdempotencyKeys => {
            let purged = idempotency::purge_expired(&pool, config.idempotency_window_secs).await?;
            println!("purged {} idempotency keys", purged);
        }
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["wishlist-core", "migrate"]).unwrap();
        assert!(matches!(cli.command, Commands::Migrate));

        let cli = Cli::try_parse_from(["wishlist-core", "purge-idempotency-keys"]).unwrap();
        assert!(matches!(cli.command, Commands::PurgeIdempotencyKeys));

        let owner = Uuid::new_v4();
        let owner_arg = owner.to_string();
        let cli =
            Cli::try_parse_from(["wishlist-core", "cascade-delete", owner_arg.as_str()]).unwrap();
        match cli.command {
            Commands::CascadeDelete { owner_id } => assert_eq!(owner_id, owner),
            _ => panic!("expected cascade-delete"),
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Cli::try_parse_from(["wishlist-core", "cascade-delete", "not-a-uuid"]).is_err());
        assert!(Cli::try_parse_from(["wishlist-core", "cascade-delete"]).is_err());
        assert!(Cli::try_parse_from(["wishlist-core"]).is_err());
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::ops::Range;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use xpn_ai_adapter::HttpChat;
use xpn_config::EngineConfig;
use xpn_core::{CancellationToken, OperationType, VendorCategory};
use xpn_db::{DbSession, PgEmbeddingStore, PgFingerprintStore, PgHashIndexStore, PgMatchRepository, PgVendorAliasStore, TierUsageLogRepo};
use xpn_error::ExpenseError;
use xpn_metering::DescriptionUsage;
use xpn_service::{ExpenseEngine, UsageLogStore};

/// Exit code used for any failed command.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "xpn", version, about = "Expense engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the engine's TOML config file.
    #[arg(long, default_value = "xpn.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalizes a raw transaction description (C1 -> C3).
    Normalize {
        /// Owning user id.
        #[arg(long)]
        user: Uuid,
        /// The raw description as it appeared on the statement.
        #[arg(long)]
        description: String,
    },
    /// Suggests a GL code or department for a normalized description
    /// (C1 -> C2 -> C3).
    Suggest {
        /// Owning user id.
        #[arg(long)]
        user: Uuid,
        /// The already-normalized description.
        #[arg(long)]
        description: String,
        /// Which axis to suggest.
        #[arg(long, value_enum)]
        axis: Axis,
    },
    /// Runs the auto-match pass over a user's unmatched receipts (C8).
    AutoMatch {
        /// Owning user id.
        #[arg(long)]
        user: Uuid,
    },
    /// Prints a tier usage summary and vendor promotion candidates
    /// (C9).
    TierUsage {
        /// Owning user id.
        #[arg(long)]
        user: Uuid,
        /// Start of the reporting window, RFC 3339.
        #[arg(long)]
        since: DateTime<Utc>,
        /// End of the reporting window, RFC 3339.
        #[arg(long)]
        until: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum Axis {
    Gl,
    Department,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    xpn_telemetry::init_tracing(cli.debug);

    let result = run(cli).await;
    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::load(&cli.config)
        .with_context(|| format!("load config from {}", cli.config.display()))?;
    for warning in config.warnings() {
        tracing::warn!("{warning}");
    }

    let session = DbSession::connect(&config.database_url)
        .await
        .context("connect to postgres")?;
    let chat = http_chat_from_env();
    let receipt_repo = PgMatchRepository::new(session.clone());
    let engine = build_engine(session, chat, &config);

    match cli.command {
        Commands::Normalize { user, description } => {
            let resolution = engine
                .normalize(user, &description, None, &CancellationToken::new())
                .await?;
            println!("{}", serde_json::to_string_pretty(&resolution_json(&resolution))?);
        }
        Commands::Suggest { user, description, axis } => {
            let hint: Vec<VendorCategory> = Vec::new();
            let resolution = match axis {
                Axis::Gl => {
                    engine
                        .suggest_gl(user, &description, hint, None, &CancellationToken::new())
                        .await?
                }
                Axis::Department => {
                    engine
                        .suggest_department(user, &description, hint, None, &CancellationToken::new())
                        .await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&resolution_json(&resolution))?);
        }
        Commands::AutoMatch { user } => {
            let receipts = receipt_repo.unmatched_receipts(user).await?;
            let result = engine
                .run_auto_match(user, &receipts, &CancellationToken::new())
                .await?;
            println!(
                "processed {} receipts, {} proposed, {} ambiguous",
                result.processed, result.proposed, result.ambiguous
            );
        }
        Commands::TierUsage { user, since, until } => {
            let range: Range<DateTime<Utc>> = since..until;
            let usage = engine.tier_usage(user, range.clone(), None).await?;
            let candidates = engine.vendor_candidates(user, range).await?;
            println!("total calls: {}", usage.total);
            for (tier, rate) in &usage.tier_rates {
                println!("  {tier:?}: {:.1}%", rate * 100.0);
            }
            println!("estimated cost (tier 2/3 only): ${:.4}", usage.tiers.estimated_cost_usd(&Default::default()));
            if !candidates.is_empty() {
                println!("vendor candidates:");
                for c in &candidates {
                    println!("  {} ({:?}, tier3_count={})", c.description, c.priority, c.tier3_count);
                }
            }
        }
    }

    Ok(())
}

fn resolution_json(resolution: &xpn_tier_router::TierResolution) -> serde_json::Value {
    serde_json::json!({
        "value": resolution.value,
        "tier": resolution.tier,
        "confidence": resolution.confidence,
    })
}

fn http_chat_from_env() -> HttpChat {
    let endpoint = std::env::var("XPN_AI_ENDPOINT")
        .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
    let api_key = std::env::var("XPN_AI_API_KEY").unwrap_or_default();
    let model = std::env::var("XPN_AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    HttpChat::new(endpoint, api_key, model)
}

#[allow(clippy::type_complexity)]
fn build_engine(
    session: DbSession,
    chat: HttpChat,
    config: &EngineConfig,
) -> ExpenseEngine<
    PgHashIndexStore,
    PgEmbeddingStore,
    PgVendorAliasStore,
    HttpChat,
    PgFingerprintStore,
    PgMatchRepository,
    PgMatchRepository,
    TierUsageLogRepo,
> {
    ExpenseEngine::new(
        PgHashIndexStore::new(session.clone()),
        PgEmbeddingStore::new(session.clone()),
        PgVendorAliasStore::new(session.clone()),
        chat,
        PgFingerprintStore::new(session.clone()),
        PgMatchRepository::new(session.clone()),
        PgMatchRepository::new(session.clone()),
        TierUsageLogRepo::new(session),
        config,
    )
}

/// Implements the facade's usage-log seam against the durable
/// Postgres-backed repository. Lives here rather than in `xpn-service`
/// so that crate stays storage-agnostic; this binary already depends on
/// `xpn-db` for every other store.
#[async_trait]
impl UsageLogStore for TierUsageLogRepo {
    async fn insert(&self, log: &xpn_core::TierUsageLog) -> Result<(), ExpenseError> {
        TierUsageLogRepo::insert(self, log).await
    }

    async fn for_user_between(
        &self,
        user_id: Uuid,
        range: Range<DateTime<Utc>>,
    ) -> Result<Vec<xpn_core::TierUsageLog>, ExpenseError> {
        TierUsageLogRepo::for_user_between(self, user_id, range.start, range.end).await
    }

    async fn tier3_samples_between(
        &self,
        user_id: Uuid,
        range: Range<DateTime<Utc>>,
    ) -> Result<Vec<DescriptionUsage>, ExpenseError> {
        TierUsageLogRepo::tier3_samples_between(self, user_id, range.start, range.end).await
    }
}

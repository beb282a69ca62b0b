use predictive_insights::{
    audit::AuditLog,
    completion::{gemini::GeminiClient, CompletionService, DisabledCompletion},
    notify::{LogNotifier, Notifier, WebhookNotifier},
    sources::{HttpMarketDataSource, MarketDataSource, SyntheticMarketSource},
    store::{postgres::PgStore, InMemoryStore, PredictiveStore},
    Collaborators, MortgageSnapshot, PredictiveConfig, PredictiveOrchestrator,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEMO_SEED: u64 = 7;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let user_id = parse_user_arg()?;
    let config = PredictiveConfig::from_env()?;
    info!(regions = ?config.regions, "Predictive insights starting");

    let store: Arc<dyn PredictiveStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            info!("Using Postgres store");
            Arc::new(PgStore::connect_lazy(&url)?)
        }
        Err(_) => {
            warn!("DATABASE_URL not set, using in-memory store with demo borrowers");
            let store = InMemoryStore::new();
            for mortgage in demo_mortgages(&config.regions) {
                store.upsert_mortgage(&mortgage).await?;
            }
            Arc::new(store)
        }
    };

    let source: Arc<dyn MarketDataSource> = match std::env::var("MARKET_DATA_BASE_URL") {
        Ok(url) => Arc::new(HttpMarketDataSource::new(&url)?),
        Err(_) => Arc::new(SyntheticMarketSource::current(
            config.simulation_seed.unwrap_or(DEMO_SEED),
        )),
    };

    let completion: Arc<dyn CompletionService> = match std::env::var("GEMINI_API_KEY") {
        Ok(key) => Arc::new(GeminiClient::new(key)?),
        Err(_) => {
            warn!("GEMINI_API_KEY not set, rationales use deterministic fallbacks");
            Arc::new(DisabledCompletion)
        }
    };

    let notifier: Arc<dyn Notifier> = match std::env::var("ALERT_WEBHOOK_URL") {
        Ok(url) => Arc::new(WebhookNotifier::new(&url)?),
        Err(_) => Arc::new(LogNotifier),
    };

    let orchestrator = PredictiveOrchestrator::new(
        config,
        Collaborators {
            store,
            source,
            completion,
            notifier,
            audit: Arc::new(AuditLog::new()),
        },
    )?;

    let summary = orchestrator.run_predictive_insights_pipeline().await;
    match user_id {
        Some(user_id) => {
            let insights = orchestrator.run_user_predictive_insights(user_id).await;
            println!("{}", serde_json::to_string_pretty(&insights)?);
        }
        None => println!("{}", serde_json::to_string_pretty(&summary)?),
    }

    Ok(())
}

/// `--user <uuid>` prints one borrower's insights instead of the run summary
fn parse_user_arg() -> Result<Option<Uuid>, Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--user" {
            let value = args.next().ok_or("--user requires a UUID")?;
            return Ok(Some(Uuid::parse_str(&value)?));
        }
    }
    Ok(None)
}

fn demo_mortgages(regions: &[String]) -> Vec<MortgageSnapshot> {
    regions
        .iter()
        .enumerate()
        .flat_map(|(i, region)| {
            [7.9, 6.1].into_iter().map(move |rate| MortgageSnapshot {
                user_id: Uuid::new_v4(),
                region: region.clone(),
                current_rate: rate,
                balance: 350_000.0 + 25_000.0 * i as f64,
                property_value: 560_000.0,
                credit_score: 740,
                annual_income: 145_000.0,
                monthly_debts: 450.0,
                remaining_term_months: 312,
                active: true,
            })
        })
        .collect()
}

//! Predictive Insights
//!
//! Batch and per-user predictive analytics for mortgage portfolios:
//! - Ingests market series (rates, property values, income, indices) per region
//! - Forecasts rates and property values with confidence scores
//! - Scores refinance likelihood and maintains a prioritized watchlist
//! - Searches what-if levers for Pareto-optimal recommendations
//! - Runs seeded Monte Carlo stress tests and deterministic rate shocks
//! - Explains forecasts and audits model fairness and compliance
//!
//! PIPELINE:
//! INGEST → FORECAST → WATCHLIST → PRESCRIBE → SIMULATE → EXPLAIN → SUMMARIZE

pub mod affordability;
pub mod agents;
pub mod audit;
pub mod completion;
pub mod compliance;
pub mod config;
pub mod error;
pub mod modeling;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod sources;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use config::PredictiveConfig;
pub use orchestrator::{Collaborators, PredictiveOrchestrator};

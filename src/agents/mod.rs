//! Pipeline agents
//!
//! Each agent is an explicitly constructed value holding shared handles to
//! its collaborators. Agents are cheap to clone.

pub mod explainability;
pub mod forecasting;
pub mod ingestion;
pub mod prescriptive;
pub mod refinance;
pub mod simulation;

pub use explainability::ExplainabilityAgent;
pub use forecasting::ForecastingAgent;
pub use ingestion::{DataIngestionAgent, IngestionReport};
pub use prescriptive::PrescriptiveAgent;
pub use refinance::RefinanceAgent;
pub use simulation::ScenarioSimulator;

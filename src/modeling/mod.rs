//! Pluggable statistical strategies
//!
//! Agents depend only on the `ForecastModel` and `SimulationModel` traits so a
//! fitted statistical or ML model can replace the defaults without touching
//! pipeline control flow.

pub mod forecast;
pub mod simulation;

pub use forecast::{DampedTrendModel, FlatModel, ForecastModel, Projection};
pub use simulation::{summarize, GaussianShockModel, SimulationModel, Volatility};

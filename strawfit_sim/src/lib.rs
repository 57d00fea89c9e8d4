//! strawfit Simulation and Validation Harness
//!
//! Runs the track fit against tracks whose truth is known. Everything is
//! derived from a single 64-bit seed, so a failing run can be replayed
//! exactly.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        SimWorld                           │
//! │  ┌────────────┐  hits + seed  ┌──────────────────────┐    │
//! │  │   Oracle   │──────────────►│  KalFit<StrawDetector>│    │
//! │  │ (truth)    │               └──────────┬───────────┘    │
//! │  └─────┬──────┘                          │ FitResult      │
//! │        │ truth                           ▼                │
//! │        └─────────────────────►  ValidationSession         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use strawfit_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42, 20);
//! let result = runner.run(ScenarioId::Conversion);
//! assert!(result.passed);
//! ```

mod error;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;
mod world;

pub use error::SimError;
pub use exporter::{SimExport, TrackExport};
pub use oracle::{GeneratedTrack, Oracle};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{SimConfig, SimWorld};

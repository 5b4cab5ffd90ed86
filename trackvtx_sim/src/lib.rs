//! trackvtx simulation harness
//!
//! Builds synthetic events with known vertices and runs the full vertex
//! search over them.
//!
//! # Core Principle: Seeded Events
//!
//! Every source of randomness (vertex positions, track directions, node
//! smearing) is derived from a single 64-bit seed, so a failing run can be
//! replayed exactly.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                        │
//! │  ┌─────────────┐   TrackGraph    ┌────────────────────┐   │
//! │  │ EventOracle │ ──────────────► │    VertexFinder    │   │
//! │  │ (truth +    │   + tracks      │ pairs → merge →    │   │
//! │  │  smearing)  │                 │ select → commit    │   │
//! │  └──────┬──────┘                 └─────────┬──────────┘   │
//! │         │ truth vertices                   │ vertices     │
//! │         └──────────────► evaluate ◄────────┘              │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use trackvtx_sim::{ScenarioRunner, SimConfig};
//! use trackvtx_sim::scenarios::ScenarioId;
//!
//! let result = ScenarioRunner::new(42)
//!     .with_config(SimConfig::default())
//!     .run(ScenarioId::Crossing);
//! assert!(result.passed);
//! ```

mod config;
mod oracle;
mod runner;
pub mod scenarios;
pub mod vertexing;

pub use config::{SimConfig, SimError};
pub use oracle::{EventConfig, EventOracle, TruthVertex};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use vertexing::{FinderConfig, FinderStats, VertexFinder, VertexingResult};

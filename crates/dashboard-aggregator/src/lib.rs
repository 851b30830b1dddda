//! Dashboard aggregation: reads the legacy or V2 tables, derives the
//! synthesized fields and assembles one `DashboardSnapshot` per pass.

pub mod assembler;
pub mod config;
pub mod derive;
pub mod fetch;
pub mod reconciler;
pub mod relevance;

pub use assembler::DashboardAggregator;
pub use config::{DashboardConfig, FeatureFlags};
pub use reconciler::SchemaPath;
pub use relevance::RelevanceRules;

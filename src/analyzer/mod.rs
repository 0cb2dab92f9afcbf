// Batch market statistics and opportunity scoring.

pub mod market;
pub mod scoring;

pub use market::MarketAnalyzer;
pub use scoring::{DefaultScoringPolicy, ScoringContext, ScoringPolicy};

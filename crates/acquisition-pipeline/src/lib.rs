pub mod cache;
pub mod crosscheck;
pub mod freshness;
pub mod fundamentals;
pub mod news;
pub mod pipeline;
pub mod quotes;
pub mod redact;
pub mod snapshot;

pub use cache::{CacheStore, Dataset};
pub use crosscheck::{cross_check, variance_pct, CrossCheckReport, CrossCheckThresholds};
pub use freshness::{evaluate_freshness, FreshnessReport, FreshnessSla};
pub use fundamentals::{build_ttm, merge_ttm_table};
pub use pipeline::{universe_tickers, Acquired, AcquisitionPipeline, PipelineConfig, UniverseAcquisition};
pub use redact::{redact, redact_all};
pub use snapshot::comparable_row;

#[cfg(test)]
mod tests;

pub mod candidates;
pub mod collector;
pub mod enricher;
pub mod fetcher;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use candidates::CandidateBuilder;
pub use collector::{CollectError, ListingCollector};
pub use enricher::DetailEnricher;
pub use fetcher::HttpPageFetcher;
pub use traits::PageFetcher;

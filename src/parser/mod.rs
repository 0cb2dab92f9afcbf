pub mod html_parser;

use crate::model::{ListingDetails, ListingSummary, ParserError};

pub use html_parser::HtmlListingParser;

/// Site-specific markup rules. The pipeline only depends on this trait.
pub trait ListingParser: Send + Sync {
    /// Zero or more summaries from a search-results page.
    fn parse_search(&self, html: &str, page_url: &str) -> Result<Vec<ListingSummary>, ParserError>;

    /// Detail page merged over its summary.
    fn parse_detail(&self, html: &str, summary: &ListingSummary) -> Result<ListingDetails, ParserError>;
}

pub mod job_runs;
pub mod query;
pub mod sqlite;

pub use query::ListingQuery;
pub use sqlite::SqliteStorage;

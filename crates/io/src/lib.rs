// Storage and feed import for circuitmap

pub mod feed;
pub mod sqlite;

pub use feed::{FeedError, FeedLoad, SkippedRecord};
pub use sqlite::{SqliteStore, SCHEMA_VERSION};

pub mod config;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod model;
pub mod query;
pub mod server;
pub mod storage;

pub use error::Error;
pub use filter::Filter;
pub use query::Analyzer;

pub mod api;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod logger;
pub mod refresh;
pub mod store;

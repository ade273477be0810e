pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod normalizer;
pub mod pipeline;
pub mod sources;
pub mod types;

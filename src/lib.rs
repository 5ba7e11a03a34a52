pub mod analyzer;
pub mod app;
pub mod cache;
pub mod client;
pub mod config;
pub mod content;
pub mod db;
pub mod models;
pub mod prompt;
pub mod repair;
pub mod report;
pub mod router;
pub mod scoring;
pub mod store;

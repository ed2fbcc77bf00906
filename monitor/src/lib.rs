//! Transaction monitoring service library

pub mod app;
pub mod audit;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod queries;
pub mod rules;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod summarizer;

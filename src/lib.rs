pub mod app;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod output;
pub mod plan;
pub mod query;
pub mod store;
pub mod unpack;

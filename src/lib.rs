pub mod batch;
pub mod config;
pub mod fetch_error;
pub mod fetcher;
pub mod services;
pub mod store;
pub mod utils;

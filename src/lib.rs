pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod output;
pub mod pool;
pub mod species;
pub mod store;
pub mod tui;
pub mod worker;

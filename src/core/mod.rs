pub mod config;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod lifecycle;
pub mod logs;
pub mod orchestrator;
pub mod registry;
pub mod store;
pub mod terminal;
pub mod types;

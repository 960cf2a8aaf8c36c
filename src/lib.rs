pub mod agent;
pub mod apps;
pub mod channel;
pub mod config;
pub mod error;
pub mod fetch;
pub mod flow;
pub mod logger;
pub mod search;

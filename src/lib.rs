pub mod client;
pub mod config;
pub mod error;
pub mod fragment;
pub mod logger;
pub mod page;
pub mod rpc;
pub mod scenarios;
pub mod server;

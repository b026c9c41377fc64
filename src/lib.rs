pub mod commands;
pub mod config;
pub mod error;
pub mod grpc;
pub mod performance;
pub mod ui;
pub mod utils;

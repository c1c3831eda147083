//! Chatload Server Library
//!
//! This module exports the load-driving engine, the chat service
//! clients, and the trigger API for use in integration tests and
//! external tooling.

pub mod client;
pub mod codec;
pub mod config;
pub mod engine;
pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use client::{BootstrapClient, ChannelConnector, HttpBootstrapClient, WsConnector};
pub use config::Config;
pub use engine::{LoadRunner, LoadTestSummary, SessionContext, SessionEngine};
pub use server::AppState;

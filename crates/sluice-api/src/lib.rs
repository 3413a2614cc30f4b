//! HTTP boundary and configuration for the sluice gateway.
//!
//! Translates HTTP requests into rate-gate checks and admission attempts, and
//! admission results back into status codes. The core crates know nothing of
//! HTTP; everything protocol-specific lives here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use server::{create_router, start_server, AppState};

//! Library crate for ghostscan exposing the engine modules.
pub mod config;
pub mod dialer;
pub mod error;
pub mod geo;
pub mod harvest;
pub mod http;
pub mod identity;
pub mod intel;
pub mod logging;
pub mod pipeline;
pub mod ports;
pub mod probe;
pub mod proxy;
pub mod recon;
pub mod scanner;
pub mod server;
pub mod store;
pub mod targets;
pub mod types;

pub use error::{Error, Result};

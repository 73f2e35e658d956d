//! Token models and the authenticating client that keeps them fresh.

pub mod client;
pub mod metrics;
pub mod token;

pub use client::*;
pub use metrics::LoginMetrics;
pub use token::{record::*, secret::*};

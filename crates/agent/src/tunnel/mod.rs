//! Reverse tunnel client (spec §4.4).

mod backoff;
mod client;

pub use client::{TunnelClient, TunnelState};

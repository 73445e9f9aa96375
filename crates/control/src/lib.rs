//! Control plane library: tenant & quota guard, enrollment, agent
//! registry, workflow store, campaign engine, dispatch client, SQLite
//! persistence, audit batching, and the thin HTTP surface that wires
//! them together.

pub mod audit;
pub mod cli;
pub mod config;
pub mod db;
pub mod http;
pub mod logging;
pub mod services;

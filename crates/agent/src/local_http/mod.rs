//! The agent's local HTTP surface (spec §6), addressed by the control
//! plane over the reverse tunnel rather than a bound port.

mod router;
mod wire;

pub use router::{AgentConfigSnapshot, LocalRouter};

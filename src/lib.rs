//! Vigia - live call-graph sampling agent
//!
//! This library continuously samples the call stacks of a running external
//! JVM through the HotSpot attach protocol, aggregates observed
//! caller→callee relationships into a weighted call graph, and exposes the
//! graph over a minimal HTTP-shaped protocol to a polling monitor client.

pub mod assets;
pub mod attach;
pub mod cli;
pub mod error;
pub mod frame;
pub mod model;
pub mod sampler;
pub mod server;

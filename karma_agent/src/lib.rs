//! Heartbeat scheduler, per-role agent runtime, and CLI entrypoint for
//! KarmaCadabra agents (C8/C9): composes C1-C7 into a `RuntimeContext` and
//! drives it tick by tick through one of six `RolePlan` implementations.

pub mod budget;
pub mod config;
pub mod error;
pub mod rate_limiter;
pub mod reputation;
pub mod roles;
pub mod runtime;
pub mod scheduler;
pub mod supply_chain;

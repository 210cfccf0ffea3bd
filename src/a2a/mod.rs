//! Agent-to-Agent 委派记录

pub mod tracker;

pub use tracker::{A2AStats, DelegationPhase, DelegationRecord, DelegationTracker};

//! fulfillment-core — the operations-control layer for the order pipeline.
//!
//! RULES:
//!   - Engines are triggered externally; there is no in-process timer.
//!   - Every status write goes through the state machine in `status`.
//!   - Only the `store` modules execute SQL.
//!   - Thresholds and cutoffs are configuration, validated at construction.

pub mod carrier;
pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod notify;
pub mod pickup_engine;
pub mod policy_engine;
pub mod reporting;
pub mod returns_engine;
pub mod risk_engine;
pub mod status;
pub mod store;
pub mod types;

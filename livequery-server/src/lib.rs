//! # Live Query Server
//!
//! Replica process around the live query store: wires the configured store
//! backend and campaign database, runs the cleanup reconciler, and offers
//! read-only diagnostics over the shared store.

pub mod infra;

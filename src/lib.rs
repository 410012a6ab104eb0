//! Session State Store - Exclusive-lock web session storage
//!
//! This crate persists web session payloads in a document collection and
//! serializes writers through a lock embedded in each record. Every lock
//! carries a fencing token so that writes from a holder that lost the lock
//! are dropped. Expired sessions are evicted by the reader that finds them.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;

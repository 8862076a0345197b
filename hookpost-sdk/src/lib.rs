//! Shared wire types for hookpost webhook deliveries.
//!
//! This crate is what both sides of a delivery agree on: the JSON envelope,
//! the header names, the HMAC signing scheme and the payload digest used as
//! an idempotency key. Receivers only need this crate to authenticate and
//! deduplicate incoming deliveries.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod objects;
pub mod receiver;
pub mod signature;

//! Durable fan-out and signed delivery of webhook events.
//!
//! [`processors::Emitter`] persists one delivery row per matching
//! subscription; [`processors::Dispatcher`] delivers due rows with bounded
//! retries and exponential backoff. Storage sits behind
//! [`repository::WebhookRepository`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod entities;
pub mod framework;
pub mod processors;
pub mod repository;
pub mod utils;

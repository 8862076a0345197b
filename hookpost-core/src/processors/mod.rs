//! The two halves of webhook delivery.
//!
//! - `Emitter`: turns a domain event into one `pending` row per matching subscription
//! - `Dispatcher`: claims due rows, delivers them and advances their state

pub mod dispatcher;
pub mod emitter;

pub use dispatcher::{BatchReport, DeliveryError, DispatchError, Dispatcher};
pub use emitter::{DomainEvent, EmitError, EmitReport, Emitter};

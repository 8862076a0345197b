//! Configuration types for the delivery core.
//!
//! These are validated runtime values. Reading them from a file or the
//! environment is handled by the server crate.

mod dispatch;
mod fanout;

pub use dispatch::{DEFAULT_RESPONSE_BODY_LIMIT, DispatchPolicy};
pub use fanout::FanoutDefaults;

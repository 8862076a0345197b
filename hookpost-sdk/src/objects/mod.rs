//! Wire objects exchanged between the dispatcher and webhook receivers.

pub mod envelope;

pub use envelope::DeliveryEnvelope;

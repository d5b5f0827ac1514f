pub mod client;
pub mod error;
pub mod types;

pub use client::{PaymentProcessor, StripeClient};
pub use error::{ProcessorError, ProcessorResult};
pub use types::{IntentStatus, PaymentIntent};

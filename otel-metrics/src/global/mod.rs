//! Process-wide facilities shared by every meter provider.
//!
//! * [`handle_error`] is the diagnostic side channel. Problems that must not
//!   interrupt the instrumented code are reported here and never returned.
//! * [`DelegatedObservable`] lets instrumentation hold an observable handle
//!   before a concrete provider exists and bind it later.
//! * The `otel_*!` macros emit the SDK's internal logs.

mod delegate;
mod error_handler;
mod internal_logging;

pub use delegate::DelegatedObservable;
pub use error_handler::{handle_error, set_error_handler, Error};

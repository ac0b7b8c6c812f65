#![allow(unused_macros)]
//! Internal diagnostics for the metrics pipeline.
//!
//! **Note**: These macros (`otel_info!`, `otel_warn!`, `otel_debug!`, and
//! `otel_error!`) are intended to be used **internally** by the SDK and by
//! custom readers, exporters and other plugins. They are not designed for
//! general application logging.
//!
//! With the `internal-logs` feature enabled every macro emits a `tracing`
//! event whose target is the emitting crate and whose `name` field is the
//! operation being logged. Under `cfg(test)` the event is also printed to
//! stdout so `--nocapture` runs show the pipeline's decisions.

#[doc(hidden)]
#[macro_export]
macro_rules! __otel_log {
    ($level:ident, $label:literal, $name:expr $(, $key:ident = $value:expr)*) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::$level!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name $(, $key = $value)*);
        }

        #[cfg(test)]
        {
            print!(concat!($label, ": name={}"), $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )*
            print!("\n");
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name $(, $value)*); // Compiler will optimize this out as it's unused.
        }
    };
}

/// Log an informational event.
///
/// # Example:
/// ```rust
/// use otel_metrics::otel_info;
/// otel_info!(name: "MeterProvider.Built", readers = 2);
/// ```
#[macro_export]
macro_rules! otel_info {
    (name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::__otel_log!(info, "otel_info", $name $(, $key = $value)*)
    };
}

/// Log a warning event.
///
/// # Example:
/// ```rust
/// use otel_metrics::otel_warn;
/// otel_warn!(name: "Instrument.Conflict", instrument_name = "requests");
/// ```
#[macro_export]
macro_rules! otel_warn {
    (name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::__otel_log!(warn, "otel_warn", $name $(, $key = $value)*)
    };
}

/// Log a debug event.
///
/// # Example:
/// ```rust
/// use otel_metrics::otel_debug;
/// otel_debug!(name: "Pipeline.Collect", scopes = 3);
/// ```
#[macro_export]
macro_rules! otel_debug {
    (name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::__otel_log!(debug, "otel_debug", $name $(, $key = $value)*)
    };
}

/// Log an error event.
///
/// # Example:
/// ```rust
/// use otel_metrics::otel_error;
/// otel_error!(name: "PeriodicReader.ExportFailed", message = "connection refused");
/// ```
#[macro_export]
macro_rules! otel_error {
    (name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::__otel_log!(error, "otel_error", $name $(, $key = $value)*)
    };
}

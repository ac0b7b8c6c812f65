use std::sync::{PoisonError, RwLock};

use crate::metrics::MetricsError;

static GLOBAL_ERROR_HANDLER: RwLock<Option<ErrorHandler>> = RwLock::new(None);

/// Errors reported through the diagnostic side channel.
///
/// Run-time problems that must not interrupt the instrumented code, such as an
/// observation made against an instrument that is not registered for the
/// running callback, are funneled here instead of being returned.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// An issue raised by the metrics pipeline.
    #[error(transparent)]
    Metric(#[from] MetricsError),

    /// Free-form message.
    #[error("{0}")]
    Other(String),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(err: PoisonError<T>) -> Self {
        Error::Other(format!("error handler lock poisoned: {err}"))
    }
}

struct ErrorHandler(Box<dyn Fn(Error) + Send + Sync>);

/// Passes `err` to the installed handler, or prints it to stderr when none is
/// installed.
pub fn handle_error<T: Into<Error>>(err: T) {
    let err = err.into();
    match GLOBAL_ERROR_HANDLER.read() {
        Ok(guard) => match guard.as_ref() {
            Some(handler) => (handler.0)(err),
            None => report_to_stderr(err),
        },
        Err(_) => report_to_stderr(err),
    }
}

fn report_to_stderr(err: Error) {
    match err {
        Error::Metric(err) => eprintln!("otel-metrics: {err}"),
        Error::Other(msg) => eprintln!("otel-metrics: {msg}"),
    }
}

/// Installs the process wide error handler, replacing any earlier one.
pub fn set_error_handler<F>(f: F) -> std::result::Result<(), Error>
where
    F: Fn(Error) + Send + Sync + 'static,
{
    GLOBAL_ERROR_HANDLER
        .write()
        .map(|mut handler| *handler = Some(ErrorHandler(Box::new(f))))
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn installed_handler_receives_errors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        set_error_handler(move |err| sink.lock().unwrap().push(err.to_string())).unwrap();

        handle_error(MetricsError::Other("handler-test-marker".into()));
        handle_error(Error::Other("plain".into()));

        let seen = seen.lock().unwrap();
        assert!(seen.iter().any(|msg| msg.contains("handler-test-marker")));
        assert!(seen.iter().any(|msg| msg == "plain"));
    }
}

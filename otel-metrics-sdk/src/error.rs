//! Errors returned by collection, flush and shutdown operations.
use otel_metrics::metrics::MetricsError;
use std::fmt;
use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while collecting, flushing or shutting down.
///
/// Returned by readers, exporters and the meter provider.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OTelSdkError {
    /// Shutdown has already been invoked.
    ///
    /// Every collect, flush or shutdown call made after a successful shutdown
    /// returns this error and has no other effect.
    #[error("Shutdown already invoked")]
    AlreadyShutdown,

    /// Operation timed out before completing.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation failed due to an internal error.
    ///
    /// Combined errors from several independent operations are also reported
    /// with this variant, one message per failure.
    #[error("Operation failed: {0}")]
    InternalFailure(String),
}

impl<T> From<PoisonError<T>> for OTelSdkError {
    fn from(err: PoisonError<T>) -> Self {
        OTelSdkError::InternalFailure(format!("lock poisoned: {}", err))
    }
}

/// A specialized `Result` type for collect, flush and shutdown operations.
pub type OTelSdkResult = Result<(), OTelSdkError>;

/// Errors that several failures can be folded into.
pub(crate) trait Merge: fmt::Display + Sized {
    /// Wraps the bracketed list of every failure message.
    fn merged(messages: String) -> Self;
}

impl Merge for OTelSdkError {
    fn merged(messages: String) -> Self {
        OTelSdkError::InternalFailure(messages)
    }
}

impl Merge for MetricsError {
    fn merged(messages: String) -> Self {
        MetricsError::Other(messages)
    }
}

/// Folds the outcome of several independent operations into one result.
///
/// Every result is consumed, so callers should produce them eagerly. A single
/// failure is returned unchanged which keeps distinguished errors such as
/// [`OTelSdkError::AlreadyShutdown`] intact; two or more failures are merged
/// into one error listing each message in order.
pub(crate) fn combine<E, I>(results: I) -> Result<(), E>
where
    E: Merge,
    I: IntoIterator<Item = Result<(), E>>,
{
    let mut errs: Vec<E> = results.into_iter().filter_map(Result::err).collect();
    match errs.len() {
        0 => Ok(()),
        1 => Err(errs.remove(0)),
        _ => {
            let messages: Vec<String> = errs.iter().map(ToString::to_string).collect();
            Err(E::merged(format!("[{}]", messages.join(", "))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_all_ok() {
        assert!(combine::<OTelSdkError, _>(vec![Ok(()), Ok(())]).is_ok());
        assert!(combine::<OTelSdkError, _>(Vec::new()).is_ok());
    }

    #[test]
    fn combine_keeps_single_error() {
        let result = combine(vec![Ok(()), Err(OTelSdkError::AlreadyShutdown), Ok(())]);
        assert!(matches!(result, Err(OTelSdkError::AlreadyShutdown)));
    }

    #[test]
    fn combine_lists_every_failure() {
        let result = combine(vec![
            Err(OTelSdkError::InternalFailure("first".into())),
            Ok(()),
            Err(OTelSdkError::Timeout(Duration::from_secs(1))),
        ]);

        match result {
            Err(OTelSdkError::InternalFailure(msg)) => {
                assert!(msg.contains("first"), "{msg}");
                assert!(msg.contains("timed out"), "{msg}");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn combine_merges_metrics_errors_the_same_way() {
        let single = combine([Err(MetricsError::Config("bad unit".into())), Ok(())]);
        assert!(matches!(single, Err(MetricsError::Config(msg)) if msg == "bad unit"));

        let merged = combine([
            Err(MetricsError::Config("bad unit".into())),
            Err(MetricsError::Other("callback failed".into())),
        ]);
        match merged {
            Err(MetricsError::Other(msg)) => assert_eq!(
                msg,
                "[Config error bad unit, Metrics error: callback failed]"
            ),
            other => panic!("unexpected result {other:?}"),
        }
    }
}

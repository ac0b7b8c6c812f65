use otel_metrics::metrics::{MetricsError, Result};
use otel_metrics::otel_debug;
use regex::Regex;

use super::instrument::{Instrument, Stream};

fn empty_view(_inst: &Instrument) -> Option<Stream> {
    None
}

/// Used to customize the metrics that are output by the SDK.
///
/// Here are some examples when a [View] might be needed:
///
/// * Customize which Instruments are to be processed/ignored. For example, an
///   instrumented library can provide both temperature and humidity, but the
///   application developer might only want temperature.
/// * Customize the aggregation - if the default aggregation associated with the
///   [Instrument] does not meet the needs of the user. For example, an HTTP client
///   library might expose HTTP client request duration as Histogram by default,
///   but the application developer might only want the total count of outgoing
///   requests.
/// * Customize which attribute(s) are to be reported on metrics. For example,
///   an HTTP server library might expose HTTP verb (e.g. GET, POST) and HTTP
///   status code (e.g. 200, 301, 404). The application developer might only care
///   about HTTP status code (e.g. reporting the total count of HTTP requests for
///   each HTTP status code). There could also be extreme scenarios in which the
///   application developer does not need any attributes (e.g. just get the total
///   count of all incoming requests).
///
/// # Example Custom View
///
/// View is implemented for all `Fn(&Instrument) -> Option<Stream>`.
///
/// ```
/// use otel_metrics_sdk::metrics::{Instrument, SdkMeterProvider, Stream};
///
/// // return streams for the given instrument
/// let my_view = |i: &Instrument| {
///   // return Some(Stream) or
///   None
/// };
///
/// let provider = SdkMeterProvider::builder().with_view(my_view).build();
/// # drop(provider)
/// ```
pub trait View: Send + Sync + 'static {
    /// Defines how data should be collected for certain instruments.
    ///
    /// Return [Stream] to use for matching [Instrument]s,
    /// otherwise if there is no match, return `None`.
    fn match_inst(&self, inst: &Instrument) -> Option<Stream>;
}

impl<T> View for T
where
    T: Fn(&Instrument) -> Option<Stream> + Send + Sync + 'static,
{
    fn match_inst(&self, inst: &Instrument) -> Option<Stream> {
        self(inst)
    }
}

impl View for Box<dyn View> {
    fn match_inst(&self, inst: &Instrument) -> Option<Stream> {
        (**self).match_inst(inst)
    }
}

/// Creates a [View] that applies the [Stream] mask for all instruments that
/// match criteria.
///
/// The returned [View] will only apply the mask if all non-empty fields of
/// criteria match the corresponding [Instrument] passed to the view. If all
/// fields of the criteria are their default values, a view that matches no
/// instruments is returned. If you need to match an empty-value field, create a
/// [View] directly.
///
/// The [Instrument::name] field of criteria supports wildcard pattern matching.
/// The wildcard `*` is recognized as matching zero or more characters, and `?`
/// is recognized as matching exactly one character. For example, a pattern of
/// `*` will match all instrument names.
///
/// The [Stream] mask only applies updates for non-empty fields. By default, the
/// [Instrument] the [View] matches against will be use for the name,
/// description, and aggregation of the output [Stream].
///
/// # Example
///
/// ```
/// use otel_metrics_sdk::metrics::{new_view, Aggregation, Instrument, Stream};
///
/// let criteria = Instrument::new().with_name("counter_*");
/// let mask = Stream::builder()
///     .with_aggregation(Aggregation::Sum)
///     .build()
///     .unwrap();
///
/// let view = new_view(criteria, mask);
/// # drop(view);
/// ```
pub fn new_view(criteria: Instrument, mask: Stream) -> Result<Box<dyn View>> {
    if criteria.is_empty() {
        otel_debug!(
            name: "View.NoCriteria",
            message = "no criteria provided, dropping view"
        );
        return Ok(Box::new(empty_view));
    }
    let contains_wildcard = criteria.name.contains(['*', '?']);

    let match_fn: Box<dyn Fn(&Instrument) -> bool + Send + Sync> = if contains_wildcard {
        if mask.name.is_some() {
            return Err(MetricsError::Config(format!(
                "invalid view: name \"{}\" with wildcard cannot rename its streams",
                criteria.name
            )));
        }

        let pattern = wildcard_pattern(&criteria.name)?;
        Box::new(move |i| pattern.is_match(&i.name))
    } else {
        let name = criteria.name.clone();
        Box::new(move |i| name.is_empty() || i.name.eq_ignore_ascii_case(&name))
    };

    if let Some(aggregation) = &mask.aggregation {
        aggregation.validate().map_err(|err| {
            MetricsError::Config(format!("invalid view: aggregation: {}", err))
        })?;
    }

    Ok(Box::new(move |i: &Instrument| -> Option<Stream> {
        if match_fn(i)
            && criteria.matches_description(i)
            && criteria.matches_kind(i)
            && criteria.matches_unit(i)
            && criteria.matches_scope(i)
        {
            Some(Stream {
                name: Some(mask.name.clone().unwrap_or_else(|| i.name.clone())),
                description: Some(
                    mask.description
                        .clone()
                        .unwrap_or_else(|| i.description.clone()),
                ),
                unit: Some(mask.unit.clone().unwrap_or_else(|| i.unit.clone())),
                aggregation: mask.aggregation.clone(),
                allowed_attribute_keys: mask.allowed_attribute_keys.clone(),
                cardinality_limit: mask.cardinality_limit,
            })
        } else {
            None
        }
    }))
}

/// Turns a name pattern into an anchored regex, `*` matching any run of
/// characters and `?` exactly one.
fn wildcard_pattern(name: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(name.len() + 8);
    pattern.push_str("^(?i)");
    for c in name.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|err| MetricsError::Config(format!("invalid view: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Aggregation, InstrumentKind};
    use otel_metrics::InstrumentationScope;

    fn counter(name: &'static str) -> Instrument {
        Instrument::new()
            .with_name(name)
            .with_kind(InstrumentKind::Counter)
            .with_unit("1")
            .with_scope(InstrumentationScope::builder("lib").with_version("1.0").build())
    }

    #[test]
    fn empty_criteria_matches_nothing() {
        let view = new_view(Instrument::new(), Stream::default()).unwrap();
        assert!(view.match_inst(&counter("anything")).is_none());
    }

    #[test]
    fn wildcards_match_names() {
        let view = new_view(Instrument::new().with_name("http.*.count?"), Stream::default()).unwrap();
        assert!(view.match_inst(&counter("http.server.counts")).is_some());
        assert!(view.match_inst(&counter("HTTP.client.count2")).is_some());
        assert!(view.match_inst(&counter("http.server.count")).is_none());
        assert!(view.match_inst(&counter("rpc.server.counts")).is_none());

        let all = new_view(Instrument::new().with_name("*"), Stream::default()).unwrap();
        assert!(all.match_inst(&counter("x")).is_some());
    }

    #[test]
    fn wildcard_with_rename_is_rejected() {
        let mask = Stream::builder().with_name("renamed").build().unwrap();
        assert!(matches!(
            new_view(Instrument::new().with_name("req*"), mask),
            Err(MetricsError::Config(_))
        ));
    }

    #[test]
    fn mask_overrides_set_fields_only() {
        let mask = Stream::builder()
            .with_name("requests_total")
            .with_aggregation(Aggregation::Drop)
            .build()
            .unwrap();
        let view = new_view(Instrument::new().with_name("Requests"), mask).unwrap();

        let stream = view.match_inst(&counter("requests")).unwrap();
        assert_eq!(stream.name.as_deref(), Some("requests_total"));
        assert_eq!(stream.unit.as_deref(), Some("1"));
        assert_eq!(stream.aggregation, Some(Aggregation::Drop));
    }

    #[test]
    fn every_set_criterion_must_match() {
        let criteria = Instrument::new()
            .with_kind(InstrumentKind::Histogram)
            .with_scope(InstrumentationScope::builder("lib").build());
        let view = new_view(criteria, Stream::default()).unwrap();
        assert!(view.match_inst(&counter("requests")).is_none());

        let criteria = Instrument::new()
            .with_unit("1")
            .with_scope(InstrumentationScope::builder("lib").with_version("2.0").build());
        let view = new_view(criteria, Stream::default()).unwrap();
        assert!(view.match_inst(&counter("requests")).is_none());

        let criteria = Instrument::new()
            .with_unit("1")
            .with_scope(InstrumentationScope::builder("lib").build());
        let view = new_view(criteria, Stream::default()).unwrap();
        assert!(view.match_inst(&counter("requests")).is_some());
    }
}

use otel_metrics::KeyValue;

/// Returns the canonical form of an attribute list: ordered by key with
/// duplicate keys removed.
///
/// When a key appears more than once the last value wins, matching the
/// behaviour users expect from writing the same key twice.
pub(crate) fn sort_and_dedup(attrs: &[KeyValue]) -> Vec<KeyValue> {
    let mut sorted = attrs.to_vec();
    // stable sort keeps duplicates in call order
    sorted.sort_by(|a, b| a.key.cmp(&b.key));

    let mut canonical: Vec<KeyValue> = Vec::with_capacity(sorted.len());
    for kv in sorted {
        match canonical.last_mut() {
            Some(last) if last.key == kv.key => *last = kv,
            _ => canonical.push(kv),
        }
    }
    canonical
}

/// Returns `true` if `attrs` is already in canonical form.
pub(crate) fn is_canonical(attrs: &[KeyValue]) -> bool {
    attrs.windows(2).all(|pair| pair[0].key < pair[1].key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_does_not_matter() {
        let a = sort_and_dedup(&[KeyValue::new("b", 2), KeyValue::new("a", 1)]);
        let b = sort_and_dedup(&[KeyValue::new("a", 1), KeyValue::new("b", 2)]);
        assert_eq!(a, b);
        assert!(is_canonical(&a));
    }

    #[test]
    fn last_duplicate_wins() {
        let attrs = sort_and_dedup(&[
            KeyValue::new("k", "first"),
            KeyValue::new("a", 1),
            KeyValue::new("k", "second"),
        ]);
        assert_eq!(
            attrs,
            vec![KeyValue::new("a", 1), KeyValue::new("k", "second")]
        );
    }

    #[test]
    fn duplicates_are_not_canonical() {
        assert!(!is_canonical(&[KeyValue::new("k", 1), KeyValue::new("k", 2)]));
        assert!(is_canonical(&[]));
    }
}

//! Representations of entities producing telemetry.
//!
//! A [Resource] is an immutable set of attributes describing the entity that
//! produces metrics, for example the service name and its deployment
//! environment. Every snapshot collected by a pipeline carries the resource
//! its meter provider was built with.
//!
//! Detecting resource attributes from the host or environment is left to
//! callers; this module only models the value.

use otel_metrics::{Key, KeyValue, Value};
use std::borrow::Cow;
use std::collections::{hash_map, HashMap};
use std::sync::Arc;

const SERVICE_NAME: Key = Key::from_static_str("service.name");
const UNKNOWN_SERVICE: &str = "unknown_service";

#[derive(Debug, Clone, PartialEq)]
struct ResourceInner {
    attrs: HashMap<Key, Value>,
    schema_url: Option<Cow<'static, str>>,
}

/// Attributes describing the process or service that owns a meter provider.
///
/// Immutable once built. Clones share one attribute map.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Default for Resource {
    /// A resource naming an unknown service.
    fn default() -> Self {
        Resource::builder().build()
    }
}

impl Resource {
    /// Builder seeded with `service.name=unknown_service`.
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder {
            attrs: HashMap::from([(SERVICE_NAME, Value::from(UNKNOWN_SERVICE))]),
            schema_url: None,
        }
    }

    /// Builder with no attributes at all.
    pub fn builder_empty() -> ResourceBuilder {
        ResourceBuilder {
            attrs: HashMap::new(),
            schema_url: None,
        }
    }

    /// Resource with no attributes.
    pub fn empty() -> Self {
        Resource::builder_empty().build()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.inner.attrs.len()
    }

    /// Whether there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.inner.attrs.is_empty()
    }

    /// Attributes in unspecified order.
    pub fn iter(&self) -> Iter<'_> {
        Iter(self.inner.attrs.iter())
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.inner.attrs.get(key).cloned()
    }

    /// Schema URL, if one was set.
    pub fn schema_url(&self) -> Option<&str> {
        self.inner.schema_url.as_deref()
    }
}

/// Iterator returned by [Resource::iter].
#[derive(Debug)]
pub struct Iter<'a>(hash_map::Iter<'a, Key, Value>);

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a Key, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

impl<'a> IntoIterator for &'a Resource {
    type Item = (&'a Key, &'a Value);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        Iter(self.inner.attrs.iter())
    }
}

/// Collects attributes for a [Resource].
#[derive(Debug)]
pub struct ResourceBuilder {
    attrs: HashMap<Key, Value>,
    schema_url: Option<Cow<'static, str>>,
}

impl ResourceBuilder {
    /// Sets one attribute, replacing any earlier value for its key.
    pub fn with_attribute(mut self, kv: KeyValue) -> Self {
        self.attrs.insert(kv.key, kv.value);
        self
    }

    /// Sets several attributes. Duplicate keys keep the last value.
    pub fn with_attributes<T: IntoIterator<Item = KeyValue>>(mut self, kvs: T) -> Self {
        self.attrs
            .extend(kvs.into_iter().map(|kv| (kv.key, kv.value)));
        self
    }

    /// Shorthand for the `service.name` attribute.
    pub fn with_service_name(self, name: impl Into<Value>) -> Self {
        self.with_attribute(KeyValue::new(SERVICE_NAME, name.into()))
    }

    /// Sets the schema URL. An empty string clears it.
    pub fn with_schema_url(mut self, schema_url: impl Into<Cow<'static, str>>) -> Self {
        let schema_url = schema_url.into();
        self.schema_url = (!schema_url.is_empty()).then_some(schema_url);
        self
    }

    /// Freezes the collected attributes.
    pub fn build(self) -> Resource {
        Resource {
            inner: Arc::new(ResourceInner {
                attrs: self.attrs,
                schema_url: self.schema_url,
            }),
        }
    }
}

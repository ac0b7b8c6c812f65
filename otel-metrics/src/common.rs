use std::borrow::{Borrow, Cow};
use std::cmp::Ordering;
use std::sync::Arc;
use std::{fmt, hash};

/// String storage shared by keys and string values. Comparison and hashing
/// only look at the text, never at how it is held.
#[derive(Clone, Eq)]
enum Text {
    Static(&'static str),
    Boxed(Box<str>),
    Shared(Arc<str>),
}

impl Text {
    fn as_str(&self) -> &str {
        match self {
            Text::Static(s) => s,
            Text::Boxed(s) => s,
            Text::Shared(s) => s,
        }
    }
}

impl From<&'static str> for Text {
    fn from(s: &'static str) -> Self {
        Text::Static(s)
    }
}

impl From<String> for Text {
    fn from(s: String) -> Self {
        Text::Boxed(s.into_boxed_str())
    }
}

impl From<Arc<str>> for Text {
    fn from(s: Arc<str>) -> Self {
        Text::Shared(s)
    }
}

impl From<Cow<'static, str>> for Text {
    fn from(s: Cow<'static, str>) -> Self {
        match s {
            Cow::Borrowed(s) => Text::Static(s),
            Cow::Owned(s) => s.into(),
        }
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl PartialOrd for Text {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Text {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl hash::Hash for Text {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

/// Implements the string conversions and formatting shared by [Key] and
/// [StringValue].
macro_rules! text_newtype {
    ($($name:ident),*) => {
        $(
            impl $name {
                /// The text as a string slice.
                pub fn as_str(&self) -> &str {
                    self.0.as_str()
                }
            }

            impl From<&'static str> for $name {
                fn from(s: &'static str) -> Self {
                    $name(s.into())
                }
            }

            impl From<String> for $name {
                fn from(s: String) -> Self {
                    $name(s.into())
                }
            }

            impl From<Arc<str>> for $name {
                fn from(s: Arc<str>) -> Self {
                    $name(s.into())
                }
            }

            impl From<Cow<'static, str>> for $name {
                fn from(s: Cow<'static, str>) -> Self {
                    $name(s.into())
                }
            }

            impl fmt::Debug for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Debug::fmt(self.as_str(), f)
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

/// Attribute name.
///
/// Keys order and compare by their text, so an attribute set sorted by key is
/// the same regardless of how each key was built.
///
/// ```
/// use otel_metrics::Key;
/// use std::sync::Arc;
///
/// assert_eq!(Key::new("route"), Key::new(String::from("route")));
/// assert_eq!(Key::new("route"), Key::new(Arc::<str>::from("route")));
/// ```
#[non_exhaustive]
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Text);

impl Key {
    /// Builds a key from anything string-like.
    pub fn new(value: impl Into<Key>) -> Self {
        value.into()
    }

    /// Key usable in `const` contexts.
    pub const fn from_static_str(value: &'static str) -> Self {
        Key(Text::Static(value))
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// String attribute value.
#[non_exhaustive]
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringValue(Text);

text_newtype!(Key, StringValue);

/// Attribute value.
///
/// Floats compare and hash by bit pattern so that attribute sets can key a
/// map: `NaN` equals itself and `0.0` differs from `-0.0`.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    I64(i64),
    /// Float.
    F64(f64),
    /// String.
    String(StringValue),
}

impl Value {
    /// Text form of the value. Borrows for strings, allocates otherwise.
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Value::String(s) => Cow::Borrowed(s.as_str()),
            other => Cow::Owned(other.to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl hash::Hash for Value {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(b) => b.hash(state),
            Value::I64(i) => i.hash(state),
            Value::F64(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => b.fmt(f),
            Value::I64(i) => i.fmt(f),
            Value::F64(x) => x.fmt(f),
            Value::String(s) => f.write_str(s.as_str()),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $wrap:expr),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    ($wrap)(v)
                }
            }
        )*
    };
}

value_from!(
    bool => Value::Bool,
    i64 => Value::I64,
    f64 => Value::F64,
    StringValue => Value::String,
    &'static str => |s: &'static str| Value::String(s.into()),
    String => |s: String| Value::String(s.into()),
    Arc<str> => |s: Arc<str>| Value::String(s.into()),
    Cow<'static, str> => |s: Cow<'static, str>| Value::String(s.into()),
);

/// One attribute: a [Key] and its [Value].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct KeyValue {
    /// Attribute name.
    pub key: Key,
    /// Attribute value.
    pub value: Value,
}

impl KeyValue {
    /// Pairs a key with a value, converting both.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Identifies the code that created a meter.
///
/// Collected output is grouped by scope. Two scopes are the same scope when
/// name, version and schema URL match; attributes are carried along but do
/// not take part in that comparison.
#[derive(Debug, Default, Clone)]
#[non_exhaustive]
pub struct InstrumentationScope {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
    schema_url: Option<Cow<'static, str>>,
    attributes: Vec<KeyValue>,
}

impl InstrumentationScope {
    /// Starts a scope with the given name.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> InstrumentationScopeBuilder {
        InstrumentationScopeBuilder {
            scope: InstrumentationScope {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    /// Scope name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version of the instrumented code, if set.
    #[inline]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Schema URL, if set.
    #[inline]
    pub fn schema_url(&self) -> Option<&str> {
        self.schema_url.as_deref()
    }

    /// Attributes attached to the scope.
    #[inline]
    pub fn attributes(&self) -> impl Iterator<Item = &KeyValue> {
        self.attributes.iter()
    }

    fn identity(&self) -> (&str, Option<&str>, Option<&str>) {
        (self.name(), self.version(), self.schema_url())
    }
}

impl PartialEq for InstrumentationScope {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for InstrumentationScope {}

impl hash::Hash for InstrumentationScope {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.identity().hash(state)
    }
}

/// Builder for [InstrumentationScope]. Everything except the name is optional.
///
/// ```
/// use otel_metrics::{InstrumentationScope, KeyValue};
///
/// let scope = InstrumentationScope::builder("my-crate")
///     .with_version("v0.1.0")
///     .with_attributes([KeyValue::new("k", "v")])
///     .build();
/// assert_eq!(scope.version(), Some("v0.1.0"));
/// ```
#[derive(Debug)]
pub struct InstrumentationScopeBuilder {
    scope: InstrumentationScope,
}

impl InstrumentationScopeBuilder {
    /// Sets the version.
    pub fn with_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.scope.version = Some(version.into());
        self
    }

    /// Sets the schema URL.
    pub fn with_schema_url(mut self, schema_url: impl Into<Cow<'static, str>>) -> Self {
        self.scope.schema_url = Some(schema_url.into());
        self
    }

    /// Replaces the scope attributes.
    pub fn with_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.scope.attributes = attributes.into_iter().collect();
        self
    }

    /// Finishes the scope.
    pub fn build(self) -> InstrumentationScope {
        self.scope
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    use super::*;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn key_equality_ignores_storage() {
        let owned = Key::new(String::from("service"));
        let shared = Key::new(Arc::<str>::from("service"));
        assert_eq!(owned, Key::from_static_str("service"));
        assert_eq!(owned, shared);
        assert_eq!(hash_of(&owned), hash_of(&shared));
    }

    #[test]
    fn float_values_hash_by_bits() {
        let nan = Value::F64(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert_eq!(hash_of(&nan), hash_of(&nan.clone()));
        assert_ne!(Value::F64(0.0), Value::F64(-0.0));
        assert_ne!(Value::I64(1), Value::F64(1.0));
    }

    #[test]
    fn scope_identity_ignores_attributes() {
        let a = InstrumentationScope::builder("lib")
            .with_version("1.0")
            .with_attributes([KeyValue::new("k", "v")])
            .build();
        let b = InstrumentationScope::builder("lib").with_version("1.0").build();
        let c = InstrumentationScope::builder("lib").with_version("2.0").build();

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
        assert_eq!(a.attributes().count(), 1);
    }
}

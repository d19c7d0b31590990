//! Widget descriptors and call arguments.
//!
//! A [`Widget`] describes a cacheable unit: its template identity, type name,
//! tags, lifetime and optional key hooks. Hooks are fixed when the widget is
//! built.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use super::error::CacheError;
use super::finite::to_key_value;

/// Replaces the derived cache key entirely.
pub type KeyFn = Arc<dyn Fn(&CallArgs) -> String + Send + Sync>;

/// Produces extra data folded into the derived cache key.
pub type DependencyFn = Arc<dyn Fn(&CallArgs) -> Result<Value, serde_json::Error> + Send + Sync>;

/// Which output of a widget is being cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputForm {
    /// Fully rendered markup.
    Html,
    /// Data returned by the widget controller, before templating.
    Data,
}

impl OutputForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputForm::Html => "HTML",
            OutputForm::Data => "dataProvider",
        }
    }
}

impl fmt::Display for OutputForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument types with an exact JSON form.
///
/// Floats are not among them: `NaN` and the infinities have no JSON form, so
/// float arguments go through [`CallArgs::try_with`], which rejects them.
pub trait ArgValue {
    fn into_value(self) -> Value;
}

macro_rules! lossless_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ArgValue for $ty {
                fn into_value(self) -> Value {
                    Value::from(self)
                }
            }
        )*
    };
}

lossless_arg!(
    Value, bool, String, &str, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize,
);

/// Positional arguments a widget is rendered with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs(Vec<Value>);

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument that is already JSON or converts to it exactly.
    pub fn with(mut self, value: impl ArgValue) -> Self {
        self.0.push(value.into_value());
        self
    }

    /// Append any serializable argument.
    ///
    /// Fails with [`CacheError::Serialization`] when the value cannot be
    /// represented in JSON, including non-finite floats anywhere inside it.
    pub fn try_with<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, CacheError> {
        self.0.push(to_key_value(value)?);
        Ok(self)
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON used for key derivation.
    ///
    /// Arrays at every depth are written as objects keyed by index, so an empty
    /// argument list and an empty map both serialize to `{}`.
    pub fn to_key_json(&self) -> String {
        let object = Value::Object(indexed(self.0.iter().map(force_object)));
        object.to_string()
    }
}

impl From<Vec<Value>> for CallArgs {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

fn indexed(values: impl Iterator<Item = Value>) -> Map<String, Value> {
    values
        .enumerate()
        .map(|(index, value)| (index.to_string(), value))
        .collect()
}

fn force_object(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Object(indexed(items.iter().map(force_object))),
        Value::Object(map) => {
            // Keys are sorted so that insertion order never reaches the key.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(key, value)| (key.clone(), force_object(value)))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

/// Cache identity and policy of a widget.
#[derive(Clone)]
pub struct Widget {
    type_name: String,
    template: String,
    tags: Vec<String>,
    lifetime: Duration,
    cache_view: bool,
    cache_key: Option<KeyFn>,
    extra_key_dependency: Option<DependencyFn>,
}

impl Widget {
    /// A widget with caching disabled (zero lifetime) and no tags.
    pub fn new(type_name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            template: template.into(),
            tags: Vec::new(),
            lifetime: Duration::ZERO,
            cache_view: true,
            cache_key: None,
            extra_key_dependency: None,
        }
    }

    /// A widget named after the Rust type `W`.
    pub fn of<W: ?Sized>(template: impl Into<String>) -> Self {
        Self::new(std::any::type_name::<W>(), template)
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Cache the rendered markup (`true`) or only the controller data (`false`).
    pub fn with_cache_view(mut self, cache_view: bool) -> Self {
        self.cache_view = cache_view;
        self
    }

    /// Use `hook` as the complete cache key.
    ///
    /// Tags, locale, form and type no longer influence the key.
    pub fn with_cache_key<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CallArgs) -> String + Send + Sync + 'static,
    {
        self.cache_key = Some(Arc::new(hook));
        self
    }

    pub fn with_extra_key_dependency<F, T>(mut self, hook: F) -> Self
    where
        F: Fn(&CallArgs) -> T + Send + Sync + 'static,
        T: Serialize,
    {
        self.extra_key_dependency = Some(Arc::new(move |args: &CallArgs| {
            to_key_value(&hook(args))
        }));
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn cache_view(&self) -> bool {
        self.cache_view
    }

    pub fn cache_key(&self) -> Option<&KeyFn> {
        self.cache_key.as_ref()
    }

    pub fn extra_key_dependency(&self) -> Option<&DependencyFn> {
        self.extra_key_dependency.as_ref()
    }
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("type_name", &self.type_name)
            .field("template", &self.template)
            .field("tags", &self.tags)
            .field("lifetime", &self.lifetime)
            .field("cache_view", &self.cache_view)
            .field("cache_key", &self.cache_key.is_some())
            .field("extra_key_dependency", &self.extra_key_dependency.is_some())
            .finish()
    }
}

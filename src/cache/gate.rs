//! Cache gate for widget output.
//!
//! Decides per call whether a widget output is cached, derives its key, and
//! hands the computation to the backend's fetch-or-compute primitive. The gate
//! itself holds no locks: whether concurrent misses on one key compute once or
//! several times depends on the backend.

use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use super::backend::{Backend, CacheBackend};
use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::KeyDeriver;
use super::locale::LocaleProvider;
use super::policy::{CachePolicy, SettingsPolicy};
use super::tags::TagTokenStore;
use super::widget::{CallArgs, OutputForm, Widget};

const METRIC_BYPASS: &str = "fragcache_bypass_total";
const METRIC_TAG_FLUSH: &str = "fragcache_tag_flush_total";

pub struct CacheGate<B> {
    backend: Arc<B>,
    policy: Arc<dyn CachePolicy>,
    tokens: Arc<TagTokenStore>,
    keys: KeyDeriver,
    tag_scoping: bool,
}

impl CacheGate<Backend> {
    /// Gate over the configured backend, which also stores the tag tokens.
    pub fn from_config(
        config: &CacheConfig,
        locale: Arc<dyn LocaleProvider>,
    ) -> Result<Self, CacheError> {
        let backend = Arc::new(Backend::from_config(config)?);
        let tokens = Arc::new(TagTokenStore::new(backend.clone()));
        let policy = Arc::new(SettingsPolicy::from(config));
        Ok(Self::new(config, backend, tokens, policy, locale))
    }
}

impl<B: CacheBackend> CacheGate<B> {
    /// Tag-scoping capability is taken from `config.driver`.
    pub fn new(
        config: &CacheConfig,
        backend: Arc<B>,
        tokens: Arc<TagTokenStore>,
        policy: Arc<dyn CachePolicy>,
        locale: Arc<dyn LocaleProvider>,
    ) -> Self {
        let tag_scoping = config.supports_tag_scoping();
        Self {
            keys: KeyDeriver::new(tag_scoping, tokens.clone(), locale),
            backend,
            policy,
            tokens,
            tag_scoping,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn keys(&self) -> &KeyDeriver {
        &self.keys
    }

    pub fn tokens(&self) -> &Arc<TagTokenStore> {
        &self.tokens
    }

    pub fn supports_tag_scoping(&self) -> bool {
        self.tag_scoping
    }

    /// Serve `widget`'s output for `args` from cache, computing it on a miss.
    ///
    /// When caching is switched off or the widget lifetime is zero, `compute`
    /// runs directly and nothing touches the backend. Errors from `compute`
    /// are returned as they are and never cached.
    #[instrument(skip_all, fields(template = widget.template(), form = %form))]
    pub async fn cache_result<T, E, F, Fut>(
        &self,
        args: &CallArgs,
        widget: &Widget,
        form: OutputForm,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        E: From<CacheError> + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        if !self.policy.should_use_cache()? || widget.lifetime().is_zero() {
            counter!(METRIC_BYPASS).increment(1);
            debug!(cache = "widget", outcome = "bypass", "computing uncached");
            return compute().await;
        }

        let scope: &[String] = if self.tag_scoping {
            widget.tags()
        } else {
            &[]
        };
        let key = self.keys.make_key(args, widget, form).await?;

        let value = self
            .backend
            .scoped_to(scope)
            .remember(key.as_str(), widget.lifetime(), move || async move {
                let computed = compute().await?;
                serde_json::to_value(&computed).map_err(|err| E::from(CacheError::from(err)))
            })
            .await?;

        serde_json::from_value(value).map_err(|err| E::from(CacheError::from(err)))
    }

    /// Invalidate every widget output stored under any of `tags`.
    ///
    /// Drivers with tag support flush the tags in one call. Otherwise each
    /// tag's token is rotated on its own, so a failure part way leaves the
    /// earlier tags invalidated.
    #[instrument(skip_all)]
    pub async fn expire_tagged<I, S>(&self, tags: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        if tags.is_empty() {
            return Ok(());
        }

        if self.tag_scoping {
            self.backend.scoped_to(&tags).flush().await?;
            counter!(METRIC_TAG_FLUSH).increment(1);
            info!(?tags, "Flushed tagged widgets");
        } else {
            for tag in &tags {
                self.tokens.rotate(tag).await?;
            }
        }
        Ok(())
    }
}

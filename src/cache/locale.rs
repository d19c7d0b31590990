//! Locale lookup for key derivation.
//!
//! Rendered fragments differ per locale, so the active locale is part of every
//! derived key. [`TaskLocale`] reads a locale scoped to the current task with
//! `tokio::task_local!`, the same way request-scoped state is carried elsewhere.

use std::future::Future;

tokio::task_local! {
    static LOCALE: String;
}

/// Source of the locale identifier folded into cache keys.
pub trait LocaleProvider: Send + Sync {
    fn locale(&self) -> String;
}

/// Always reports the same locale.
#[derive(Debug, Clone)]
pub struct FixedLocale(String);

impl FixedLocale {
    pub fn new(locale: impl Into<String>) -> Self {
        Self(locale.into())
    }
}

impl LocaleProvider for FixedLocale {
    fn locale(&self) -> String {
        self.0.clone()
    }
}

/// Reports the locale set by [`with_locale`], or a fallback outside of it.
#[derive(Debug, Clone)]
pub struct TaskLocale {
    fallback: String,
}

impl TaskLocale {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
        }
    }
}

impl LocaleProvider for TaskLocale {
    fn locale(&self) -> String {
        LOCALE
            .try_with(Clone::clone)
            .unwrap_or_else(|_| self.fallback.clone())
    }
}

/// Run `future` with `locale` as the task locale.
pub async fn with_locale<F>(locale: impl Into<String>, future: F) -> F::Output
where
    F: Future,
{
    LOCALE.scope(locale.into(), future).await
}

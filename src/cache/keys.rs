//! Cache key derivation.
//!
//! A derived key is the first 128 bits of the SHA-256 digest of a composite
//! string, hex encoded. The composite is the concatenation, without separators,
//! of:
//!
//! 1. the JSON of the widget's extra key dependency, if it has one;
//! 2. the JSON array of tag tokens for the widget's tags, only when the driver
//!    cannot scope by tag;
//! 3. the forced-object JSON of the call arguments;
//! 4. the locale;
//! 5. the output form;
//! 6. the template identity;
//! 7. the widget type name.
//!
//! Changing this order silently invalidates every stored fragment.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::error::CacheError;
use super::locale::LocaleProvider;
use super::tags::TagTokenStore;
use super::widget::{CallArgs, OutputForm, Widget};

/// Bytes of the SHA-256 digest kept in a derived key.
const KEY_DIGEST_BYTES: usize = 16;

/// Key under which a widget output is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives cache keys for widget calls.
pub struct KeyDeriver {
    tag_scoping: bool,
    tokens: Arc<TagTokenStore>,
    locale: Arc<dyn LocaleProvider>,
}

impl KeyDeriver {
    /// `tag_scoping` states whether the driver scopes entries by tag natively.
    pub fn new(
        tag_scoping: bool,
        tokens: Arc<TagTokenStore>,
        locale: Arc<dyn LocaleProvider>,
    ) -> Self {
        Self {
            tag_scoping,
            tokens,
            locale,
        }
    }

    /// Key for calling `widget` with `args` to produce `form`.
    ///
    /// A widget-supplied key hook wins outright: its result is used verbatim and
    /// nothing else is mixed in.
    pub async fn make_key(
        &self,
        args: &CallArgs,
        widget: &Widget,
        form: OutputForm,
    ) -> Result<CacheKey, CacheError> {
        if let Some(hook) = widget.cache_key() {
            return Ok(CacheKey(hook(args)));
        }

        let material = self.key_material(args, widget, form).await?;
        Ok(CacheKey(digest_hex(&material)))
    }

    /// Composite string hashed into a derived key.
    pub async fn key_material(
        &self,
        args: &CallArgs,
        widget: &Widget,
        form: OutputForm,
    ) -> Result<String, CacheError> {
        let mut material = String::new();

        if let Some(hook) = widget.extra_key_dependency() {
            material.push_str(&hook(args)?.to_string());
        }

        if !self.tag_scoping {
            let tokens = self.tokens.tokens_for(widget.tags()).await?;
            material.push_str(&serde_json::to_string(&tokens)?);
        }

        material.push_str(&args.to_key_json());
        material.push_str(&self.locale.locale());
        material.push_str(form.as_str());
        material.push_str(widget.template());
        material.push_str(widget.type_name());

        Ok(material)
    }
}

/// Truncated SHA-256 of `material`, lowercase hex.
pub fn digest_hex(material: &str) -> String {
    let digest = Sha256::digest(material.as_bytes());
    hex::encode(&digest.as_slice()[..KEY_DIGEST_BYTES])
}

/// Full SHA-256 of `input`, lowercase hex. Used for file names.
pub(crate) fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

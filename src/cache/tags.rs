//! Tag tokens for backends without native tag scoping.
//!
//! Every tag owns an opaque token that is folded into the keys of widgets
//! carrying that tag. Rotating the token makes all of those keys unreachable;
//! the stale entries are left to expire on their own.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::error::CacheError;

const SLOT_PREFIX: &str = "widget_tag_token:";
const METRIC_TAG_ROTATION: &str = "fragcache_tag_rotation_total";

/// Durable slots holding tag tokens.
///
/// Implementations must survive process restarts for tokens to keep derived
/// keys stable between invalidations. Writes are full overwrites.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn load_token(&self, slot: &str) -> Result<Option<String>, CacheError>;

    async fn store_token(&self, slot: &str, token: &str) -> Result<(), CacheError>;
}

/// Maps tag names to their current token.
///
/// Tokens are read from storage on every lookup so that rotations made by other
/// processes are seen immediately.
pub struct TagTokenStore {
    storage: Arc<dyn TokenStorage>,
}

impl TagTokenStore {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        Self { storage }
    }

    /// Current token for `tag`, creating and persisting one if the tag is new.
    pub async fn token_for(&self, tag: &str) -> Result<String, CacheError> {
        let slot = slot_name(tag);
        if let Some(token) = self.storage.load_token(&slot).await? {
            return Ok(token);
        }

        let token = new_token();
        self.storage.store_token(&slot, &token).await?;
        debug!(tag, "Created tag token");
        Ok(token)
    }

    /// Current tokens for `tags`, in order.
    pub async fn tokens_for(&self, tags: &[String]) -> Result<Vec<String>, CacheError> {
        let mut tokens = Vec::with_capacity(tags.len());
        for tag in tags {
            tokens.push(self.token_for(tag).await?);
        }
        Ok(tokens)
    }

    /// Replace the token of `tag`, returning the new one.
    ///
    /// Unknown tags simply receive their first token.
    #[instrument(skip(self))]
    pub async fn rotate(&self, tag: &str) -> Result<String, CacheError> {
        let token = new_token();
        self.storage.store_token(&slot_name(tag), &token).await?;
        counter!(METRIC_TAG_ROTATION).increment(1);
        info!(tag, "Rotated tag token");
        Ok(token)
    }
}

fn slot_name(tag: &str) -> String {
    format!("{SLOT_PREFIX}{tag}")
}

fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

//! Identity cache decorator.
//!
//! Wraps an [`IdentityClient`] and remembers successful lookups and
//! bindings. The cache is owned by whoever constructs it (typically one per
//! connector) and injected into the processor like any other client; misses
//! are not cached so devices created later are still found.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

use dynmapper_core::IdentityError;

use crate::client::IdentityClient;

pub struct CachedIdentityClient {
    inner: Arc<dyn IdentityClient>,
    /// (external id type, external id) to internal id.
    cache: DashMap<(String, String), String>,
}

impl CachedIdentityClient {
    pub fn new(inner: Arc<dyn IdentityClient>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Forget one binding.
    pub fn invalidate(&self, external_id: &str, external_id_type: &str) {
        self.cache
            .remove(&(external_id_type.to_string(), external_id.to_string()));
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl IdentityClient for CachedIdentityClient {
    async fn resolve(
        &self,
        external_id: &str,
        external_id_type: &str,
    ) -> Result<Option<String>, IdentityError> {
        let key = (external_id_type.to_string(), external_id.to_string());
        if let Some(hit) = self.cache.get(&key) {
            trace!(external_id, external_id_type, "Identity cache hit");
            return Ok(Some(hit.value().clone()));
        }

        let resolved = self.inner.resolve(external_id, external_id_type).await?;
        if let Some(internal_id) = &resolved {
            self.cache.insert(key, internal_id.clone());
        }
        Ok(resolved)
    }

    async fn create(
        &self,
        external_id: &str,
        external_id_type: &str,
        internal_id: &str,
    ) -> Result<(), IdentityError> {
        self.inner
            .create(external_id, external_id_type, internal_id)
            .await?;
        self.cache.insert(
            (external_id_type.to_string(), external_id.to_string()),
            internal_id.to_string(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPlatform;

    #[tokio::test]
    async fn test_hits_skip_inner_client() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.register_identity("c8y_Serial", "berlin_01", "4711");
        let cached = CachedIdentityClient::new(platform.clone());

        for _ in 0..3 {
            assert_eq!(
                cached.resolve("berlin_01", "c8y_Serial").await.unwrap(),
                Some("4711".to_string())
            );
        }
        assert_eq!(platform.lookup_count(), 1);
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn test_misses_not_cached() {
        let platform = Arc::new(InMemoryPlatform::new());
        let cached = CachedIdentityClient::new(platform.clone());

        assert_eq!(cached.resolve("x", "c8y_Serial").await.unwrap(), None);
        platform.register_identity("c8y_Serial", "x", "1");
        assert_eq!(
            cached.resolve("x", "c8y_Serial").await.unwrap(),
            Some("1".to_string())
        );
        assert_eq!(platform.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.register_identity("c8y_Serial", "x", "1");
        let cached = CachedIdentityClient::new(platform.clone());
        cached.resolve("x", "c8y_Serial").await.unwrap();
        cached.invalidate("x", "c8y_Serial");
        assert!(cached.is_empty());
        cached.clear();
    }
}

//! Injected platform capabilities.
//!
//! The engine never talks to a platform directly. Identity lookups and object
//! creation go through these traits, implemented by a real API client, by
//! [`InMemoryPlatform`](crate::memory::InMemoryPlatform), or by a decorator
//! such as [`CachedIdentityClient`](crate::cache::CachedIdentityClient).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dynmapper_core::{DispatchError, IdentityError, TargetApi};

/// Answer of a platform call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// The `id` field of the body, as text.
    pub fn id(&self) -> Option<String> {
        match self.body.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// External identity registry.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Platform-internal id bound to an external id, `None` when unknown.
    async fn resolve(
        &self,
        external_id: &str,
        external_id_type: &str,
    ) -> Result<Option<String>, IdentityError>;

    /// Bind an external id to a platform-internal id.
    async fn create(
        &self,
        external_id: &str,
        external_id_type: &str,
        internal_id: &str,
    ) -> Result<(), IdentityError>;
}

/// Object creation and update on the platform.
#[async_trait]
pub trait PlatformApiClient: Send + Sync {
    async fn create(&self, target_api: TargetApi, object: &Value)
        -> Result<ApiResponse, DispatchError>;

    async fn update(
        &self,
        target_api: TargetApi,
        id: &str,
        object: &Value,
    ) -> Result<ApiResponse, DispatchError>;
}

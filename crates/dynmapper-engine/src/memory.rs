//! In-memory platform.
//!
//! Implements both injected capabilities against process-local maps. Used by
//! the CLI for offline mapping tests and as the test double of the engine.
//! Failures and latency can be injected per target API.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::trace;

use dynmapper_core::{DispatchError, IdentityError, TargetApi};

use crate::client::{ApiResponse, IdentityClient, PlatformApiClient};

/// Stored platform object.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub id: String,
    pub target_api: TargetApi,
    pub body: Value,
}

pub struct InMemoryPlatform {
    /// (external id type, external id) to internal id.
    identities: DashMap<(String, String), String>,
    objects: DashMap<String, StoredObject>,
    /// Creation order of `objects`.
    order: RwLock<Vec<String>>,
    next_id: AtomicU64,
    failing: RwLock<HashSet<TargetApi>>,
    fail_lookups: AtomicBool,
    lookups: AtomicUsize,
    latency: RwLock<Option<Duration>>,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self {
            identities: DashMap::new(),
            objects: DashMap::new(),
            order: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1000),
            failing: RwLock::new(HashSet::new()),
            fail_lookups: AtomicBool::new(false),
            lookups: AtomicUsize::new(0),
            latency: RwLock::new(None),
        }
    }

    /// Seed an identity binding.
    pub fn register_identity(&self, external_id_type: &str, external_id: &str, internal_id: &str) {
        self.identities.insert(
            (external_id_type.to_string(), external_id.to_string()),
            internal_id.to_string(),
        );
    }

    pub fn identity(&self, external_id_type: &str, external_id: &str) -> Option<String> {
        self.identities
            .get(&(external_id_type.to_string(), external_id.to_string()))
            .map(|e| e.value().clone())
    }

    /// Reject every create/update for `target_api` with status 500.
    pub fn fail_api(&self, target_api: TargetApi) {
        self.failing.write().insert(target_api);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Delay every platform call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn object(&self, id: &str) -> Option<StoredObject> {
        self.objects.get(id).map(|o| o.value().clone())
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Objects of one API in creation order.
    pub fn objects(&self, target_api: TargetApi) -> Vec<StoredObject> {
        self.order
            .read()
            .iter()
            .filter_map(|id| self.object(id))
            .filter(|o| o.target_api == target_api)
            .collect()
    }

    async fn delay(&self) {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_failing(&self, target_api: TargetApi) -> Result<(), DispatchError> {
        if self.failing.read().contains(&target_api) {
            return Err(DispatchError::Rejected {
                status: 500,
                message: format!("{} API unavailable", target_api),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityClient for InMemoryPlatform {
    async fn resolve(
        &self,
        external_id: &str,
        external_id_type: &str,
    ) -> Result<Option<String>, IdentityError> {
        self.delay().await;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(IdentityError::Lookup("identity service unavailable".to_string()));
        }
        Ok(self.identity(external_id_type, external_id))
    }

    async fn create(
        &self,
        external_id: &str,
        external_id_type: &str,
        internal_id: &str,
    ) -> Result<(), IdentityError> {
        self.delay().await;
        if !self.objects.contains_key(internal_id) {
            return Err(IdentityError::Create(format!(
                "object {} does not exist",
                internal_id
            )));
        }
        self.register_identity(external_id_type, external_id, internal_id);
        Ok(())
    }
}

#[async_trait]
impl PlatformApiClient for InMemoryPlatform {
    async fn create(
        &self,
        target_api: TargetApi,
        object: &Value,
    ) -> Result<ApiResponse, DispatchError> {
        self.delay().await;
        self.check_failing(target_api)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let mut body = object.clone();
        if let Value::Object(map) = &mut body {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        trace!(id = %id, target_api = %target_api, "Stored object");
        self.objects.insert(
            id.clone(),
            StoredObject {
                id: id.clone(),
                target_api,
                body: body.clone(),
            },
        );
        self.order.write().push(id);
        Ok(ApiResponse::new(201, body))
    }

    async fn update(
        &self,
        target_api: TargetApi,
        id: &str,
        object: &Value,
    ) -> Result<ApiResponse, DispatchError> {
        self.delay().await;
        self.check_failing(target_api)?;

        let mut stored = self.objects.get_mut(id).ok_or_else(|| DispatchError::Rejected {
            status: 404,
            message: format!("object {} not found", id),
        })?;
        if let (Value::Object(target), Value::Object(fields)) = (&mut stored.body, object) {
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(ApiResponse::new(200, stored.body.clone()))
    }
}

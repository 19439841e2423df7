//! Request emission and dispatch.
//!
//! Appends the content request of a fan-out index to the request chain and,
//! when the evaluation is not a dry run, sends it through the injected
//! [`PlatformApiClient`]. Dispatch failures are attached to the record and
//! never abort sibling indices.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use dynmapper_core::{C8yRequest, DispatchError, MapperError, RequestMethod, TargetApi};

use crate::client::{IdentityClient, PlatformApiClient};
use crate::context::{ProcessingContext, ProcessingState};
use crate::identity::DeviceRef;

pub struct RequestEmitter {
    platform: Arc<dyn PlatformApiClient>,
    identity: Arc<dyn IdentityClient>,
}

impl RequestEmitter {
    pub fn new(platform: Arc<dyn PlatformApiClient>, identity: Arc<dyn IdentityClient>) -> Self {
        Self { platform, identity }
    }

    /// Emit the request for `index`; returns its position in the chain.
    pub async fn emit(
        &self,
        ctx: &mut ProcessingContext<'_>,
        index: usize,
        payload: Value,
        device: &DeviceRef,
    ) -> usize {
        let mapping = ctx.mapping;
        let target_api = mapping.target_api;
        let method = if target_api == TargetApi::Inventory && device.found {
            RequestMethod::Patch
        } else {
            RequestMethod::Post
        };

        let mut record = C8yRequest::new(method, target_api, payload, index)
            .with_predecessor(device.predecessor)
            .with_source_device(device.internal_id.clone());
        if let Some(external_id) = &device.external_id {
            record = record.with_external_id(&mapping.external_id_type, external_id);
        }

        if ctx.log_payload {
            info!(
                mapping = %mapping.id,
                index,
                method = %method,
                target_api = %target_api,
                payload = %record.request,
                "Composed payload"
            );
        }

        let position = ctx.push_request(record);

        if let Some(reason) = &device.blocked {
            warn!(mapping = %mapping.id, index, error = %reason, "Request not dispatched");
            ctx.requests[position].set_error(reason);
            ctx.add_error(MapperError::Dispatch(reason.clone()).to_string());
            ctx.transition(ProcessingState::Failed { index });
            return position;
        }

        if !ctx.send_payload {
            debug!(mapping = %mapping.id, index, "Dry run, request recorded only");
            if method == RequestMethod::Post {
                remember_inventory(ctx, device, device.internal_id.clone(), position);
            }
            return position;
        }

        let outcome = self.dispatch(ctx, position, device).await;
        match outcome {
            Ok(response) => {
                let record = &mut ctx.requests[position];
                if record.source_device_ref.is_none() && target_api == TargetApi::Inventory {
                    record.source_device_ref = response.get("id").and_then(|id| match id {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    });
                }
                record.response = Some(response);
                let created = record.source_device_ref.clone();
                if method == RequestMethod::Post {
                    remember_inventory(ctx, device, created, position);
                }
                ctx.transition(ProcessingState::Dispatched { index });
            }
            Err(e) => {
                warn!(mapping = %mapping.id, index, error = %e, "Dispatch failed");
                ctx.requests[position].set_error(&e);
                ctx.add_error(MapperError::Dispatch(e).to_string());
                ctx.transition(ProcessingState::Failed { index });
            }
        }
        position
    }

    async fn dispatch(
        &self,
        ctx: &ProcessingContext<'_>,
        position: usize,
        device: &DeviceRef,
    ) -> Result<Value, DispatchError> {
        let record = &ctx.requests[position];
        let target_api = record.target_api;

        match record.method {
            RequestMethod::Patch => {
                let id = record.source_device_ref.as_deref().ok_or_else(|| {
                    DispatchError::Rejected {
                        status: 400,
                        message: "update without object id".to_string(),
                    }
                })?;
                let response = ctx
                    .run(self.platform.update(target_api, id, &record.request))
                    .await??;
                Ok(response.body)
            }
            RequestMethod::Post => {
                let response = ctx
                    .run(self.platform.create(target_api, &record.request))
                    .await??;

                // a new inventory object takes over the external identity
                if target_api == TargetApi::Inventory {
                    if let (Some(external_id), Some(internal_id)) =
                        (device.external_id.as_deref(), response.id())
                    {
                        let id_type = ctx.mapping.external_id_type.as_str();
                        ctx.run(self.identity.create(external_id, id_type, &internal_id))
                            .await?
                            .map_err(DispatchError::from)?;
                    }
                }
                Ok(response.body)
            }
        }
    }
}

/// Later indices with the same external id update this object instead of
/// creating another one.
fn remember_inventory(
    ctx: &mut ProcessingContext<'_>,
    device: &DeviceRef,
    internal_id: Option<String>,
    position: usize,
) {
    if ctx.mapping.target_api != TargetApi::Inventory {
        return;
    }
    if let (Some(external_id), Some(id)) = (device.external_id.as_deref(), internal_id) {
        ctx.remember_device(external_id, Some(id), Some(position));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPlatform;
    use dynmapper_core::{Mapping, RequestStatus};
    use serde_json::json;

    fn emitter(platform: &Arc<InMemoryPlatform>) -> RequestEmitter {
        RequestEmitter::new(platform.clone(), platform.clone())
    }

    #[tokio::test]
    async fn test_dry_run_records_only() {
        let platform = Arc::new(InMemoryPlatform::new());
        let mapping = Mapping::new("m", TargetApi::Event, "{}");
        let mut ctx = ProcessingContext::new(&mapping, "t");

        let pos = emitter(&platform)
            .emit(&mut ctx, 0, json!({"text": "x"}), &DeviceRef::internal("1"))
            .await;
        assert_eq!(ctx.requests[pos].status(), RequestStatus::Recorded);
        assert_eq!(ctx.requests[pos].method, RequestMethod::Post);
        assert_eq!(platform.object_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_attached() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.fail_api(TargetApi::Event);
        let mapping = Mapping::new("m", TargetApi::Event, "{}");
        let mut ctx = ProcessingContext::new(&mapping, "t").with_send_payload(true);

        let pos = emitter(&platform)
            .emit(&mut ctx, 0, json!({}), &DeviceRef::internal("1"))
            .await;
        assert_eq!(ctx.requests[pos].status(), RequestStatus::Failed);
        assert_eq!(ctx.state, ProcessingState::Failed { index: 0 });
        assert_eq!(ctx.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_device_not_dispatched() {
        let platform = Arc::new(InMemoryPlatform::new());
        let mapping = Mapping::new("m", TargetApi::Event, "{}");
        let mut ctx = ProcessingContext::new(&mapping, "t").with_send_payload(true);
        let device = DeviceRef {
            blocked: Some(DispatchError::Timeout(50)),
            ..DeviceRef::default()
        };

        let pos = emitter(&platform).emit(&mut ctx, 0, json!({}), &device).await;
        assert!(ctx.requests[pos].error.as_deref().unwrap().contains("timeout"));
        assert_eq!(platform.object_count(), 0);
    }

    #[tokio::test]
    async fn test_inventory_patch_for_found_device() {
        let platform = Arc::new(InMemoryPlatform::new());
        let existing = PlatformApiClient::create(&*platform, TargetApi::Inventory, &json!({"name": "old"}))
            .await
            .unwrap()
            .id()
            .unwrap();
        let mapping = Mapping::new("m", TargetApi::Inventory, "{}").with_update_existing_device(true);
        let mut ctx = ProcessingContext::new(&mapping, "t").with_send_payload(true);

        let pos = emitter(&platform)
            .emit(&mut ctx, 0, json!({"name": "new"}), &DeviceRef::internal(existing.clone()))
            .await;
        assert_eq!(ctx.requests[pos].method, RequestMethod::Patch);
        assert_eq!(ctx.requests[pos].status(), RequestStatus::Dispatched);
        assert_eq!(platform.object(&existing).unwrap().body["name"], "new");
    }

    #[tokio::test]
    async fn test_inventory_post_binds_identity() {
        let platform = Arc::new(InMemoryPlatform::new());
        let mapping = Mapping::new("m", TargetApi::Inventory, "{}").with_external_id_type("c8y_Serial");
        let mut ctx = ProcessingContext::new(&mapping, "t").with_send_payload(true);
        let device = DeviceRef {
            external_id: Some("berlin_01".to_string()),
            ..DeviceRef::default()
        };

        let pos = emitter(&platform)
            .emit(&mut ctx, 0, json!({"name": "Berlin"}), &device)
            .await;
        let id = ctx.requests[pos].source_device_ref.clone().unwrap();
        assert_eq!(platform.identity("c8y_Serial", "berlin_01"), Some(id.clone()));
        assert_eq!(ctx.created_device("berlin_01"), Some(&(Some(id), Some(pos))));
    }
}

//! Identity resolution and device upsert.
//!
//! Maps the external device identifier of a fan-out index to a
//! platform-internal id. When the device is unknown and the mapping allows
//! it, a minimal device is created (or, in a dry run, an id is synthesized)
//! and a device-create record is emitted ahead of the content request.

use rand::Rng;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use dynmapper_core::{
    C8yRequest, DispatchError, MapperError, RequestMethod, Result, TargetApi,
};

use crate::client::{IdentityClient, PlatformApiClient};
use crate::context::ProcessingContext;

/// Device marker fragment.
pub const FRAGMENT_IS_DEVICE: &str = "c8y_IsDevice";
/// Marks devices created by the mapper.
pub const FRAGMENT_GENERATED: &str = "d11r_device_generatedType";

/// Device an object belongs to, as seen by the request emitter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRef {
    /// External id the device was resolved from.
    pub external_id: Option<String>,
    pub internal_id: Option<String>,
    /// The identity registry already knew the device. For inventory
    /// targets this selects an update instead of a create.
    pub found: bool,
    /// Device-create record gating the content request.
    pub predecessor: Option<usize>,
    /// Reason the content request must not be dispatched.
    pub blocked: Option<DispatchError>,
}

impl DeviceRef {
    /// Device given directly by its internal id.
    pub fn internal(id: impl Into<String>) -> Self {
        Self {
            internal_id: Some(id.into()),
            found: true,
            ..Self::default()
        }
    }
}

/// Resolves external ids and creates missing devices.
pub struct IdentityResolver {
    identity: Arc<dyn IdentityClient>,
    platform: Arc<dyn PlatformApiClient>,
    test_device_type: String,
}

impl IdentityResolver {
    pub fn new(
        identity: Arc<dyn IdentityClient>,
        platform: Arc<dyn PlatformApiClient>,
        test_device_type: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            platform,
            test_device_type: test_device_type.into(),
        }
    }

    /// Look up an external id. Lookup failures count as not found.
    pub async fn lookup(
        &self,
        ctx: &ProcessingContext<'_>,
        external_id: &str,
    ) -> std::result::Result<Option<String>, DispatchError> {
        let id_type = ctx.mapping.external_id_type.as_str();
        match ctx.run(self.identity.resolve(external_id, id_type)).await? {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(
                    mapping = %ctx.mapping.id,
                    external_id,
                    external_id_type = id_type,
                    error = %e,
                    "Identity lookup failed, treating device as unknown"
                );
                Ok(None)
            }
        }
    }

    /// Resolve the device of one fan-out index for a non-inventory target.
    ///
    /// Fails with [`MapperError::UnresolvedIdentifier`] when the device is
    /// unknown and `createNonExistingDevice` is off.
    pub async fn resolve(
        &self,
        ctx: &mut ProcessingContext<'_>,
        external_id: &str,
        index: usize,
    ) -> Result<DeviceRef> {
        if let Some((internal_id, request)) = ctx.created_device(external_id).cloned() {
            debug!(external_id, "Reusing device created earlier in this evaluation");
            let blocked = match (&internal_id, request) {
                (None, Some(r)) => Some(DispatchError::PredecessorFailed(r)),
                _ => None,
            };
            return Ok(DeviceRef {
                external_id: Some(external_id.to_string()),
                internal_id,
                found: false,
                predecessor: request,
                blocked,
            });
        }

        let found = match self.lookup(ctx, external_id).await {
            Ok(found) => found,
            Err(e) => {
                return Ok(DeviceRef {
                    external_id: Some(external_id.to_string()),
                    blocked: Some(e),
                    ..DeviceRef::default()
                })
            }
        };
        if let Some(internal_id) = found {
            debug!(external_id, internal_id = %internal_id, "Resolved external id");
            return Ok(DeviceRef {
                external_id: Some(external_id.to_string()),
                internal_id: Some(internal_id),
                found: true,
                ..DeviceRef::default()
            });
        }

        if !ctx.mapping.create_non_existing_device {
            return Err(MapperError::UnresolvedIdentifier {
                external_id: external_id.to_string(),
                external_id_type: ctx.mapping.external_id_type.clone(),
            });
        }

        if ctx.send_payload {
            self.create_device(ctx, external_id, index).await
        } else {
            Ok(self.synthesize_device(ctx, external_id, index))
        }
    }

    /// Minimal device object for an unknown external id.
    pub fn device_object(&self, external_id_type: &str, external_id: &str) -> Value {
        let mut device = Map::new();
        device.insert(
            "name".to_string(),
            json!(format!("device_{}_{}", external_id_type, external_id)),
        );
        device.insert("type".to_string(), json!(self.test_device_type));
        device.insert(FRAGMENT_IS_DEVICE.to_string(), json!({}));
        device.insert(FRAGMENT_GENERATED.to_string(), json!({}));
        device.insert(self.test_device_type.clone(), json!({}));
        Value::Object(device)
    }

    /// Dry run: record the device-create step and invent an id.
    fn synthesize_device(
        &self,
        ctx: &mut ProcessingContext<'_>,
        external_id: &str,
        index: usize,
    ) -> DeviceRef {
        let internal_id = synthesized_id();
        let id_type = ctx.mapping.external_id_type.clone();
        let record = C8yRequest::new(
            RequestMethod::Post,
            TargetApi::Inventory,
            self.device_object(&id_type, external_id),
            index,
        )
        .with_source_device(Some(internal_id.clone()))
        .with_external_id(&id_type, external_id);
        let request_index = ctx.push_request(record);
        ctx.remember_device(external_id, Some(internal_id.clone()), Some(request_index));

        info!(
            mapping = %ctx.mapping.id,
            external_id,
            internal_id = %internal_id,
            "Dry run: synthesized device id"
        );
        DeviceRef {
            external_id: Some(external_id.to_string()),
            internal_id: Some(internal_id),
            found: false,
            predecessor: Some(request_index),
            blocked: None,
        }
    }

    /// Create the device on the platform and bind the external id.
    async fn create_device(
        &self,
        ctx: &mut ProcessingContext<'_>,
        external_id: &str,
        index: usize,
    ) -> Result<DeviceRef> {
        let id_type = ctx.mapping.external_id_type.clone();
        let device = self.device_object(&id_type, external_id);
        let record = C8yRequest::new(RequestMethod::Post, TargetApi::Inventory, device.clone(), index)
            .with_external_id(&id_type, external_id);
        let request_index = ctx.push_request(record);

        let created = ctx
            .run(self.platform.create(TargetApi::Inventory, &device))
            .await
            .and_then(|r| r);

        let outcome = match created {
            Ok(response) => match response.id() {
                Some(internal_id) => {
                    let bound = ctx
                        .run(self.identity.create(external_id, &id_type, &internal_id))
                        .await;
                    let record = &mut ctx.requests[request_index];
                    record.source_device_ref = Some(internal_id.clone());
                    record.response = Some(response.body);
                    match bound {
                        Ok(Ok(())) => Ok(internal_id),
                        Ok(Err(e)) => Err(DispatchError::from(e)),
                        Err(timeout) => Err(timeout),
                    }
                }
                None => Err(DispatchError::Rejected {
                    status: response.status,
                    message: "created device has no id".to_string(),
                }),
            },
            Err(e) => Err(e),
        };

        let internal_id = match outcome {
            Ok(id) => {
                info!(
                    mapping = %ctx.mapping.id,
                    external_id,
                    internal_id = %id,
                    "Created device"
                );
                Some(id)
            }
            Err(e) => {
                warn!(
                    mapping = %ctx.mapping.id,
                    external_id,
                    error = %e,
                    "Device creation failed"
                );
                ctx.requests[request_index].set_error(&e);
                ctx.add_error(MapperError::Dispatch(e).to_string());
                None
            }
        };

        // binding failed: device exists but dependent requests stay gated
        let failed = ctx.requests[request_index].has_error();
        let usable_id = if failed { None } else { internal_id };
        ctx.remember_device(external_id, usable_id.clone(), Some(request_index));

        Ok(DeviceRef {
            external_id: Some(external_id.to_string()),
            internal_id: usable_id,
            found: false,
            predecessor: Some(request_index),
            blocked: failed.then_some(DispatchError::PredecessorFailed(request_index)),
        })
    }

    /// Id for an inventory object created in a dry run, stable per external id.
    pub fn synthesized_inventory_id(
        &self,
        ctx: &mut ProcessingContext<'_>,
        external_id: &str,
    ) -> String {
        if let Some((Some(id), _)) = ctx.created_device(external_id) {
            return id.clone();
        }
        let id = synthesized_id();
        ctx.remember_device(external_id, Some(id.clone()), None);
        id
    }
}

/// Random numeric id in the platform's id format.
fn synthesized_id() -> String {
    rand::thread_rng()
        .gen_range(10_000_000u64..100_000_000)
        .to_string()
}

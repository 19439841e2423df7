//! dynmapper engine
//!
//! Evaluates a [`Mapping`](dynmapper_core::Mapping) against one inbound
//! message and produces the ordered chain of platform requests.
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────────┐   ┌───────────┐   ┌─────────────┐   ┌──────────┐   ┌─────────┐
//! │ Deserialize │──▶│  Extract  │──▶│ Cardinality │──▶│ Compose  │──▶│  Emit   │
//! │ json/csv/hex│   │ JSONPath  │   │  fan-out    │   │ template │   │ dispatch│
//! └─────────────┘   └───────────┘   └─────────────┘   └──────────┘   └─────────┘
//!                                          │                              ▲
//!                                          ▼                              │
//!                                   ┌─────────────┐   ┌──────────────────┐
//!                                   │  Identity   │──▶│ IdentityClient / │
//!                                   │  resolver   │   │ PlatformApiClient│
//!                                   └─────────────┘   └──────────────────┘
//! ```
//!
//! Platform access goes through the [`client`] traits; [`memory`] provides
//! an in-process implementation for offline testing.

pub mod cache;
pub mod cardinality;
pub mod client;
pub mod composer;
pub mod context;
pub mod deserializer;
pub mod emitter;
pub mod evaluator;
pub mod extractor;
pub mod identity;
pub mod memory;
pub mod processor;

pub use cache::CachedIdentityClient;
pub use cardinality::CardinalityResolver;
pub use client::{ApiResponse, IdentityClient, PlatformApiClient};
pub use composer::{Composition, TargetComposer};
pub use context::{Deadline, ExtractionCache, ProcessingContext, ProcessingState};
pub use deserializer::{
    deserializer_for, FlatFileDeserializer, HexDeserializer, JsonDeserializer, PayloadDeserializer,
};
pub use emitter::RequestEmitter;
pub use evaluator::{ExpressionEvaluator, JsonPathEvaluator};
pub use extractor::SourceExtractor;
pub use identity::{DeviceRef, IdentityResolver};
pub use memory::{InMemoryPlatform, StoredObject};
pub use processor::{is_truthy, InboundMessage, MappingProcessor, ProcessingResult};

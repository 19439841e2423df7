//! dynmapper core
//!
//! Data model and shared infrastructure for the dynamic mapping engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────────┐
//! │   Mapping    │──▶│  SubstituteValue  │──▶│  C8yRequest  │
//! │ Substitution │   │ (extraction cache)│   │   (chain)    │
//! └──────────────┘   └───────────────────┘   └──────────────┘
//! ```
//!
//! This crate performs no I/O beyond reading configuration files; the
//! evaluation pipeline lives in `dynmapper-engine`.

pub mod config;
pub mod error;
pub mod model;
pub mod path;
pub mod request;
pub mod value;

pub use config::MapperConfig;
pub use error::{
    DeserializationError, DispatchError, ExpressionError, IdentityError, MapperError, PathError,
    Result,
};
pub use model::{Direction, Mapping, MappingType, RepairStrategy, Substitution, TargetApi};
pub use path::{JsonPath, Segment};
pub use request::{C8yRequest, RequestMethod, RequestStatus, RequestSummary};
pub use value::{SubstituteValue, ValueType};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

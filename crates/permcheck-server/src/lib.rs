//! permcheck-server: Batch checking, lookups and process bootstrap
//!
//! This crate layers the many-check surfaces over the single-check engine
//! in `permcheck-domain`:
//! - `BulkChecker` runs published check requests under one concurrency
//!   budget and reports allowed ids in ascending order
//! - `LookupEngine` answers "which entities / which subjects" queries
//! - `ServerConfig` and `init_observability` bootstrap a process
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                permcheck-server                   │
//! ├──────────────────────────────────────────────────┤
//! │  lookup.rs  - LookupEngine (entity / subject)    │
//! │  bulk/      - BulkChecker, publishers, ordering  │
//! │  cursor.rs  - continuation tokens                │
//! │  config.rs  - ServerConfig (YAML + env)          │
//! │  logging.rs - tracing and metrics bootstrap      │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod bulk;
pub mod config;
pub mod cursor;
pub mod logging;
pub mod lookup;

// Re-export commonly used types
pub use bulk::{
    BulkCheckError, BulkCheckRequest, BulkChecker, BulkCheckerBuilder, BulkCheckerConfig,
    BulkCheckerType, BulkEntityPublisher, BulkSubjectPublisher,
};
pub use config::{ConfigLoadError, ServerConfig};
pub use cursor::ContinuationToken;
pub use logging::{init_logging, init_observability, LoggingConfig};
pub use lookup::{
    LookupEngine, LookupEntityRequest, LookupEntityResponse, LookupSubjectRequest,
    LookupSubjectResponse,
};

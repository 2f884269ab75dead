//! permcheck-storage: In-memory schema and relationship store
//!
//! This crate provides a snapshot-versioned store implementing the
//! collaborator traits of `permcheck-domain`:
//! - `SchemaReader` over versioned schemas
//! - `RelationshipReader` over tuples and attributes
//! - `CandidateReader` for lookup enumeration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             permcheck-storage                │
//! ├─────────────────────────────────────────────┤
//! │  error.rs  - StorageError                   │
//! │  memory.rs - MVCC in-memory implementation  │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;

//! Bulk permission checking.
//!
//! Producers publish candidate entities or subjects through a publisher,
//! then a single `execute_requests` call evaluates the batch under one
//! concurrency budget. Allowed ids reach the result callback in ascending
//! id order, each with the continuation token of the id after it.
//!
//! ```ignore
//! let bulk = BulkChecker::builder(checker, BulkCheckerType::Entity)
//!     .with_token(token.clone())
//!     .with_callback(|id, continuation| collected.lock().unwrap().push(id.to_string()))
//!     .build()?;
//! let publisher = BulkEntityPublisher::new(&bulk, "acme", "view", subject);
//! publisher.publish(entity, metadata, context, None).await;
//! bulk.execute_requests(100).await?;
//! ```

mod checker;
mod types;


pub use checker::{BulkChecker, BulkCheckerBuilder, BulkEntityPublisher, BulkSubjectPublisher};
pub use types::{
    BulkCheckError, BulkCheckRequest, BulkCheckResult, BulkCheckerConfig, BulkCheckerType,
    ResultCallback,
};

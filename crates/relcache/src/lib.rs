//! relcache: a sparse record cache kept consistent with a remote stream of
//! path-addressed operations.
//!
//! Records live in a JSON tree addressed by record paths (see
//! [`relcache_path`]). Links between records are stored on both ends, under
//! the `__rel` marker. Changing one end of a link is expanded by the
//! [`OperationDecomposer`] into the operations that bring the other end
//! along, and the result is applied to the [`Cache`].
//!
//! Operations travel between clients through [`OperationQueues`], one queue
//! per type and one per record. Subscribers receive each operation once, no
//! matter how many of their queues carried it. The
//! [`EagerRelationshipLoader`] subscribes to the records that incoming
//! records link to.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use relcache::{LinkedStore, ModelDefinition, Schema};
//! use relcache_path::rel_path;
//! use serde_json::json;
//!
//! let schema = Schema::new()
//!     .with_model("planet", ModelDefinition::new().has_many("moons", "moon", "planet"))
//!     .with_model("moon", ModelDefinition::new().has_one("planet", "planet", "moons"));
//! let mut store = LinkedStore::new(Arc::new(schema));
//! store.add_record("planet", json!({"id": "10", "__rel": {"moons": {}}})).unwrap();
//! store.add_record("moon", json!({"id": "20", "__rel": {"planet": null}})).unwrap();
//!
//! store.add_link("moon", "20", "planet", "10").unwrap();
//! assert_eq!(
//!     store.cache().retrieve_members(&rel_path("planet", "10", "moons")),
//!     vec!["20"]
//! );
//! ```

pub mod types;
pub mod schema;
pub mod cache;
pub mod matcher;
pub mod decompose;
pub mod codec;
pub mod queue;
pub mod eager;
pub mod store;

pub use types::{OpKind, Operation, SyncError};
pub use schema::{LinkDefinition, LinkKind, ModelDefinition, Schema};
pub use cache::{validate_operation, Cache, CacheObserver, LinkValue, Outcome};
pub use matcher::{classify, OperationMatcher, ValueKind};
pub use decompose::{LinkChange, OperationDecomposer, Target};
pub use queue::{
    Delivery, MemoryTransport, OperationListener, OperationQueues, QueueOptions, QueuedOperation,
    Scope, Transport,
};
pub use eager::{EagerRelationshipLoader, RecordSubscriber};
pub use store::{LinkedStore, StoreListener};

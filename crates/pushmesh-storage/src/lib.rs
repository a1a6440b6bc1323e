//! Typed KV-store wrappers mirroring session and topic state cluster-wide,
//! generalized behind a `KvStore` trait so routing logic can be tested
//! without a real Redis.

pub mod error;
pub mod kv;
pub mod memory_store;
pub mod redis_store;
pub mod session_store;
pub mod topic_store;

pub use error::{Result, StorageError};
pub use kv::{KvStore, DEFAULT_TTL};
pub use memory_store::InMemoryKvStore;
pub use redis_store::{RedisKvStore, RedisStoreOptions};
pub use session_store::{SessionStore, SessionStoreData};
pub use topic_store::{TopicStore, TopicStoreData};

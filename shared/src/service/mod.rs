pub mod memory_store;
pub mod redis;
pub mod user_dispatcher;

// Re-export all from each module namespace
pub use memory_store::MemoryRankedStore;
pub use self::redis::ranked_store::{AdmitOutcome, AdmitRequest, RankedStore, RedisRankedStore};
pub use user_dispatcher::{UserDispatcher, UserTask};

pub mod coordinator;
pub mod extract;
pub mod queue;

pub use coordinator::{Coordinator, Sources};
pub use extract::{extract, ExtractOutcome, WorkerContext};
pub use queue::InMemoryTaskQueue;

#[cfg(feature = "redis-backend")]
pub use queue::redis_backend::RedisTaskQueue;

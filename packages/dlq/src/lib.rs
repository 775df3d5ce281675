pub mod database;
pub mod drain;
pub mod entity;
pub mod error;
pub mod publisher;
pub mod queue;
pub mod schema;
pub mod store;

pub use drain::{DrainReport, RetryDrainWorker};
pub use error::{DlqError, StoreError};
pub use publisher::{PublishOutcome, ReliablePublisher};
pub use queue::DeadLetterQueue;
pub use store::{DeadLetterStore, MemoryDeadLetterStore, SeaOrmDeadLetterStore};

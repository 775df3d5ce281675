pub mod clock;
pub mod config;
pub mod dlq;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BrokerConfig, DatabaseConfig, DlqConfig, ServiceConfig};
pub use dlq::{DeadLetterEvent, DlqStats, InsertOutcome, InvalidEvent, RetryOutcome};

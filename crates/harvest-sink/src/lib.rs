pub mod buffer;
pub mod dead_letter;
pub mod error;
pub mod mapping;
pub mod pusher;
pub mod store;

pub use buffer::{read_artifact, DurableBuffer, SessionHandle};
pub use dead_letter::{DeadLetterEntry, DeadLetterLog};
pub use error::SinkError;
pub use mapping::{sink_item, MappingContext, DEFAULT_CHANNEL};
pub use pusher::{FlushReport, PushOutcome, Pusher, ReplayReport, SinkSettings, DEFAULT_BATCH_SIZE};
pub use store::{OrderRow, OrderStore, PoolConfig};

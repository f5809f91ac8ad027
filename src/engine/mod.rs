pub mod envelope;
pub mod filter;
pub mod persistence;
pub mod query;
pub mod record;
pub mod seed;
pub mod store;

pub use envelope::Envelope;
pub use filter::{Filter, FilterOp};
pub use persistence::{DurableSlot, FileSlot, MemorySlot};
pub use query::{Collection, Operation, OrderOptions, Query};
pub use record::Record;
pub use store::{ChangeEvent, Collections, EventType, Store, Subscription, DEFAULT_STORAGE_KEY};

/// Entry point wiring the store, read cache and fetch client from a [`Config`](crate::Config).
pub mod discovery;

pub use discovery::{new, Engine};

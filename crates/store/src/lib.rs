pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryKvStore;
pub use postgres::PostgresKvStore;
pub use store::{KvStore, KvStoreExt};

pub mod memory;
pub mod postgres;
pub mod retry;

pub use memory::InMemoryKeyValueStore;
pub use postgres::PostgresKeyValueStore;
pub use retry::RetryingStore;

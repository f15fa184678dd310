pub mod api;
pub mod store;

pub use api::{AssistantClient, PermissionProvider, ReplySink, TranscriptSource};
pub use store::{KeyValueStore, KeyValueStoreExt};

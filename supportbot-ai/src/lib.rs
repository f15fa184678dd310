pub mod client;
pub mod models;
pub mod provider;

// Re-export public APIs
pub use client::SupportAssistant;
pub use models::ProviderConfig;
pub use provider::{ModelProvider, OpenAIProvider};

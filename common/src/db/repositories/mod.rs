// Repository layer for database operations

pub mod extension;
pub mod trigger;

pub use extension::{ExtensionStore, PostgresExtensionStore};
pub use trigger::{PostgresTriggerIndex, TriggerIndex};

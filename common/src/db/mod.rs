// Database layer: connection pool and the trigger/extension repositories

pub mod pool;
pub mod repositories;

pub use pool::DbPool;
pub use repositories::{
    ExtensionStore, PostgresExtensionStore, PostgresTriggerIndex, TriggerIndex,
};

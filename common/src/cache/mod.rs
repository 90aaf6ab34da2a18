// Cache layer: Redis client, object cache, and the OnChange reverse index

pub mod object;
pub mod on_change;
pub mod redis;

pub use object::{ObjectCache, RedisObjectCache};
pub use on_change::{OnChangeIndex, RedisOnChangeIndex};
pub use self::redis::RedisClient;

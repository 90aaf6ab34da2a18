// Queue module: producer-only hand-off to the extension scheduler

pub mod nats;
pub mod publisher;

pub use nats::NatsClient;
pub use publisher::{DispatchRecord, NatsSchedulePublisher, SchedulePublisher};

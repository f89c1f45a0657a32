// Task queue module: NATS JetStream producer side

pub mod nats;
pub mod publisher;

pub use nats::{NatsClient, NatsConfig};
pub use publisher::{NatsTaskPublisher, TaskPublisher};

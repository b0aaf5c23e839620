pub mod operations;
pub mod session;
pub mod transport;

pub use operations::{StateReport, Topics};
pub use session::{BrokerSession, PublishError, SessionTiming};
pub use transport::RumqttTransport;

pub mod config;
pub mod error;
pub mod event_bus;

pub use config::{AppConfig, BroadcastConfig};
pub use error::{BroadcastError, BroadcastResult};
pub use event_bus::{BroadcastEvent, CaptureSink, EventSink, TracingSink};

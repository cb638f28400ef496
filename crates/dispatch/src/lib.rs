//! Weighted-batch broadcast dispatch — quota-aware batch planning,
//! reachability and session caching, paced sequential delivery, and a
//! single retry pass for failed recipients.

#![warn(clippy::unwrap_used)]

pub mod capability;
pub mod dispatcher;
pub mod memory;
pub mod observer;
pub mod planner;
pub mod session;
pub mod transport;
pub mod weight;

pub use capability::CapabilityCache;
pub use dispatcher::{BroadcastDispatcher, BroadcastOptions};
pub use memory::MemoryTransport;
pub use observer::BroadcastObserver;
pub use planner::BatchPlanner;
pub use session::SessionCache;
pub use transport::{Session, Transport};
pub use weight::WeightModel;

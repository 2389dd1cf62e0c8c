pub mod dispatcher;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod session;
pub mod symbol;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{FanoutDispatcher, TickBatches};
pub use protocol::{Tick, UpstreamCommand, UpstreamFrame, ViewerCommand, ViewerReply};
pub use registry::SubscriptionRegistry;
pub use service::{RelayEvent, RelayHandle, RelayService, RelaySettings, RelaySnapshot};
pub use session::{SessionId, ViewerSession};
pub use symbol::Symbol;
pub use upstream::{ConnectionId, FeedConnector, ReadyState, UpstreamConnector, UpstreamEvent, UpstreamLink};

pub mod huobi;
pub mod huobi_ws;
pub mod protocol;
pub mod subscriptions;

pub use huobi::HuobiClient;
pub use huobi_ws::{backoff_delay, ConnectionState, FeedClient, FeedStats};
pub use protocol::{InboundFrame, KlineUpdate, OutboundFrame};
pub use subscriptions::SubscriptionManager;

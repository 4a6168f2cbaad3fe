/// Tickhub Data - Market Data Distribution Engine
///
/// Core library for the tickhub server binary:
/// - Subscription registry multiplexing viewers onto shared symbol streams
/// - Resilient upstream feed adapter with frame normalization
/// - Historical backfill with rate budgeting and failure cooldowns
/// - Bounded rolling tick/bar store with incremental SMA/EMA/RSI
/// - Broadcast dispatch: market data, throttled charts, heartbeats
pub mod backfill;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod feed;
pub mod indicator;
pub mod registry;
pub mod session;
pub mod store;
pub mod symbol;

// Re-export the types the server binary wires together
pub use config::HubConfig;
pub use error::DataError;
pub use event::{Bar, ClientRequest, ServerEvent, SymbolTick, Tick, UpstreamStatus};
pub use symbol::Symbol;

pub use backfill::{BackfillFetcher, HistorySource, RestHistorySource};
pub use feed::{spawn_feed, FeedCommand, FeedHandle, FeedState};
pub use registry::{ConnectionId, Registry, SubscribeOutcome};
pub use session::{SessionClock, SessionStatus};
pub use store::RollingStore;

pub mod candle_store;
pub mod indicators;
pub mod notifier;
pub mod pipeline;
pub mod signal_detector;
pub mod store;
pub mod track_record;

pub use candle_store::{CandleStore, CandleWindow};
pub use indicators::{IndicatorEngine, IndicatorState};
pub use notifier::{
    notifier_from_config, LogNotifier, NotificationDispatcher, Notifier, TelegramNotifier,
};
pub use pipeline::SignalPipeline;
pub use signal_detector::{Evaluation, RiskLevels, SignalDetector, SkipReason};
pub use store::{
    open_state_stores, JsonFileStore, MemoryStore, PersistentState, SqliteStore, StateStores,
    Store,
};
pub use track_record::{SignalHistoryStore, TrackRecordStore};

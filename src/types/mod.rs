pub mod candle;
pub mod signal;
pub mod track_record;

pub use candle::*;
pub use signal::*;
pub use track_record::*;

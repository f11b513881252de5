pub mod candle;
pub mod csv_replay;
pub mod series;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle::{Candle, PricePolicy, RawCandle};
pub use series::SeriesStore;

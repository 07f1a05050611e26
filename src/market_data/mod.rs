pub mod digit_stats;
pub mod tick_buffer;
pub mod tick_stream;

// Re-exports for convenient access (e.g. `use crate::market_data::TickBuffer`).
pub use digit_stats::DigitStats;
pub use tick_buffer::TickBuffer;
pub use tick_stream::{DerivTickSource, TickFeed, TickSource};

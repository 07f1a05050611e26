// =============================================================================
// Signals Module
// =============================================================================
//
// Signal pipeline for the reversion engine:
// - Distribution analysis of the tick buffer (high/low dominance)
// - Idle/Active lifecycle controller with countdown and expiry
// - Subscriber fan-out of lifecycle transitions

pub mod distribution;
pub mod lifecycle;
pub mod notify;

pub use distribution::{analyze, DistributionSnapshot};
pub use lifecycle::{Signal, SignalController};
pub use notify::{ClearReason, SignalEvent, Subscription};

// =============================================================================
// Engine errors surfaced to callers of `SignalEngine::start`
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The tick source could not be subscribed. Recoverable: retry later.
    #[error("upstream tick source unavailable: {0}")]
    UpstreamUnavailable(String),

    /// `stop` was called while `start` was still connecting.
    #[error("engine start cancelled by stop")]
    Cancelled,
}

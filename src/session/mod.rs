//! PSI session orchestration.
//!
//! One [`SessionCoordinator`] owns exactly one [`PsiSession`]. Concurrent
//! sessions each get their own coordinator, key material and buffers.

pub mod coordinator;
pub mod retry;
pub mod state;

pub use coordinator::{
    AbortHandle, PsiSession, SessionCoordinator, SessionSettings, DEFAULT_ROUND_TIMEOUT,
};
pub use retry::{retry_until_cancelled, retry_with_backoff, RetryPolicy};
pub use state::SessionPhase;

//! Claim-and-dispatch pipelines.
//!
//! Both schedulers sit on the same [`WatchAndClaim`] primitive:
//!
//! 1. Watch the work feed for desired items on the local stack
//! 2. Claim each one with a compare-and-swap; losing the race is normal
//! 3. Hand the claimed item to the executor
//!
//! Tasks carry a completion callback and are resolved in the feed if the
//! executor refuses them. LRPs are fire-and-forget.

pub mod claim;
pub mod lrp;
pub mod task;

pub use claim::{Claimable, WatchAndClaim};
pub use lrp::LrpScheduler;
pub use task::{TaskDispatcher, TaskScheduler};

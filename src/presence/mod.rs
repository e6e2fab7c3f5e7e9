//! Host presence: the TTL lease that tells the rest of the cluster this
//! host is alive and which stack it runs.
//!
//! Lease expiry is the cluster's failure detector, so the maintainer
//! favours staying registered over failing fast. See
//! [`PresenceMaintainer`] for the state machine.

pub mod maintainer;

pub use maintainer::{PresenceMaintainer, PresenceState};

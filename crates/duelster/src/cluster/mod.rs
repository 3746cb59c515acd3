//! Cluster coordination: membership tracking and leader election.

pub mod election;
pub mod membership;

pub use election::Elector;
pub use membership::{LeaderAdvertiser, MembershipTasks, PeerRegistry};

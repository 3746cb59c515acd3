//! Per-match event-sequenced state machine with Host/Shadow replication.

pub mod engine;
pub mod event;
pub mod state;

pub use engine::{MatchEngine, Outbound};
pub use event::{EventKind, MatchCommand, MatchEvent};
pub use state::{MatchPhase, MatchState, Seat};

pub mod candidates;
pub mod link;

pub use candidates::CandidateTracker;
pub use link::{LinkPhase, PeerEvent, PeerLink};

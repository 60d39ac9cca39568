//! Manual signaling primitives: the copy/paste description codec, the
//! readiness latches and the trickle candidate relay.

pub mod codec;
pub mod gate;
pub mod relay;

pub use codec::{CodecError, DescriptionKind, NegotiationDescription};
pub use gate::{Latch, ReadinessGate, WaitTimeout};
pub use relay::{CandidateRelay, RelayDecodeError, RelayStats, RelayedCandidate};

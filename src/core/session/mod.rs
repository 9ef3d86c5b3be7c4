//! Call sessions: inbound envelope parsing and the per-call state machine.

pub mod call;
pub mod envelope;

pub use call::{CallSession, Effect, SessionDiagnostic, SessionEvent, SessionState};
pub use envelope::{EnvelopeError, InboundEvent, MediaChunk, StreamStart};

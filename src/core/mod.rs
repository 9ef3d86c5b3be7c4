pub mod queue;
pub mod session;
pub mod sink;
pub mod upstream;

// Re-export commonly used types for convenience
pub use queue::{AudioFrameQueue, DEFAULT_QUEUE_CAPACITY};
pub use session::{
    CallSession, Effect, EnvelopeError, InboundEvent, SessionDiagnostic, SessionEvent,
    SessionState,
};
pub use sink::{TracingSink, TranscriptSink};
pub use upstream::{
    DeepgramClient, DeepgramClientConfig, UpstreamConfig, UpstreamConnection, UpstreamError,
    UpstreamEvent, UpstreamFactory, UpstreamHandle,
};

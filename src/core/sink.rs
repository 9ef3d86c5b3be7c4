//! Destination for finalized transcripts and session diagnostics.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use crate::core::session::SessionDiagnostic;

/// Receives finalized utterances and diagnostic events from every session.
///
/// Implementations are shared across sessions and called from the session
/// task, so they must not block.
pub trait TranscriptSink: Send + Sync {
    fn on_final_transcript(&self, session_id: &str, text: &str, timestamp: OffsetDateTime);

    fn on_diagnostic(&self, session_id: &str, diagnostic: &SessionDiagnostic);
}

/// Default sink: writes everything to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TranscriptSink for TracingSink {
    fn on_final_transcript(&self, session_id: &str, text: &str, timestamp: OffsetDateTime) {
        let timestamp = timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| timestamp.unix_timestamp().to_string());
        info!(
            target: "callscribe::transcript",
            session_id,
            timestamp = %timestamp,
            text,
            "Final transcript"
        );
    }

    fn on_diagnostic(&self, session_id: &str, diagnostic: &SessionDiagnostic) {
        match serde_json::to_string(diagnostic) {
            Ok(json) => info!(
                target: "callscribe::diagnostic",
                session_id,
                diagnostic = %json,
                "Session diagnostic"
            ),
            Err(e) => warn!(session_id, error = %e, "Failed to serialize diagnostic"),
        }
    }
}

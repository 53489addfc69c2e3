use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::history::HistoryEntry;
use crate::sinks::{HistorySink, RenderSink};
use crate::types::{AnalysisResult, ExerciseMode, Session, SourceKind};

/// Converts the result stream into repetition-count changes and session
/// lifecycle events.
///
/// Per-session state machine: idle, then active on source start, then
/// finalized (at most one history record) on stop, end-of-media, or source
/// switch. No two sessions are ever active at once; a new start forces the
/// previous finalize first.
pub struct SessionTracker {
    session: Session,
    history: Arc<dyn HistorySink>,
    render: Arc<dyn RenderSink>,
}

impl SessionTracker {
    pub fn new(
        mode: ExerciseMode,
        history: Arc<dyn HistorySink>,
        render: Arc<dyn RenderSink>,
    ) -> Self {
        Self {
            session: Session::idle(mode),
            history,
            render,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Mirror the analyzer's count and fire a one-shot pulse when it grows.
    /// The local count is a mirror, never independently computed.
    pub fn on_result(&mut self, result: &AnalysisResult) {
        self.session.rep_count = result.reps;
        if result.reps > self.session.last_announced {
            self.render.rep_pulse();
            self.session.last_announced = result.reps;
        }
    }

    /// Mode changed by user action mid-session; counts are untouched.
    pub fn on_mode_changed(&mut self, mode: ExerciseMode) {
        debug!(mode = %mode, "exercise mode changed");
        self.session.mode = mode;
    }

    /// A source is starting. A prior session with counted reps is
    /// auto-saved before the counters reset, so source switches and repeated
    /// uploads produce one history row per session.
    pub fn on_source_start(&mut self, kind: SourceKind) {
        self.finalize();

        self.session.id = Uuid::new_v4();
        self.session.rep_count = 0;
        self.session.last_announced = 0;
        self.session.active = true;
        self.session.source = kind;
        self.session.started_at = Utc::now();
        info!(id = %self.session.id, source = ?kind, "session started");
    }

    /// Explicit stop of the active source.
    pub fn on_source_stop(&mut self) {
        self.render.status("READY");
        self.finalize();
    }

    /// A file source reached its natural end of media. Converges on the
    /// same finalize path as an explicit stop.
    pub fn on_video_ended(&mut self) {
        self.render.status("COMPLETE");
        self.finalize();
    }

    /// Finalize the active session into history. A no-op when no session is
    /// active (repeated stops never double-record) or when nothing was
    /// counted (zero-rep sessions leave no history).
    fn finalize(&mut self) {
        if !self.session.active {
            return;
        }
        self.session.active = false;
        self.session.source = SourceKind::None;

        if self.session.rep_count == 0 {
            debug!(id = %self.session.id, "zero-rep session discarded");
            return;
        }

        info!(
            id = %self.session.id,
            reps = self.session.rep_count,
            mode = %self.session.mode,
            "session finalized into history"
        );
        self.history.record(HistoryEntry::new(
            self.session.mode,
            self.session.rep_count,
        ));
    }
}

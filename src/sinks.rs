use tracing::{debug, info};

use crate::history::HistoryEntry;
use crate::types::{AnalysisResult, FeedbackSeverity};

/// Rendering collaborator: annotated frames, feedback, rep pulses, status.
pub trait RenderSink: Send + Sync {
    /// Render a decoded result carrying an annotated frame.
    fn render(&self, result: &AnalysisResult);

    /// One-shot visual pulse fired when the repetition count increases.
    fn rep_pulse(&self);

    /// Coarse status line (READY, COMPLETE).
    fn status(&self, text: &str);
}

/// Rolling chart of angle samples.
pub trait ChartSink: Send + Sync {
    fn push(&self, value: f64);
}

/// Persistent-enough destination for finalized session records.
pub trait HistorySink: Send + Sync {
    fn record(&self, entry: HistoryEntry);
}

/// Console renderer for the headless client: feedback and counters become
/// log lines.
pub struct LogRenderSink;

impl RenderSink for LogRenderSink {
    fn render(&self, result: &AnalysisResult) {
        match &result.feedback {
            Some(feedback) => {
                let marker = match result.severity {
                    FeedbackSeverity::Good => "+",
                    FeedbackSeverity::Bad => "!",
                    FeedbackSeverity::Neutral => " ",
                };
                info!(reps = result.reps, "[{}] {}", marker, feedback);
            }
            None => debug!(reps = result.reps, "frame rendered"),
        }
    }

    fn rep_pulse(&self) {
        info!("rep counted");
    }

    fn status(&self, text: &str) {
        info!("status: {}", text);
    }
}

/// Chart stand-in that logs every pushed sample.
pub struct LogChartSink;

impl ChartSink for LogChartSink {
    fn push(&self, value: f64) {
        debug!(angle = value, "chart sample");
    }
}

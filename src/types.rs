use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exercise mode announced to the analyzer with every configuration message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseMode {
    Squat,
    Curl,
}

impl ExerciseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExerciseMode::Squat => "squat",
            ExerciseMode::Curl => "curl",
        }
    }
}

impl Default for ExerciseMode {
    fn default() -> Self {
        ExerciseMode::Squat
    }
}

impl fmt::Display for ExerciseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExerciseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "squat" => Ok(ExerciseMode::Squat),
            "curl" => Ok(ExerciseMode::Curl),
            other => Err(format!("unknown exercise mode: {}", other)),
        }
    }
}

/// Which capture surface is feeding the sampling clock.
///
/// At most one kind is actively sampling at any time; starting one fully
/// stops the other first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    File,
    Camera,
    None,
}

/// Backpressure state for the single outstanding frame on the channel.
///
/// `sending == true` always implies an armed watchdog deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct InFlightState {
    /// A frame has been sent and no response has been observed yet.
    pub sending: bool,
    /// When the watchdog may force-release a stalled frame.
    pub watchdog_deadline: Option<Instant>,
}

impl InFlightState {
    /// Mark a frame as outstanding and arm the watchdog.
    pub fn arm(&mut self, deadline: Instant) {
        self.sending = true;
        self.watchdog_deadline = Some(deadline);
    }

    /// Release the send gate. Safe to call when already idle.
    pub fn release(&mut self) {
        self.sending = false;
        self.watchdog_deadline = None;
    }

    pub fn is_idle(&self) -> bool {
        !self.sending
    }
}

/// One continuous run of frame streaming under a single mode and source.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub mode: ExerciseMode,
    /// Mirror of the analyzer's authoritative repetition count.
    pub rep_count: u32,
    /// Highest count already announced through a rep pulse.
    pub last_announced: u32,
    pub active: bool,
    pub source: SourceKind,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn idle(mode: ExerciseMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            rep_count: 0,
            last_announced: 0,
            active: false,
            source: SourceKind::None,
            started_at: Utc::now(),
        }
    }
}

/// Severity attached to a piece of analyzer feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSeverity {
    Neutral,
    Good,
    Bad,
}

impl FeedbackSeverity {
    /// Map the analyzer's wire color onto a severity. Anything that is not
    /// green or red is neutral.
    pub fn from_color(color: &str) -> Self {
        match color {
            "green" => FeedbackSeverity::Good,
            "red" => FeedbackSeverity::Bad,
            _ => FeedbackSeverity::Neutral,
        }
    }
}

/// Decoded analyzer response, consumed and rendered, never retained.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Annotated frame payload, passed through opaquely to the renderer.
    /// Absent when the analyzer produced no frame for this message.
    pub image: Option<String>,
    pub reps: u32,
    pub feedback: Option<String>,
    pub severity: FeedbackSeverity,
    pub angle: Option<f64>,
}

/// A captured frame surface in packed RGB8, as handed to the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSurface {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl FrameSurface {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// A surface is usable once its dimensions are known and the pixel
    /// buffer matches them.
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 3
    }
}

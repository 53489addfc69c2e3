use serde::{Deserialize, Serialize};

use crate::types::{AnalysisResult, ExerciseMode, FeedbackSeverity};

/// Outbound message tag: JSON configuration payload.
pub const TAG_CONFIG: u8 = 1;
/// Outbound message tag: opaque encoded frame payload.
pub const TAG_FRAME: u8 = 2;

/// One-shot configuration message, sent once per source start and once per
/// mode change so the analyzer is primed before frames arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMessage {
    pub config: bool,
    pub mode: ExerciseMode,
}

impl ConfigMessage {
    pub fn new(mode: ExerciseMode) -> Self {
        Self { config: true, mode }
    }
}

/// Inbound analyzer response as it appears on the wire.
///
/// The analyzer attaches fields this client does not consume (raw keypoints,
/// extended remarks); those are ignored during deserialization. An absent
/// `processed_image` means "no frame produced" and must never be rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_image: Option<String>,

    #[serde(default)]
    pub reps: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    #[serde(default)]
    pub color: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f64>,
}

impl ResultMessage {
    /// Convert the wire shape into the domain result.
    ///
    /// The analyzer reports `angle: 0` and `feedback: ""` when it has no
    /// reading; both collapse to `None` here.
    pub fn into_result(self) -> AnalysisResult {
        AnalysisResult {
            image: self.processed_image,
            reps: self.reps,
            feedback: self.feedback.filter(|text| !text.is_empty()),
            severity: FeedbackSeverity::from_color(&self.color),
            angle: self.angle.filter(|angle| *angle != 0.0),
        }
    }
}

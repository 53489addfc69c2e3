use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::config::{ChartConfig, StreamingConfig};
use crate::encoder::{EncodeOptions, FrameEncoder};
use crate::protocol::{ConfigMessage, ResultMessage};
use crate::source::{FramePoll, FrameSource};
use crate::transport::ChannelSender;
use crate::types::{AnalysisResult, ExerciseMode, InFlightState, SourceKind};

/// Why a sampling tick sent nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No source is currently sampling.
    NoActiveSource,
    /// The channel is not open; sends are silently skipped.
    ChannelClosed,
    /// A frame is already awaiting a response.
    FrameInFlight,
    /// The source has no valid surface yet.
    SurfaceNotReady,
    /// The source is paused.
    SourcePaused,
    /// The surface could not be encoded.
    EncodeFailed,
    /// The channel rejected the send; the next tick is the retry.
    SendFailed,
}

/// Outcome of one sampling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was encoded and sent; the gate is now closed.
    Sent,
    Skipped(SkipReason),
    /// The source reached its natural end; the caller finalizes the session
    /// and stops sampling.
    SourceEnded,
}

/// Outcome of one inbound channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Full result carrying an annotated frame: track, render, and maybe
    /// chart one angle sample.
    Frame {
        result: AnalysisResult,
        chart_sample: Option<f64>,
    },
    /// Result without a frame payload (config ack or analyzer skip): the
    /// session tracker still sees it, nothing is rendered.
    Ack { result: AnalysisResult },
    /// Unparseable payload, discarded. The send gate was still released.
    Malformed,
}

/// The frame streaming and backpressure controller.
///
/// Owns the in-flight gate, the watchdog deadline, and the single active
/// source slot. The sampling clock lives with the caller; this type decides
/// what each tick may do. All methods run to completion before the next
/// event is admitted, so the state they share needs no synchronization.
pub struct StreamingController {
    channel: Arc<dyn ChannelSender>,
    encoder: Box<dyn FrameEncoder>,
    source: Option<Box<dyn FrameSource>>,
    mode: ExerciseMode,
    in_flight: InFlightState,
    video_period: Duration,
    camera_period: Duration,
    watchdog_timeout: Duration,
    max_frame_dimension: u32,
    mirror_camera: bool,
    angle_downsample: u64,
    angle_samples: u64,
}

impl StreamingController {
    pub fn new(
        channel: Arc<dyn ChannelSender>,
        encoder: Box<dyn FrameEncoder>,
        mode: ExerciseMode,
        streaming: &StreamingConfig,
        chart: &ChartConfig,
    ) -> Self {
        Self {
            channel,
            encoder,
            source: None,
            mode,
            in_flight: InFlightState::default(),
            video_period: streaming.video_sampling_period,
            camera_period: streaming.camera_sampling_period,
            watchdog_timeout: streaming.watchdog_timeout,
            max_frame_dimension: streaming.max_frame_dimension,
            mirror_camera: streaming.mirror_camera,
            angle_downsample: u64::from(chart.angle_downsample.max(1)),
            angle_samples: 0,
        }
    }

    /// Install a new source, stopping any other active one first, and prime
    /// the analyzer with a configuration message.
    pub async fn start_sampling(&mut self, source: Box<dyn FrameSource>) {
        self.stop_sampling();
        info!(kind = ?source.kind(), "starting frame sampling");
        self.source = Some(source);
        self.send_config().await;
    }

    /// Stop sampling and clear the send gate. Idempotent.
    pub fn stop_sampling(&mut self) {
        if let Some(mut source) = self.source.take() {
            debug!(kind = ?source.kind(), "stopping frame sampling");
            source.stop();
        }
        self.in_flight.release();
    }

    pub fn active_source(&self) -> SourceKind {
        self.source
            .as_ref()
            .map(|source| source.kind())
            .unwrap_or(SourceKind::None)
    }

    /// Sampling period for the active source, if any.
    pub fn active_period(&self) -> Option<Duration> {
        match self.active_source() {
            SourceKind::File => Some(self.video_period),
            SourceKind::Camera => Some(self.camera_period),
            SourceKind::None => None,
        }
    }

    pub fn mode(&self) -> ExerciseMode {
        self.mode
    }

    pub fn in_flight(&self) -> InFlightState {
        self.in_flight
    }

    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.in_flight.watchdog_deadline
    }

    /// One sampling tick. At most one frame is ever awaiting a response;
    /// ticks that arrive while one is outstanding are dropped, not queued.
    pub async fn on_tick(&mut self, now: Instant) -> TickOutcome {
        let Some(source) = self.source.as_mut() else {
            return TickOutcome::Skipped(SkipReason::NoActiveSource);
        };
        if !self.channel.is_open() {
            return TickOutcome::Skipped(SkipReason::ChannelClosed);
        }
        if self.in_flight.sending {
            return TickOutcome::Skipped(SkipReason::FrameInFlight);
        }

        let mirror = source.kind() == SourceKind::Camera && self.mirror_camera;
        let surface = match source.poll_frame(now) {
            FramePoll::Ready(surface) => surface,
            FramePoll::NotReady => return TickOutcome::Skipped(SkipReason::SurfaceNotReady),
            FramePoll::Paused => return TickOutcome::Skipped(SkipReason::SourcePaused),
            FramePoll::Ended => return TickOutcome::SourceEnded,
        };

        let options = EncodeOptions {
            max_dimension: self.max_frame_dimension,
            mirror,
        };
        let payload = match self.encoder.encode(surface, &options) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "frame encode failed, skipping cycle");
                return TickOutcome::Skipped(SkipReason::EncodeFailed);
            }
        };

        self.in_flight.arm(now + self.watchdog_timeout);
        match self.channel.send_frame(&payload).await {
            Ok(()) => {
                trace!(bytes = payload.len(), "frame sent");
                TickOutcome::Sent
            }
            Err(e) => {
                debug!(error = %e, "frame send failed, releasing gate");
                self.in_flight.release();
                TickOutcome::Skipped(SkipReason::SendFailed)
            }
        }
    }

    /// One inbound channel message. The send gate is released no matter
    /// what the payload turns out to be; a malformed message must not stall
    /// the pipeline. A late reply after a watchdog release is accepted.
    pub fn on_message(&mut self, raw: &str) -> MessageOutcome {
        self.in_flight.release();

        let message: ResultMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "discarding malformed analyzer message");
                return MessageOutcome::Malformed;
            }
        };

        let has_image = message.processed_image.is_some();
        let result = message.into_result();
        if !has_image {
            trace!(reps = result.reps, "imageless analyzer message");
            return MessageOutcome::Ack { result };
        }

        let chart_sample = match result.angle {
            Some(angle) => {
                self.angle_samples += 1;
                if self.angle_samples % self.angle_downsample == 0 {
                    Some(angle)
                } else {
                    None
                }
            }
            None => None,
        };

        MessageOutcome::Frame {
            result,
            chart_sample,
        }
    }

    /// Watchdog expiry check: if a frame has been outstanding past its
    /// deadline, force the gate open. This is the sole recovery path for a
    /// dropped or unbounded-latency response.
    pub fn on_watchdog_fire(&mut self, now: Instant) -> bool {
        match self.in_flight.watchdog_deadline {
            Some(deadline) if self.in_flight.sending && now >= deadline => {
                debug!("watchdog released a stalled frame");
                self.in_flight.release();
                true
            }
            _ => false,
        }
    }

    /// Change the exercise mode mid-session. Re-primes the analyzer; local
    /// counts are never reset here, the analyzer is authoritative.
    pub async fn set_mode(&mut self, mode: ExerciseMode) {
        self.mode = mode;
        self.send_config().await;
    }

    async fn send_config(&self) {
        if !self.channel.is_open() {
            debug!("channel closed, config message skipped");
            return;
        }
        let message = ConfigMessage::new(self.mode);
        if let Err(e) = self.channel.send_config(&message).await {
            warn!(error = %e, "config message send failed");
        }
    }
}

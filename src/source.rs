use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::errors::SourceError;
use crate::types::{FrameSurface, SourceKind};

/// Outcome of asking the active source for its current surface.
#[derive(Debug)]
pub enum FramePoll<'a> {
    /// A usable surface is available right now.
    Ready(&'a FrameSurface),
    /// The source is running but has no valid surface yet (e.g. dimensions
    /// not available). Skip this cycle.
    NotReady,
    /// The source is paused; skip this cycle.
    Paused,
    /// The source has reached its natural end or was stopped.
    Ended,
}

/// A capture surface feeding the sampling clock: either a file-backed clip
/// or a live camera device.
pub trait FrameSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Current surface at this sampling instant.
    fn poll_frame(&mut self, now: Instant) -> FramePoll<'_>;

    /// Release the underlying device/clip. Further polls report `Ended`.
    fn stop(&mut self);
}

/// A decoded video clip: a frame list played back at a fixed interval.
#[derive(Debug, Clone)]
pub struct VideoClip {
    pub frames: Vec<FrameSurface>,
    pub frame_interval: Duration,
}

impl VideoClip {
    pub fn new(frames: Vec<FrameSurface>, frame_interval: Duration) -> Self {
        Self {
            frames,
            frame_interval,
        }
    }

    pub fn duration(&self) -> Duration {
        self.frame_interval * self.frames.len() as u32
    }

    /// Generate a synthetic clip with a band sweeping across a gradient,
    /// so every frame is distinct. Used by the demo console and tests.
    pub fn synthetic(width: u32, height: u32, frame_count: usize, frame_interval: Duration) -> Self {
        let mut frames = Vec::with_capacity(frame_count);
        for index in 0..frame_count {
            frames.push(synthetic_surface(width, height, index as u32));
        }
        Self::new(frames, frame_interval)
    }
}

/// Fill one synthetic RGB frame: horizontal gradient plus a moving band.
fn synthetic_surface(width: u32, height: u32, tick: u32) -> FrameSurface {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    let band = if width > 0 { (tick * 7) % width } else { 0 };
    for y in 0..height {
        for x in 0..width {
            let in_band = x.abs_diff(band) < 8;
            let base = ((x * 255) / width.max(1)) as u8;
            if in_band {
                data.extend_from_slice(&[255, 255 - base, 32]);
            } else {
                data.extend_from_slice(&[base, base / 2, ((y * 255) / height.max(1)) as u8]);
            }
        }
    }
    FrameSurface::new(width, height, data)
}

/// Plays a pre-recorded clip against the wall clock, like a file-backed
/// video element: starts on first poll, pausable, ends past the last frame.
pub struct VideoFileSource {
    clip: VideoClip,
    origin: Option<Instant>,
    paused: bool,
    pause_started: Option<Instant>,
    stopped: bool,
}

impl VideoFileSource {
    pub fn new(clip: VideoClip) -> Self {
        info!(
            frames = clip.frames.len(),
            interval_ms = clip.frame_interval.as_millis() as u64,
            "loaded video clip"
        );
        Self {
            clip,
            origin: None,
            paused: false,
            pause_started: None,
            stopped: false,
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if !self.paused {
            self.paused = true;
            self.pause_started = Some(now);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if self.paused {
            // Shift the playback origin so paused time does not count.
            if let (Some(origin), Some(pause_started)) = (self.origin, self.pause_started) {
                self.origin = Some(origin + now.duration_since(pause_started));
            }
            self.paused = false;
            self.pause_started = None;
        }
    }

    fn frame_index(&self, now: Instant) -> Option<usize> {
        let origin = self.origin?;
        let elapsed = now.saturating_duration_since(origin);
        let interval = self.clip.frame_interval.max(Duration::from_millis(1));
        Some((elapsed.as_micros() / interval.as_micros().max(1)) as usize)
    }
}

impl FrameSource for VideoFileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn poll_frame(&mut self, now: Instant) -> FramePoll<'_> {
        if self.stopped {
            return FramePoll::Ended;
        }
        if self.clip.frames.is_empty() {
            return FramePoll::NotReady;
        }
        if self.paused {
            return FramePoll::Paused;
        }
        if self.origin.is_none() {
            // Playback begins at the first poll after the source starts.
            self.origin = Some(now);
        }
        match self.frame_index(now) {
            Some(index) if index < self.clip.frames.len() => {
                FramePoll::Ready(&self.clip.frames[index])
            }
            _ => {
                debug!("video clip reached end of media");
                FramePoll::Ended
            }
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.origin = None;
    }
}

/// A live capture device behind the camera source.
///
/// `try_frame` returning `Ok(None)` means the device has not produced a
/// frame yet (warm-up); the caller retries on the next sampling tick.
pub trait CaptureDevice: Send + Sync {
    /// Probe the device once before streaming starts. Failure here is fatal
    /// to starting the camera, and only the camera.
    fn warm_up(&mut self) -> Result<(), SourceError>;

    fn try_frame(&mut self) -> Result<Option<FrameSurface>, SourceError>;
}

/// Live camera source. Holds the most recent frame so a slow device never
/// starves the sampling clock once the first frame has landed.
pub struct CameraSource {
    device: Box<dyn CaptureDevice>,
    latest: Option<FrameSurface>,
    stopped: bool,
}

impl CameraSource {
    pub fn open(mut device: Box<dyn CaptureDevice>) -> Result<Self, SourceError> {
        device.warm_up()?;
        info!("camera device acquired");
        Ok(Self {
            device,
            latest: None,
            stopped: false,
        })
    }
}

impl FrameSource for CameraSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Camera
    }

    fn poll_frame(&mut self, _now: Instant) -> FramePoll<'_> {
        if self.stopped {
            return FramePoll::Ended;
        }
        match self.device.try_frame() {
            Ok(Some(frame)) if frame.is_valid() => self.latest = Some(frame),
            Ok(Some(_)) | Ok(None) => {}
            Err(e) => {
                // Mid-run capture failures degrade to a skipped cycle.
                warn!(error = %e, "camera frame capture failed");
            }
        }
        match &self.latest {
            Some(frame) => FramePoll::Ready(frame),
            None => FramePoll::NotReady,
        }
    }

    fn stop(&mut self) {
        debug!("releasing camera device");
        self.stopped = true;
        self.latest = None;
    }
}

/// In-tree capture device producing a synthetic test pattern. Real hardware
/// plugs in behind the same trait.
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    frame_counter: u32,
    warmup_frames: u32,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_warmup(width, height, 2)
    }

    /// `warmup_frames` polls return no frame first, modelling a device that
    /// needs a moment before dimensions are available.
    pub fn with_warmup(width: u32, height: u32, warmup_frames: u32) -> Self {
        Self {
            width,
            height,
            frame_counter: 0,
            warmup_frames,
        }
    }
}

impl CaptureDevice for TestPatternCamera {
    fn warm_up(&mut self) -> Result<(), SourceError> {
        if self.width == 0 || self.height == 0 {
            return Err(SourceError::DeviceAcquisition {
                reason: "capture resolution is zero".to_string(),
            });
        }
        Ok(())
    }

    fn try_frame(&mut self) -> Result<Option<FrameSurface>, SourceError> {
        if self.frame_counter < self.warmup_frames {
            self.frame_counter += 1;
            return Ok(None);
        }
        self.frame_counter += 1;
        Ok(Some(synthetic_surface(
            self.width,
            self.height,
            self.frame_counter,
        )))
    }
}

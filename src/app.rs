use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant as TokioInstant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::AppConfig;
use crate::controller::{MessageOutcome, StreamingController, TickOutcome};
use crate::errors::{ClientError, TransportError};
use crate::encoder::DownscaleEncoder;
use crate::history::SharedHistoryLog;
use crate::session::SessionTracker;
use crate::sinks::{ChartSink, LogChartSink, LogRenderSink, RenderSink};
use crate::source::{CameraSource, CaptureDevice, FrameSource, VideoClip, VideoFileSource};
use crate::transport::ChannelSender;
use crate::types::{ExerciseMode, SourceKind};

/// User-driven commands fed into the event loop.
pub enum ClientCommand {
    /// Load a clip and start streaming it as the file source.
    StartVideo(VideoClip),
    /// Acquire a capture device and start streaming it as the camera source.
    StartCamera(Box<dyn CaptureDevice>),
    /// Stop whichever source is active.
    StopSource,
    /// Switch exercise mode mid-session.
    SetMode(ExerciseMode),
    Shutdown,
}

/// Builder wiring the client components together.
pub struct AppBuilder {
    config: AppConfig,
    mode: ExerciseMode,
    channel: Option<Arc<dyn ChannelSender>>,
    messages: Option<mpsc::Receiver<String>>,
    render: Arc<dyn RenderSink>,
    chart: Arc<dyn ChartSink>,
    history: SharedHistoryLog,
}

impl AppBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            mode: ExerciseMode::default(),
            channel: None,
            messages: None,
            render: Arc::new(LogRenderSink),
            chart: Arc::new(LogChartSink),
            history: SharedHistoryLog::new(),
        }
    }

    pub fn with_mode(mut self, mode: ExerciseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Attach the connected duplex channel: the send half and the inbound
    /// message stream.
    pub fn with_channel(
        mut self,
        channel: Arc<dyn ChannelSender>,
        messages: mpsc::Receiver<String>,
    ) -> Self {
        self.channel = Some(channel);
        self.messages = Some(messages);
        self
    }

    pub fn with_render_sink(mut self, render: Arc<dyn RenderSink>) -> Self {
        self.render = render;
        self
    }

    pub fn with_chart_sink(mut self, chart: Arc<dyn ChartSink>) -> Self {
        self.chart = chart;
        self
    }

    pub fn with_history(mut self, history: SharedHistoryLog) -> Self {
        self.history = history;
        self
    }

    /// Build the app and the command handle driving it.
    pub fn build(self) -> Result<(AnalysisClientApp, mpsc::Sender<ClientCommand>), ClientError> {
        let (channel, messages) = match (self.channel, self.messages) {
            (Some(channel), Some(messages)) => (channel, messages),
            _ => {
                return Err(TransportError::ConfigurationError {
                    message: "analyzer channel not attached".to_string(),
                }
                .into())
            }
        };

        let controller = StreamingController::new(
            channel,
            Box::new(DownscaleEncoder::new()),
            self.mode,
            &self.config.streaming,
            &self.config.chart,
        );
        let tracker = SessionTracker::new(
            self.mode,
            Arc::new(self.history.clone()),
            self.render.clone(),
        );

        let (command_tx, command_rx) = mpsc::channel(16);
        let app = AnalysisClientApp {
            controller,
            tracker,
            render: self.render,
            chart: self.chart,
            messages,
            commands: command_rx,
        };
        Ok((app, command_tx))
    }
}

/// The assembled client: one single-threaded event loop over the sampling
/// clock, the inbound message stream, the watchdog deadline, and user
/// commands. The loop admits one event at a time, which is the whole
/// concurrency story the controller relies on.
pub struct AnalysisClientApp {
    controller: StreamingController,
    tracker: SessionTracker,
    render: Arc<dyn RenderSink>,
    chart: Arc<dyn ChartSink>,
    messages: mpsc::Receiver<String>,
    commands: mpsc::Receiver<ClientCommand>,
}

impl AnalysisClientApp {
    /// Run until shutdown or until the analyzer channel closes (terminal
    /// for the run; no reconnect).
    pub async fn run(self) {
        let Self {
            mut controller,
            mut tracker,
            render,
            chart,
            mut messages,
            mut commands,
        } = self;

        let mut sampling: Option<Interval> = None;

        loop {
            let watchdog_deadline = controller.watchdog_deadline();

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            let keep_running = handle_command(
                                &mut controller,
                                &mut tracker,
                                &mut sampling,
                                command,
                            )
                            .await;
                            if !keep_running {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                message = messages.recv() => {
                    match message {
                        Some(raw) => {
                            dispatch_message(&mut controller, &mut tracker, &render, &chart, &raw);
                        }
                        None => {
                            warn!("analyzer channel closed, ending run");
                            tracker.on_source_stop();
                            controller.stop_sampling();
                            break;
                        }
                    }
                }

                _ = sleep_until_deadline(watchdog_deadline), if watchdog_deadline.is_some() => {
                    controller.on_watchdog_fire(Instant::now());
                }

                _ = next_tick(&mut sampling), if sampling.is_some() => {
                    match controller.on_tick(Instant::now()).await {
                        TickOutcome::SourceEnded => {
                            info!("source ended, finalizing session");
                            tracker.on_video_ended();
                            controller.stop_sampling();
                            sampling = None;
                        }
                        outcome => trace!(?outcome, "sampling tick"),
                    }
                }
            }
        }

        info!("client event loop stopped");
    }
}

/// Returns false when the loop should exit.
async fn handle_command(
    controller: &mut StreamingController,
    tracker: &mut SessionTracker,
    sampling: &mut Option<Interval>,
    command: ClientCommand,
) -> bool {
    match command {
        ClientCommand::StartVideo(clip) => {
            let source = VideoFileSource::new(clip);
            start_source(controller, tracker, sampling, Box::new(source), SourceKind::File).await;
        }
        ClientCommand::StartCamera(device) => {
            // Acquire the device before touching the running source, so a
            // failure leaves the current session untouched.
            match CameraSource::open(device) {
                Ok(source) => {
                    start_source(
                        controller,
                        tracker,
                        sampling,
                        Box::new(source),
                        SourceKind::Camera,
                    )
                    .await;
                }
                Err(e) => {
                    warn!(error = %e, "camera start aborted");
                }
            }
        }
        ClientCommand::StopSource => {
            tracker.on_source_stop();
            controller.stop_sampling();
            *sampling = None;
        }
        ClientCommand::SetMode(mode) => {
            controller.set_mode(mode).await;
            tracker.on_mode_changed(mode);
        }
        ClientCommand::Shutdown => {
            tracker.on_source_stop();
            controller.stop_sampling();
            return false;
        }
    }
    true
}

async fn start_source(
    controller: &mut StreamingController,
    tracker: &mut SessionTracker,
    sampling: &mut Option<Interval>,
    source: Box<dyn FrameSource>,
    kind: SourceKind,
) {
    tracker.on_source_start(kind);
    controller.start_sampling(source).await;

    *sampling = controller.active_period().map(|period| {
        debug!(period_ms = period.as_millis() as u64, "sampling clock armed");
        let mut interval = interval_at(TokioInstant::now() + period, period);
        // Drop ticks missed under load instead of bursting to catch up; the
        // send gate would discard them anyway.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });
}

fn dispatch_message(
    controller: &mut StreamingController,
    tracker: &mut SessionTracker,
    render: &Arc<dyn RenderSink>,
    chart: &Arc<dyn ChartSink>,
    raw: &str,
) {
    match controller.on_message(raw) {
        MessageOutcome::Frame {
            result,
            chart_sample,
        } => {
            tracker.on_result(&result);
            render.render(&result);
            if let Some(angle) = chart_sample {
                chart.push(angle);
            }
        }
        MessageOutcome::Ack { result } => {
            // No frame to render, but the count mirror still advances.
            tracker.on_result(&result);
        }
        MessageOutcome::Malformed => {}
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(TokioInstant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(sampling: &mut Option<Interval>) {
    match sampling {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

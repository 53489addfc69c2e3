#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use async_trait::async_trait;

    use crate::config::{ChartConfig, StreamingConfig};
    use crate::controller::{MessageOutcome, SkipReason, StreamingController, TickOutcome};
    use crate::encoder::DownscaleEncoder;
    use crate::errors::TransportError;
    use crate::protocol::ConfigMessage;
    use crate::source::{FramePoll, FrameSource};
    use crate::transport::ChannelSender;
    use crate::types::{ExerciseMode, FrameSurface, SourceKind};

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Config(ExerciseMode),
        Frame(Vec<u8>),
    }

    /// Channel double recording every send.
    struct FakeChannel {
        open: AtomicBool,
        fail_sends: AtomicBool,
        sent: Mutex<Vec<Sent>>,
    }

    impl FakeChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                open: AtomicBool::new(true),
                fail_sends: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn set_open(&self, open: bool) {
            self.open.store(open, Ordering::SeqCst);
        }

        fn set_fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::SeqCst);
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn frames_sent(&self) -> usize {
            self.sent()
                .iter()
                .filter(|sent| matches!(sent, Sent::Frame(_)))
                .count()
        }

        fn configs_sent(&self) -> usize {
            self.sent()
                .iter()
                .filter(|sent| matches!(sent, Sent::Config(_)))
                .count()
        }
    }

    #[async_trait]
    impl ChannelSender for FakeChannel {
        async fn send_config(&self, message: &ConfigMessage) -> Result<(), TransportError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::SendFailed {
                    message: "forced failure".to_string(),
                });
            }
            self.sent.lock().unwrap().push(Sent::Config(message.mode));
            Ok(())
        }

        async fn send_frame(&self, payload: &[u8]) -> Result<(), TransportError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::SendFailed {
                    message: "forced failure".to_string(),
                });
            }
            self.sent.lock().unwrap().push(Sent::Frame(payload.to_vec()));
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    /// Source double that replays a fixed poll script, then keeps repeating
    /// its last step.
    struct ScriptedSource {
        kind: SourceKind,
        script: Vec<ScriptStep>,
        position: usize,
        surface: FrameSurface,
        stopped: Arc<AtomicBool>,
    }

    #[derive(Debug, Clone, Copy)]
    enum ScriptStep {
        Ready,
        NotReady,
        Paused,
        Ended,
    }

    impl ScriptedSource {
        fn new(kind: SourceKind, script: Vec<ScriptStep>) -> Self {
            Self {
                kind,
                script,
                position: 0,
                surface: FrameSurface::new(4, 2, vec![9u8; 24]),
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }

        fn always_ready(kind: SourceKind) -> Self {
            Self::new(kind, vec![ScriptStep::Ready])
        }

        fn stopped_flag(&self) -> Arc<AtomicBool> {
            self.stopped.clone()
        }
    }

    impl FrameSource for ScriptedSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn poll_frame(&mut self, _now: Instant) -> FramePoll<'_> {
            let step = self.script[self.position.min(self.script.len() - 1)];
            self.position += 1;
            match step {
                ScriptStep::Ready => FramePoll::Ready(&self.surface),
                ScriptStep::NotReady => FramePoll::NotReady,
                ScriptStep::Paused => FramePoll::Paused,
                ScriptStep::Ended => FramePoll::Ended,
            }
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn controller(channel: Arc<FakeChannel>) -> StreamingController {
        StreamingController::new(
            channel,
            Box::new(DownscaleEncoder::new()),
            ExerciseMode::Squat,
            &StreamingConfig::default(),
            &ChartConfig::default(),
        )
    }

    fn frame_message(reps: u32, angle: f64) -> String {
        format!(
            r#"{{"processed_image": "aW1n", "reps": {}, "feedback": "ok", "color": "green", "angle": {}}}"#,
            reps, angle
        )
    }

    #[tokio::test]
    async fn test_at_most_one_frame_in_flight() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel.clone());
        controller
            .start_sampling(Box::new(ScriptedSource::always_ready(SourceKind::File)))
            .await;

        let now = Instant::now();
        assert_eq!(controller.on_tick(now).await, TickOutcome::Sent);
        assert!(controller.in_flight().sending);

        // The clock keeps firing; every further tick is dropped, not queued.
        for _ in 0..5 {
            assert_eq!(
                controller.on_tick(now).await,
                TickOutcome::Skipped(SkipReason::FrameInFlight)
            );
        }
        assert_eq!(channel.frames_sent(), 1);
    }

    #[tokio::test]
    async fn test_no_frame_sent_while_channel_closed() {
        let channel = FakeChannel::new();
        channel.set_open(false);
        let mut controller = controller(channel.clone());
        controller
            .start_sampling(Box::new(ScriptedSource::always_ready(SourceKind::File)))
            .await;

        for _ in 0..10 {
            assert_eq!(
                controller.on_tick(Instant::now()).await,
                TickOutcome::Skipped(SkipReason::ChannelClosed)
            );
        }
        assert_eq!(channel.frames_sent(), 0);
        // The config message is also suppressed while closed.
        assert_eq!(channel.configs_sent(), 0);
    }

    #[tokio::test]
    async fn test_watchdog_restores_liveness() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel.clone());
        controller
            .start_sampling(Box::new(ScriptedSource::always_ready(SourceKind::File)))
            .await;

        let t0 = Instant::now();
        assert_eq!(controller.on_tick(t0).await, TickOutcome::Sent);

        // Before the deadline the watchdog does nothing.
        assert!(!controller.on_watchdog_fire(t0 + Duration::from_millis(999)));
        assert!(controller.in_flight().sending);

        // At the deadline the stalled frame is force-released.
        assert!(controller.on_watchdog_fire(t0 + Duration::from_millis(1000)));
        assert!(controller.in_flight().is_idle());

        // The next tick is the implicit retry.
        assert_eq!(
            controller.on_tick(t0 + Duration::from_millis(1001)).await,
            TickOutcome::Sent
        );
        assert_eq!(channel.frames_sent(), 2);
    }

    #[tokio::test]
    async fn test_late_result_after_watchdog_release_is_harmless() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel.clone());
        controller
            .start_sampling(Box::new(ScriptedSource::always_ready(SourceKind::File)))
            .await;

        let t0 = Instant::now();
        assert_eq!(controller.on_tick(t0).await, TickOutcome::Sent);
        assert!(controller.on_watchdog_fire(t0 + Duration::from_secs(1)));

        // The reply still arrives, late. It must not wedge anything.
        let outcome = controller.on_message(&frame_message(1, 0.0));
        assert!(matches!(outcome, MessageOutcome::Frame { .. }));
        assert!(controller.in_flight().is_idle());
        assert_eq!(
            controller.on_tick(t0 + Duration::from_secs(2)).await,
            TickOutcome::Sent
        );
    }

    #[tokio::test]
    async fn test_result_releases_the_gate() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel.clone());
        controller
            .start_sampling(Box::new(ScriptedSource::always_ready(SourceKind::File)))
            .await;

        let now = Instant::now();
        assert_eq!(controller.on_tick(now).await, TickOutcome::Sent);
        controller.on_message(&frame_message(0, 0.0));
        assert_eq!(controller.on_tick(now).await, TickOutcome::Sent);
        assert_eq!(channel.frames_sent(), 2);
    }

    #[tokio::test]
    async fn test_malformed_message_releases_but_reports_nothing() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel.clone());
        controller
            .start_sampling(Box::new(ScriptedSource::always_ready(SourceKind::File)))
            .await;

        assert_eq!(controller.on_tick(Instant::now()).await, TickOutcome::Sent);
        assert_eq!(
            controller.on_message("this is not json"),
            MessageOutcome::Malformed
        );
        assert!(controller.in_flight().is_idle());
    }

    #[tokio::test]
    async fn test_imageless_message_is_an_ack_with_counts() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel);

        match controller.on_message(r#"{"reps": 4}"#) {
            MessageOutcome::Ack { result } => {
                assert_eq!(result.reps, 4);
                assert!(result.image.is_none());
            }
            other => panic!("expected ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chart_downsampling_three_to_one() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel);

        let mut samples = Vec::new();
        for angle in [100.0, 110.0, 120.0, 130.0, 140.0, 150.0] {
            match controller.on_message(&frame_message(0, angle)) {
                MessageOutcome::Frame { chart_sample, .. } => samples.push(chart_sample),
                other => panic!("expected frame, got {:?}", other),
            }
        }
        assert_eq!(
            samples,
            vec![None, None, Some(120.0), None, None, Some(150.0)]
        );
    }

    #[tokio::test]
    async fn test_zero_angle_does_not_advance_the_chart() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel);

        // Two real samples, then a no-reading frame, then the third sample.
        for angle in [100.0, 110.0] {
            controller.on_message(&frame_message(0, angle));
        }
        match controller.on_message(&frame_message(0, 0.0)) {
            MessageOutcome::Frame { chart_sample, .. } => assert_eq!(chart_sample, None),
            other => panic!("expected frame, got {:?}", other),
        }
        match controller.on_message(&frame_message(0, 120.0)) {
            MessageOutcome::Frame { chart_sample, .. } => assert_eq!(chart_sample, Some(120.0)),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_surface_guards_skip_the_cycle() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel.clone());
        controller
            .start_sampling(Box::new(ScriptedSource::new(
                SourceKind::File,
                vec![
                    ScriptStep::NotReady,
                    ScriptStep::Paused,
                    ScriptStep::Ready,
                    ScriptStep::Ended,
                ],
            )))
            .await;

        let now = Instant::now();
        assert_eq!(
            controller.on_tick(now).await,
            TickOutcome::Skipped(SkipReason::SurfaceNotReady)
        );
        assert_eq!(
            controller.on_tick(now).await,
            TickOutcome::Skipped(SkipReason::SourcePaused)
        );
        assert_eq!(controller.on_tick(now).await, TickOutcome::Sent);
        controller.on_message(&frame_message(0, 0.0));
        assert_eq!(controller.on_tick(now).await, TickOutcome::SourceEnded);
        assert_eq!(channel.frames_sent(), 1);
    }

    #[tokio::test]
    async fn test_stop_sampling_is_idempotent() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel);
        controller
            .start_sampling(Box::new(ScriptedSource::always_ready(SourceKind::Camera)))
            .await;
        assert_eq!(controller.on_tick(Instant::now()).await, TickOutcome::Sent);

        controller.stop_sampling();
        let after_first = (controller.active_source(), controller.in_flight().sending);
        controller.stop_sampling();
        let after_second = (controller.active_source(), controller.in_flight().sending);

        assert_eq!(after_first, after_second);
        assert_eq!(controller.active_source(), SourceKind::None);
        assert_eq!(
            controller.on_tick(Instant::now()).await,
            TickOutcome::Skipped(SkipReason::NoActiveSource)
        );
    }

    #[tokio::test]
    async fn test_starting_a_source_stops_the_previous_one() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel.clone());

        let file_source = ScriptedSource::always_ready(SourceKind::File);
        let file_stopped = file_source.stopped_flag();
        controller.start_sampling(Box::new(file_source)).await;
        assert_eq!(controller.on_tick(Instant::now()).await, TickOutcome::Sent);
        assert_eq!(controller.active_period(), Some(Duration::from_millis(40)));

        let camera_source = ScriptedSource::always_ready(SourceKind::Camera);
        controller.start_sampling(Box::new(camera_source)).await;

        assert!(file_stopped.load(Ordering::SeqCst));
        assert_eq!(controller.active_source(), SourceKind::Camera);
        assert_eq!(controller.active_period(), Some(Duration::from_millis(50)));
        // The switch reset the in-flight gate, so the new source streams
        // immediately.
        assert!(controller.in_flight().is_idle());
        assert_eq!(controller.on_tick(Instant::now()).await, TickOutcome::Sent);
        // One config message per source start.
        assert_eq!(channel.configs_sent(), 2);
    }

    #[tokio::test]
    async fn test_camera_frames_are_mirrored_and_file_frames_are_not() {
        use crate::encoder::{EncodeOptions, FrameEncoder};

        let channel = FakeChannel::new();
        let mut controller = controller(channel.clone());

        // Asymmetric surface so mirroring is visible in the payload.
        let surface = FrameSurface::new(
            4,
            1,
            vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4],
        );

        let mut file_source = ScriptedSource::always_ready(SourceKind::File);
        file_source.surface = surface.clone();
        controller.start_sampling(Box::new(file_source)).await;
        assert_eq!(controller.on_tick(Instant::now()).await, TickOutcome::Sent);
        controller.on_message(&frame_message(0, 0.0));

        let mut camera_source = ScriptedSource::always_ready(SourceKind::Camera);
        camera_source.surface = surface.clone();
        controller.start_sampling(Box::new(camera_source)).await;
        assert_eq!(controller.on_tick(Instant::now()).await, TickOutcome::Sent);

        let frames: Vec<Vec<u8>> = channel
            .sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Frame(payload) => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 2);

        let encoder = DownscaleEncoder::new();
        let plain = encoder
            .encode(
                &surface,
                &EncodeOptions {
                    max_dimension: 480,
                    mirror: false,
                },
            )
            .unwrap();
        let mirrored = encoder
            .encode(
                &surface,
                &EncodeOptions {
                    max_dimension: 480,
                    mirror: true,
                },
            )
            .unwrap();
        assert_eq!(frames[0], plain);
        assert_eq!(frames[1], mirrored);
        assert_ne!(plain, mirrored);
    }

    #[tokio::test]
    async fn test_failed_send_releases_the_gate() {
        let channel = FakeChannel::new();
        channel.set_fail_sends(true);
        let mut controller = controller(channel.clone());
        controller
            .start_sampling(Box::new(ScriptedSource::always_ready(SourceKind::File)))
            .await;

        assert_eq!(
            controller.on_tick(Instant::now()).await,
            TickOutcome::Skipped(SkipReason::SendFailed)
        );
        assert!(controller.in_flight().is_idle());

        // Once the channel recovers, the next tick goes through.
        channel.set_fail_sends(false);
        assert_eq!(controller.on_tick(Instant::now()).await, TickOutcome::Sent);
    }

    #[tokio::test]
    async fn test_mode_change_resends_config_only() {
        let channel = FakeChannel::new();
        let mut controller = controller(channel.clone());
        controller
            .start_sampling(Box::new(ScriptedSource::always_ready(SourceKind::File)))
            .await;

        controller.set_mode(ExerciseMode::Curl).await;
        assert_eq!(controller.mode(), ExerciseMode::Curl);

        let configs: Vec<ExerciseMode> = channel
            .sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Config(mode) => Some(mode),
                _ => None,
            })
            .collect();
        assert_eq!(configs, vec![ExerciseMode::Squat, ExerciseMode::Curl]);
    }

    mod invariants {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone, Copy)]
        enum Event {
            Tick,
            Result,
            ImagelessResult,
            Malformed,
            WatchdogEarly,
            WatchdogLate,
            Stop,
            Restart,
        }

        fn event_strategy() -> impl Strategy<Value = Event> {
            prop_oneof![
                4 => Just(Event::Tick),
                3 => Just(Event::Result),
                1 => Just(Event::ImagelessResult),
                1 => Just(Event::Malformed),
                1 => Just(Event::WatchdogEarly),
                1 => Just(Event::WatchdogLate),
                1 => Just(Event::Stop),
                1 => Just(Event::Restart),
            ]
        }

        proptest! {
            /// For any serialized event sequence: the send gate only closes
            /// from an open state, and whenever it is closed a watchdog
            /// deadline is armed.
            #[test]
            fn prop_single_outstanding_frame(events in proptest::collection::vec(event_strategy(), 1..80)) {
                tokio_test::block_on(async move {
                    let channel = FakeChannel::new();
                    let mut controller = controller(channel.clone());
                    controller
                        .start_sampling(Box::new(ScriptedSource::always_ready(SourceKind::File)))
                        .await;

                    let t0 = Instant::now();
                    let mut sent_frames = 0usize;

                    for event in events {
                        let was_sending = controller.in_flight().sending;
                        match event {
                            Event::Tick => {
                                let outcome = controller.on_tick(t0).await;
                                if outcome == TickOutcome::Sent {
                                    prop_assert!(!was_sending, "sent while a frame was in flight");
                                    sent_frames += 1;
                                }
                            }
                            Event::Result => {
                                controller.on_message(&frame_message(1, 100.0));
                            }
                            Event::ImagelessResult => {
                                controller.on_message(r#"{"reps": 2}"#);
                            }
                            Event::Malformed => {
                                controller.on_message("garbage");
                            }
                            Event::WatchdogEarly => {
                                controller.on_watchdog_fire(t0 + Duration::from_millis(10));
                            }
                            Event::WatchdogLate => {
                                controller.on_watchdog_fire(t0 + Duration::from_secs(10));
                            }
                            Event::Stop => {
                                controller.stop_sampling();
                            }
                            Event::Restart => {
                                controller
                                    .start_sampling(Box::new(ScriptedSource::always_ready(
                                        SourceKind::File,
                                    )))
                                    .await;
                            }
                        }

                        let state = controller.in_flight();
                        prop_assert_eq!(state.sending, state.watchdog_deadline.is_some());
                    }

                    prop_assert_eq!(channel.frames_sent(), sent_frames);
                    Ok(())
                })?;
            }
        }
    }
}

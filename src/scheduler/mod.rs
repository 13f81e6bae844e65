//! Per-frame effect loop with start / restart / stop.
//!
//! Each run gets a generation number. The loop task and every frame it
//! renders carry their generation, and nothing is presented once a newer
//! generation exists, so a restart never leaks a frame from the previous run.

mod pipeline;

pub use pipeline::Pipeline;

use crate::config::EffectKind;
use crate::error::CompositeError;
use anyhow::{Context, Result};
use image::RgbaImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Snapshot of the loop's state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub active: bool,
    pub generation: u64,
    pub effect: Option<EffectKind>,
    /// Frames shown by the current run
    pub frames_presented: u64,
    /// Why the current run stopped on its own, if it did
    pub last_error: Option<String>,
}

enum Presented {
    Shown,
    Superseded,
}

struct Shared {
    generation: AtomicU64,
    has_provider: bool,
    pipeline: Mutex<Pipeline>,
    state: std::sync::Mutex<RunState>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn run_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One iteration, run on the blocking pool.
    /// The generation is re-checked under the pipeline lock before presenting.
    fn render_and_present(&self, generation: u64, kind: EffectKind) -> Result<Presented> {
        let mut pipeline = self.pipeline.blocking_lock();
        if !self.is_current(generation) {
            return Ok(Presented::Superseded);
        }

        let frame = pipeline.render(kind)?;

        if !self.is_current(generation) {
            tracing::debug!(generation, "Dropping frame from superseded run");
            return Ok(Presented::Superseded);
        }
        pipeline.present(&frame)?;

        let mut state = self.run_state();
        if state.generation == generation {
            state.frames_presented += 1;
        }
        Ok(Presented::Shown)
    }

    fn record_failure(&self, generation: u64, message: String) {
        let mut state = self.run_state();
        if state.generation == generation {
            state.active = false;
            state.last_error = Some(message);
        }
    }
}

/// Drives capture -> segment -> composite -> present once per frame tick
pub struct EffectScheduler {
    shared: Arc<Shared>,
    pending: Option<JoinHandle<()>>,
    frame_interval: Duration,
}

impl EffectScheduler {
    /// Create an idle scheduler ticking at `fps`
    pub fn new(pipeline: Pipeline, fps: u32) -> Self {
        let frame_interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        Self {
            shared: Arc::new(Shared {
                generation: AtomicU64::new(0),
                has_provider: pipeline.has_provider(),
                pipeline: Mutex::new(pipeline),
                state: std::sync::Mutex::new(RunState::default()),
            }),
            pending: None,
            frame_interval,
        }
    }

    /// Start a new run of `kind`, superseding any run in progress.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, kind: EffectKind) -> Result<(), CompositeError> {
        if kind.needs_segmentation() && !self.shared.has_provider {
            return Err(CompositeError::MissingProvider(kind));
        }

        self.cancel_pending();
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.shared.run_state() = RunState {
            active: true,
            generation,
            effect: Some(kind),
            frames_presented: 0,
            last_error: None,
        };

        tracing::info!("Starting {} effect (run {})", kind, generation);
        let shared = Arc::clone(&self.shared);
        self.pending = Some(tokio::spawn(run_loop(
            shared,
            generation,
            kind,
            self.frame_interval,
        )));
        Ok(())
    }

    /// Stop the current run, blank the canvas and start `kind`
    pub async fn restart(&mut self, kind: EffectKind) -> Result<()> {
        tracing::info!("Restarting with {} effect", kind);
        self.halt();
        self.clear_output().await?;
        self.start(kind)?;
        Ok(())
    }

    /// Stop the current run and blank the canvas
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("Stopping effect loop");
        self.halt();
        self.clear_output().await
    }

    /// Replace the background image. The next image-replace frame uses it.
    pub async fn change_background(&self, image: RgbaImage) {
        let mut pipeline = self.shared.pipeline.lock().await;
        pipeline.compositor_mut().set_background(image);
    }

    pub fn state(&self) -> RunState {
        self.shared.run_state().clone()
    }

    /// Whether a loop task is scheduled and still running
    pub fn has_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Invalidate the current run and cancel its scheduled task.
    /// An iteration already on the blocking pool finishes but is not presented.
    fn halt(&mut self) {
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.cancel_pending();

        let mut state = self.shared.run_state();
        state.active = false;
        state.generation = generation;
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    async fn clear_output(&self) -> Result<()> {
        let mut pipeline = self.shared.pipeline.lock().await;
        pipeline.clear().context("Failed to clear output")
    }
}

impl Drop for EffectScheduler {
    fn drop(&mut self) {
        self.halt();
    }
}

async fn run_loop(shared: Arc<Shared>, generation: u64, kind: EffectKind, frame_interval: Duration) {
    {
        let mut pipeline = shared.pipeline.lock().await;
        if !shared.is_current(generation) {
            return;
        }
        pipeline.reset();
    }

    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !shared.is_current(generation) {
            break;
        }

        // The next tick is only awaited once this frame is done, so at most
        // one inference is in flight.
        let worker = Arc::clone(&shared);
        let step =
            tokio::task::spawn_blocking(move || worker.render_and_present(generation, kind)).await;

        match step {
            Ok(Ok(Presented::Shown)) => {}
            Ok(Ok(Presented::Superseded)) => break,
            Ok(Err(e)) => {
                tracing::error!("{} effect stopped: {:#}", kind, e);
                shared.record_failure(generation, format!("{e:#}"));
                break;
            }
            Err(e) => {
                tracing::error!("{} effect worker failed: {}", kind, e);
                shared.record_failure(generation, e.to_string());
                break;
            }
        }
    }

    tracing::debug!(generation, "Effect loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StillCapture;
    use crate::compositor::Compositor;
    use crate::config::{DrawOptions, FitMode, SegmentConfig};
    use crate::output::OutputSink;
    use crate::segmentation::{Mask, SegmentationProvider};
    use image::Rgba;
    use std::sync::atomic::AtomicUsize;

    const WIDTH: u32 = 8;
    const HEIGHT: u32 = 6;
    const CAMERA: Rgba<u8> = Rgba([200, 40, 40, 255]);

    #[derive(Debug, Clone, PartialEq)]
    enum SinkEvent {
        Frame(RgbaImage),
        Clear,
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<std::sync::Mutex<Vec<SinkEvent>>>);

    impl Recorder {
        fn events(&self) -> Vec<SinkEvent> {
            self.0.lock().unwrap().clone()
        }

        fn frames_since(&self, mark: usize) -> Vec<RgbaImage> {
            self.events()
                .into_iter()
                .skip(mark)
                .filter_map(|event| match event {
                    SinkEvent::Frame(frame) => Some(frame),
                    SinkEvent::Clear => None,
                })
                .collect()
        }
    }

    impl OutputSink for Recorder {
        fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
            self.0.lock().unwrap().push(SinkEvent::Frame(frame.clone()));
            Ok(())
        }

        fn clear(&mut self) -> Result<()> {
            self.0.lock().unwrap().push(SinkEvent::Clear);
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            (WIDTH, HEIGHT)
        }
    }

    /// Labels every pixel background after an optional delay, or fails
    struct StubProvider {
        delay: Duration,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl StubProvider {
        fn new(delay: Duration, fail: bool) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Self {
                delay,
                fail,
                calls: Arc::clone(&calls),
            };
            (provider, calls)
        }
    }

    impl SegmentationProvider for StubProvider {
        fn segment(&mut self, frame: &RgbaImage, _config: &SegmentConfig) -> Result<Mask> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                anyhow::bail!("model exploded");
            }
            Ok(Mask::from_fn(frame.width(), frame.height(), |_, _| 0.0))
        }
    }

    fn scheduler(provider: Option<Box<dyn SegmentationProvider>>) -> (EffectScheduler, Recorder) {
        let recorder = Recorder::default();
        let options = DrawOptions {
            mirror: false,
            edge_blur: 0,
            fit: FitMode::Stretch,
            ..DrawOptions::default()
        };
        let pipeline = Pipeline::new(
            Box::new(StillCapture::new(RgbaImage::from_pixel(WIDTH, HEIGHT, CAMERA))),
            provider,
            Compositor::new(options, WIDTH, HEIGHT),
            Box::new(recorder.clone()),
            SegmentConfig::default(),
        );
        (EffectScheduler::new(pipeline, 200), recorder)
    }

    fn is_camera_frame(frame: &RgbaImage) -> bool {
        frame.pixels().all(|p| *p == CAMERA)
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn off_effect_presents_camera_frames() {
        let (mut scheduler, recorder) = scheduler(None);
        scheduler.start(EffectKind::Off).unwrap();
        settle(100).await;

        let state = scheduler.state();
        assert!(state.active);
        assert_eq!(state.effect, Some(EffectKind::Off));
        assert!(state.frames_presented > 0);

        let frames = recorder.frames_since(0);
        assert!(!frames.is_empty());
        assert!(frames.iter().all(is_camera_frame));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn segmentation_effect_needs_a_provider() {
        let (mut scheduler, recorder) = scheduler(None);
        assert_eq!(
            scheduler.start(EffectKind::Blur),
            Err(CompositeError::MissingProvider(EffectKind::Blur))
        );
        assert!(!scheduler.state().active);
        assert!(!scheduler.has_pending());
        settle(30).await;
        assert!(recorder.events().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restart_drops_the_in_flight_frame() {
        let (provider, calls) = StubProvider::new(Duration::from_millis(80), false);
        let (mut scheduler, recorder) = scheduler(Some(Box::new(provider)));

        scheduler.start(EffectKind::Color).unwrap();
        settle(20).await;
        scheduler.restart(EffectKind::Off).await.unwrap();
        let mark = recorder.events().len();
        settle(100).await;
        scheduler.stop().await.unwrap();

        // The color frame being segmented at restart time is never shown
        let events = recorder.events();
        assert!(events.contains(&SinkEvent::Clear));
        let frames = recorder.frames_since(0);
        assert!(frames.iter().all(is_camera_frame));
        assert!(!recorder.frames_since(mark).is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restarting_twice_matches_restarting_once() {
        let (mut once, _) = scheduler(None);
        once.start(EffectKind::Off).unwrap();
        once.restart(EffectKind::Off).await.unwrap();

        let (mut twice, recorder) = scheduler(None);
        twice.start(EffectKind::Off).unwrap();
        twice.restart(EffectKind::Off).await.unwrap();
        twice.restart(EffectKind::Off).await.unwrap();

        let a = once.state();
        let b = twice.state();
        assert!(b.active);
        assert_eq!((a.active, a.effect, a.last_error), (b.active, b.effect, b.last_error));
        assert!(once.has_pending() && twice.has_pending());

        settle(60).await;
        assert!(twice.state().frames_presented > 0);
        assert!(recorder.frames_since(0).iter().all(is_camera_frame));
        once.stop().await.unwrap();
        twice.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn inference_failure_stops_the_run() {
        let (provider, calls) = StubProvider::new(Duration::ZERO, true);
        let (mut scheduler, recorder) = scheduler(Some(Box::new(provider)));

        scheduler.start(EffectKind::Blur).unwrap();
        settle(100).await;

        let state = scheduler.state();
        assert!(!state.active);
        assert!(state
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("model exploded")));
        assert_eq!(state.frames_presented, 0);
        assert!(!scheduler.has_pending());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(recorder.frames_since(0).is_empty());

        // A user restart starts over
        scheduler.restart(EffectKind::Off).await.unwrap();
        assert!(scheduler.state().active);
        assert_eq!(scheduler.state().last_error, None);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn image_effect_without_background_stops_the_run() {
        let (provider, _) = StubProvider::new(Duration::ZERO, false);
        let (mut scheduler, _) = scheduler(Some(Box::new(provider)));

        scheduler.start(EffectKind::Image).unwrap();
        settle(60).await;

        let state = scheduler.state();
        assert!(!state.active);
        assert!(state
            .last_error
            .is_some_and(|e| e.contains("no background image")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn changed_background_shows_on_the_next_frame() {
        let green = Rgba([0, 255, 0, 255]);
        let blue = Rgba([0, 0, 255, 255]);
        let (provider, _) = StubProvider::new(Duration::ZERO, false);
        let (mut scheduler, recorder) = scheduler(Some(Box::new(provider)));

        scheduler
            .change_background(RgbaImage::from_pixel(WIDTH, HEIGHT, green))
            .await;
        scheduler.start(EffectKind::Image).unwrap();
        settle(50).await;
        assert!(recorder
            .frames_since(0)
            .iter()
            .any(|f| f.pixels().all(|p| *p == green)));

        scheduler
            .change_background(RgbaImage::from_pixel(WIDTH, HEIGHT, blue))
            .await;
        let mark = recorder.events().len();
        settle(50).await;
        scheduler.stop().await.unwrap();

        let after = recorder.frames_since(mark);
        assert!(!after.is_empty());
        assert!(after.iter().all(|f| f.pixels().all(|p| *p == blue)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_ends_presentation() {
        let (mut scheduler, recorder) = scheduler(None);
        scheduler.start(EffectKind::Off).unwrap();
        settle(40).await;
        scheduler.stop().await.unwrap();
        let mark = recorder.events().len();
        assert_eq!(recorder.events().last(), Some(&SinkEvent::Clear));

        settle(50).await;
        assert_eq!(recorder.events().len(), mark);
        assert!(!scheduler.state().active);
    }
}

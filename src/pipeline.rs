use crate::capture::CaptureSource;
use crate::compositor::{Compositor, CycleOutcome};
use crate::config::ConfigStore;
use crate::error::{Error, Result};
use crate::output::OutputSink;
use crate::pacer::{FramePacer, PerformanceState};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stage timings are logged every this many cycles
const STATS_EVERY: u64 = 30;

/// Receives the pacer state once per cycle, for display only
pub trait TelemetrySink {
    fn publish(&mut self, perf: &PerformanceState);
}

/// Logs the measured rate whenever it changes
#[derive(Debug, Default)]
pub struct LogTelemetry {
    last_fps: Option<u32>,
}

impl TelemetrySink for LogTelemetry {
    fn publish(&mut self, perf: &PerformanceState) {
        if self.last_fps == Some(perf.measured_fps) {
            return;
        }
        self.last_fps = Some(perf.measured_fps);
        tracing::debug!(
            "Measured {} fps (target {}, scale {:.2}, {:?})",
            perf.measured_fps,
            perf.target_fps,
            perf.scale_factor,
            perf.state
        );
    }
}

/// Cloneable flag that stops the drive loop
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Rate the pacer aims for
    pub target_fps: u32,
    /// Rate of the drive loop's clock (display refresh)
    pub tick_rate: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            target_fps: 30,
            tick_rate: 60,
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The pacer declined the tick
    Skipped,
    Cycle(CycleOutcome),
    /// The pipeline has been stopped or torn down
    Stopped,
}

#[derive(Debug, Default)]
struct StageTimings {
    cycles: u64,
    capture: Duration,
    composite: Duration,
    output: Duration,
}

impl StageTimings {
    fn record(&mut self, capture: Duration, cycle: Duration, output: Duration) {
        self.cycles += 1;
        self.capture += capture;
        self.composite += cycle.saturating_sub(output);
        self.output += output;
    }

    fn log(&self, perf: &PerformanceState) {
        let n = self.cycles as f64;
        let avg_capture_ms = self.capture.as_secs_f64() * 1000.0 / n;
        let avg_composite_ms = self.composite.as_secs_f64() * 1000.0 / n;
        let avg_output_ms = self.output.as_secs_f64() * 1000.0 / n;

        tracing::info!(
            "Cycle {}: capture={:.1}ms, composite={:.1}ms, output={:.1}ms, fps={}, scale={:.2}, {:?}",
            self.cycles,
            avg_capture_ms,
            avg_composite_ms,
            avg_output_ms,
            perf.measured_fps,
            perf.scale_factor,
            perf.state
        );
    }
}

/// Times the sink's writes so presenting can be told apart from compositing
struct TimedSink<'a, O> {
    inner: &'a mut O,
    elapsed: Duration,
}

impl<O: OutputSink> OutputSink for TimedSink<'_, O> {
    fn write_frame(&mut self, frame: &RgbaImage) -> anyhow::Result<()> {
        let start = Instant::now();
        let result = self.inner.write_frame(frame);
        self.elapsed += start.elapsed();
        result
    }

    fn resolution(&self) -> (u32, u32) {
        self.inner.resolution()
    }
}

/// The drive loop: ticks the pacer and runs one compositor cycle per admitted tick
pub struct Pipeline<C, O> {
    source: Option<C>,
    sink: O,
    compositor: Compositor,
    pacer: FramePacer,
    config: ConfigStore,
    telemetry: Box<dyn TelemetrySink>,
    stop: StopHandle,
    tick_interval: Duration,
    timings: StageTimings,
    output_failing: bool,
}

impl<C, O> Pipeline<C, O>
where
    C: CaptureSource,
    O: OutputSink,
{
    pub fn new(
        source: C,
        sink: O,
        compositor: Compositor,
        config: ConfigStore,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source: Some(source),
            sink,
            compositor,
            pacer: FramePacer::new(options.target_fps),
            config,
            telemetry: Box::new(LogTelemetry::default()),
            stop: StopHandle::new(),
            tick_interval: Duration::from_secs(1) / options.tick_rate.max(1),
            timings: StageTimings::default(),
            output_failing: false,
        }
    }

    pub fn with_telemetry(mut self, telemetry: impl TelemetrySink + 'static) -> Self {
        self.telemetry = Box::new(telemetry);
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn sink(&self) -> &O {
        &self.sink
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn pacer(&self) -> &FramePacer {
        &self.pacer
    }

    pub fn is_running(&self) -> bool {
        self.source.is_some() && !self.stop.is_stopped()
    }

    /// Start model loading in the background
    pub fn start(&self) -> Result<()> {
        self.compositor.start()
    }

    /// One tick of the drive loop at `now`
    ///
    /// Only a lost video source is returned as an error; every other failure
    /// degrades the output and the loop carries on.
    pub fn tick(&mut self, now: Instant) -> Result<TickOutcome> {
        if self.stop.is_stopped() {
            return Ok(TickOutcome::Stopped);
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(TickOutcome::Stopped);
        };

        self.pacer.report(now);
        if !self.pacer.should_admit(now) {
            return Ok(TickOutcome::Skipped);
        }

        let capture_start = Instant::now();
        let frame = source
            .capture_frame()
            .map_err(|err| Error::SourceUnavailable(format!("{:#}", err)))?;
        let capture_time = capture_start.elapsed();

        let config = self.config.snapshot();

        let cycle_start = Instant::now();
        let mut sink = TimedSink {
            inner: &mut self.sink,
            elapsed: Duration::ZERO,
        };
        let result = self.compositor.run_cycle(frame, &config, &self.pacer, &mut sink);
        let output_time = sink.elapsed;
        let cycle_time = cycle_start.elapsed();

        let outcome = match result {
            Ok(outcome) => {
                if self.output_failing {
                    tracing::info!("Display sink recovered");
                    self.output_failing = false;
                }
                outcome
            }
            Err(Error::Output(msg)) => {
                if !self.output_failing {
                    tracing::warn!("Failed to present frame: {}", msg);
                    self.output_failing = true;
                } else {
                    tracing::debug!("Failed to present frame: {}", msg);
                }
                CycleOutcome::Idle
            }
            Err(err) => return Err(err),
        };

        let perf = self.pacer.state();
        self.telemetry.publish(&perf);

        self.timings.record(capture_time, cycle_time, output_time);
        if self.timings.cycles % STATS_EVERY == 0 {
            self.timings.log(&perf);
        }

        Ok(TickOutcome::Cycle(outcome))
    }

    /// Tick on the display clock until stopped or the source is lost
    pub fn run(&mut self) -> Result<()> {
        tracing::info!(
            "Starting drive loop (target {} fps, tick every {:.1}ms)",
            self.pacer.state().target_fps,
            self.tick_interval.as_secs_f64() * 1000.0
        );

        let mut next_tick = Instant::now();
        let result = loop {
            match self.tick(Instant::now()) {
                Ok(TickOutcome::Stopped) => break Ok(()),
                Ok(_) => {}
                Err(err) => {
                    tracing::error!("{}", err);
                    break Err(err);
                }
            }

            next_tick += self.tick_interval;
            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
            } else {
                // Fell behind; don't try to catch up with a burst of ticks
                next_tick = now;
            }
        };

        self.teardown();
        result
    }

    /// Stop the loop, release the video source and the segmentation worker
    ///
    /// A mask request still in flight resolves into a dropped channel.
    pub fn teardown(&mut self) {
        self.stop.stop();
        if self.source.take().is_some() {
            tracing::info!("Video source released");
        }
        self.compositor.shutdown();
    }
}

impl<C, O> Drop for Pipeline<C, O> {
    fn drop(&mut self) {
        self.stop.stop();
        self.source = None;
        self.compositor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameCounter};
    use image::Rgba;

    struct StillSource(FrameCounter);

    impl CaptureSource for StillSource {
        fn capture_frame(&mut self) -> anyhow::Result<Frame> {
            Ok(self.0.stamp(RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255]))))
        }

        fn resolution(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    struct BrokenSource;

    impl CaptureSource for BrokenSource {
        fn capture_frame(&mut self) -> anyhow::Result<Frame> {
            anyhow::bail!("unplugged")
        }

        fn resolution(&self) -> (u32, u32) {
            (0, 0)
        }
    }

    #[derive(Default)]
    struct CountingSink(usize);

    impl OutputSink for CountingSink {
        fn write_frame(&mut self, _frame: &RgbaImage) -> anyhow::Result<()> {
            self.0 += 1;
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    struct FailingSink;

    impl OutputSink for FailingSink {
        fn write_frame(&mut self, _frame: &RgbaImage) -> anyhow::Result<()> {
            anyhow::bail!("device busy")
        }

        fn resolution(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    fn pipeline<C: CaptureSource, O: OutputSink>(source: C, sink: O) -> Pipeline<C, O> {
        Pipeline::new(
            source,
            sink,
            Compositor::passthrough(),
            ConfigStore::default(),
            PipelineOptions {
                target_fps: 10,
                tick_rate: 20,
            },
        )
    }

    #[test]
    fn pacer_skips_ticks_faster_than_target() {
        let mut pipeline = pipeline(StillSource(FrameCounter::new()), CountingSink::default());
        let start = Instant::now();
        let step = Duration::from_millis(50);

        let outcomes: Vec<_> = (0..4)
            .map(|i| pipeline.tick(start + step * i).unwrap())
            .collect();

        assert!(matches!(outcomes[0], TickOutcome::Cycle(_)));
        assert_eq!(outcomes[1], TickOutcome::Skipped);
        assert!(matches!(outcomes[2], TickOutcome::Cycle(_)));
        assert_eq!(outcomes[3], TickOutcome::Skipped);
        assert_eq!(pipeline.sink().0, 2);
    }

    #[test]
    fn lost_source_is_a_hard_failure() {
        let mut pipeline = pipeline(BrokenSource, CountingSink::default());
        let err = pipeline.tick(Instant::now()).unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[test]
    fn sink_errors_do_not_stop_the_loop() {
        let mut pipeline = pipeline(StillSource(FrameCounter::new()), FailingSink);
        let start = Instant::now();
        for i in 0..3 {
            let outcome = pipeline.tick(start + Duration::from_millis(100) * i).unwrap();
            assert_eq!(outcome, TickOutcome::Cycle(CycleOutcome::Idle));
        }
        assert!(pipeline.is_running());
    }

    #[test]
    fn stop_handle_ends_the_loop() {
        let mut pipeline = pipeline(StillSource(FrameCounter::new()), CountingSink::default());
        let stop = pipeline.stop_handle();
        stop.stop();
        pipeline.run().unwrap();
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.tick(Instant::now()).unwrap(), TickOutcome::Stopped);
        assert_eq!(pipeline.sink().0, 0);
    }
}

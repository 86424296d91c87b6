use crate::background::BackgroundRenderer;
use crate::config::{ActiveMode, CompositingConfig, ModeKind, PreviewView};
use crate::error::{Error, Result};
use crate::filters::{self, FilterScratch, Morph};
use crate::frame::{Frame, FrameId, Mask};
use crate::output::OutputSink;
use crate::pacer::FramePacer;
use crate::segmentation::{MaskPoll, ModelStatus, PendingMask, SegmentationAdapter};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};

/// Mask values below this are background in blur mode
pub const BLUR_THRESHOLD: u8 = 128;

/// Masks are resampled nearest-neighbour to the working resolution
pub const MASK_FILTER: FilterType = FilterType::Nearest;

/// Working frames are downscaled bilinearly under throttling
pub const FRAME_FILTER: FilterType = FilterType::Triangle;

/// What a cycle put on the display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The raw frame was presented
    Passthrough(FrameId),
    /// A frame was composited with its own mask and presented
    Composited(FrameId),
    /// The last composited buffer was presented again while the next mask is computed
    Repeated(FrameId),
    /// The current frame was already on screen; nothing was presented
    Idle,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompositorStats {
    pub composited: u64,
    pub passthrough: u64,
    pub repeated: u64,
    pub stale_masks: u64,
}

/// Buffers reused from cycle to cycle
#[derive(Debug)]
struct Scratch {
    working: RgbaImage,
    mask: GrayImage,
    refined: GrayImage,
    smoothed: GrayImage,
    blurred: RgbaImage,
    output: RgbaImage,
    filter: FilterScratch,
}

impl Default for Scratch {
    fn default() -> Self {
        Self {
            working: RgbaImage::new(0, 0),
            mask: GrayImage::new(0, 0),
            refined: GrayImage::new(0, 0),
            smoothed: GrayImage::new(0, 0),
            blurred: RgbaImage::new(0, 0),
            output: RgbaImage::new(0, 0),
            filter: FilterScratch::new(),
        }
    }
}

/// Runs one processing cycle per admitted tick
///
/// A mask request carries its frame. When the mask comes back the compositor
/// presents that frame composited, unless a newer frame has been presented in
/// the meantime, in which case the mask is stale and dropped. While a request
/// is in flight the last composited buffer is shown again, so the display
/// follows the model's rate instead of alternating with raw frames. Without a
/// model the current frame is presented raw and unmirrored; the compositor
/// never waits.
pub struct Compositor {
    adapter: Option<SegmentationAdapter>,
    pending: Option<PendingMask>,
    last_requested: Option<FrameId>,
    last_presented: Option<FrameId>,
    /// Frame held in `scratch.output`, cleared once a raw frame is shown
    last_composited: Option<FrameId>,
    last_status: ModelStatus,
    renderer: BackgroundRenderer,
    scratch: Scratch,
    stats: CompositorStats,
}

impl Compositor {
    pub fn new(adapter: Option<SegmentationAdapter>) -> Self {
        Self {
            adapter,
            pending: None,
            last_requested: None,
            last_presented: None,
            last_composited: None,
            last_status: ModelStatus::Uninitialized,
            renderer: BackgroundRenderer::new(),
            scratch: Scratch::default(),
            stats: CompositorStats::default(),
        }
    }

    /// Compositor without a model: every cycle is passthrough
    pub fn passthrough() -> Self {
        Self::new(None)
    }

    /// Kick off model loading; returns immediately
    pub fn start(&self) -> Result<()> {
        match &self.adapter {
            Some(adapter) => adapter.initialize(),
            None => {
                tracing::info!("Running in passthrough mode (no segmentation)");
                Ok(())
            }
        }
    }

    /// Stop the segmentation worker and forget the in-flight request
    pub fn shutdown(&mut self) {
        self.pending = None;
        if let Some(adapter) = &self.adapter {
            adapter.shutdown();
        }
    }

    pub fn model_status(&self) -> ModelStatus {
        self.adapter
            .as_ref()
            .map_or(ModelStatus::Uninitialized, SegmentationAdapter::status)
    }

    /// Whether the in-flight mask request has a result waiting
    ///
    /// Diagnostic only; cycles never depend on it.
    pub fn mask_ready(&self) -> bool {
        self.pending.as_ref().is_some_and(PendingMask::is_resolved)
    }

    pub fn stats(&self) -> CompositorStats {
        self.stats
    }

    /// One cycle for the source's current `frame`
    pub fn run_cycle(
        &mut self,
        frame: Frame,
        config: &CompositingConfig,
        pacer: &FramePacer,
        sink: &mut dyn OutputSink,
    ) -> Result<CycleOutcome> {
        let _span = tracing::debug_span!("cycle", frame = frame.id().0).entered();

        let status = self.model_status();
        self.note_status(status);

        let ready = self.collect_mask();

        let needs_mask = config.view == PreviewView::Matte || config.mode != ModeKind::Original;
        let compositing =
            needs_mask && status == ModelStatus::Ready && config.view != PreviewView::Original;
        if needs_mask && status == ModelStatus::Ready {
            self.request_for(&frame);
        }
        let waiting = compositing && self.pending.is_some();

        match ready {
            Some((held, mask)) if config.view != PreviewView::Original => {
                let (width, height) = held.dimensions();
                let working = pacer.optimized_dimensions(width, height);
                let output = self.composite(held.pixels(), &mask, config, working);
                present(sink, output)?;

                tracing::trace!(
                    "Frame {} presented {:?} after capture",
                    held.id(),
                    held.captured_at().elapsed()
                );
                self.last_presented = Some(held.id());
                self.last_composited = Some(held.id());
                self.stats.composited += 1;
                Ok(CycleOutcome::Composited(held.id()))
            }
            _ if waiting => match self.last_composited {
                Some(shown) => {
                    present(sink, &self.scratch.output)?;
                    self.stats.repeated += 1;
                    Ok(CycleOutcome::Repeated(shown))
                }
                // First mask still on its way; keep whatever is on screen
                None if self.last_presented.is_some() => Ok(CycleOutcome::Idle),
                None => self.present_raw(&frame, sink),
            },
            _ if self.last_presented == Some(frame.id()) => Ok(CycleOutcome::Idle),
            _ => self.present_raw(&frame, sink),
        }
    }

    /// Passthrough: the frame exactly as captured
    fn present_raw(&mut self, frame: &Frame, sink: &mut dyn OutputSink) -> Result<CycleOutcome> {
        present(sink, frame.pixels())?;

        self.last_presented = Some(frame.id());
        self.last_composited = None;
        self.stats.passthrough += 1;
        Ok(CycleOutcome::Passthrough(frame.id()))
    }

    fn note_status(&mut self, status: ModelStatus) {
        if status == self.last_status {
            return;
        }
        match status {
            ModelStatus::Ready => tracing::info!("Segmentation ready, compositing enabled"),
            ModelStatus::Failed => {
                let reason = self
                    .adapter
                    .as_ref()
                    .and_then(SegmentationAdapter::failure)
                    .map_or_else(|| "unknown error".to_string(), |err| err.to_string());
                tracing::warn!("Segmentation unavailable ({}), falling back to passthrough", reason)
            }
            ModelStatus::Loading | ModelStatus::Uninitialized => {
                tracing::debug!("Segmentation status {:?}", status)
            }
        }
        self.last_status = status;
    }

    /// Take the in-flight result if it has arrived and is still presentable
    fn collect_mask(&mut self) -> Option<(Frame, Mask)> {
        let pending = self.pending.take()?;

        match pending.poll() {
            MaskPoll::Pending => {
                self.pending = Some(pending);
                None
            }
            MaskPoll::Failed(err) => {
                tracing::warn!("Mask request for frame {} failed: {}", pending.frame_id(), err);
                None
            }
            MaskPoll::Ready(mask) => {
                let frame = pending.frame().clone();
                if self.last_presented.is_some_and(|shown| shown > frame.id()) {
                    tracing::debug!("Dropping stale mask for frame {}", frame.id());
                    self.stats.stale_masks += 1;
                    return None;
                }
                Some((frame, mask))
            }
        }
    }

    fn request_for(&mut self, frame: &Frame) {
        if self.pending.is_some() || self.last_requested.is_some_and(|id| id >= frame.id()) {
            return;
        }
        let Some(adapter) = &self.adapter else {
            return;
        };

        match adapter.request_mask(frame) {
            Ok(pending) => {
                self.last_requested = Some(frame.id());
                self.pending = Some(pending);
            }
            Err(err) if err.is_rejection() => {
                tracing::trace!("Mask request skipped: {}", err);
            }
            Err(err) => tracing::warn!("Mask request failed: {}", err),
        }
    }

    /// Composite `frame` with its `mask` at the `working` resolution
    ///
    /// The returned buffer is owned by the compositor and overwritten by the
    /// next call.
    pub fn composite(
        &mut self,
        frame: &RgbaImage,
        mask: &Mask,
        config: &CompositingConfig,
        working: (u32, u32),
    ) -> &RgbaImage {
        let _span = tracing::debug_span!("composite", mode = ?config.mode).entered();

        let Scratch {
            working: working_buf,
            mask: mask_buf,
            refined,
            smoothed,
            blurred,
            output,
            filter,
        } = &mut self.scratch;

        let (width, height) = working;
        let src: &RgbaImage = if frame.dimensions() == working {
            frame
        } else {
            *working_buf = imageops::resize(frame, width, height, FRAME_FILTER);
            working_buf
        };

        let mask: &GrayImage = if mask.dimensions() == working {
            mask
        } else {
            *mask_buf = imageops::resize(mask, width, height, MASK_FILTER);
            mask_buf
        };

        if config.view == PreviewView::Matte {
            *output = filters::mask_to_rgba(mask);
        } else {
            match config.active_mode() {
                ActiveMode::Original => copy_into(src, output),
                ActiveMode::Blur { radius } => {
                    let sigma = filters::default_sigma(radius);
                    filters::gaussian_blur_into(src, blurred, radius, sigma, filter);
                    copy_into(src, output);

                    // Hard cut at the threshold; the seam is intentionally not blended
                    for ((out, blur), m) in output.pixels_mut().zip(blurred.pixels()).zip(mask.pixels()) {
                        if m[0] < BLUR_THRESHOLD {
                            *out = *blur;
                        }
                    }
                }
                mode @ (ActiveMode::Gradient(_) | ActiveMode::Solid(_) | ActiveMode::Image(_)) => {
                    let refined: &GrayImage = match config.edge_adjust {
                        0 => mask,
                        n => {
                            let op = if n > 0 { Morph::Dilate } else { Morph::Erode };
                            filters::morph_into(mask, refined, 1, n.unsigned_abs(), op, filter);
                            refined
                        }
                    };

                    let alpha: &GrayImage = if config.smooth_edges {
                        let (radius, sigma) = config.edge_quality.smoothing();
                        filters::gaussian_blur_into(refined, smoothed, radius, sigma, filter);
                        smoothed
                    } else {
                        refined
                    };

                    match self.renderer.render(&mode, width, height) {
                        Some(background) => filters::blend_alpha_into(src, background, alpha, output),
                        None => copy_into(src, output),
                    }
                }
            }
        }

        if config.mirror {
            imageops::flip_horizontal_in_place(output);
        }

        output
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn present(sink: &mut dyn OutputSink, buffer: &RgbaImage) -> Result<()> {
    sink.write_frame(buffer)
        .map_err(|err| Error::Output(format!("{:#}", err)))
}

fn copy_into(src: &RgbaImage, dst: &mut RgbaImage) {
    if dst.dimensions() == src.dimensions() {
        dst.copy_from_slice(src.as_raw());
    } else {
        *dst = src.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GradientPreset;
    use image::{Luma, Rgb, Rgba};
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder(Vec<RgbaImage>);

    impl OutputSink for Recorder {
        fn write_frame(&mut self, frame: &RgbaImage) -> anyhow::Result<()> {
            self.0.push(frame.clone());
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            (0, 0)
        }
    }

    fn stripes(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| {
            if x % 2 == 0 {
                Rgba([250, 10, 10, 255])
            } else {
                Rgba([10, 10, 250, 255])
            }
        })
    }

    fn config(mode: ModeKind) -> CompositingConfig {
        CompositingConfig {
            mode,
            mirror: false,
            ..Default::default()
        }
    }

    #[test]
    fn original_mode_returns_frame() {
        let frame = stripes(6, 4);
        let mask = GrayImage::from_pixel(6, 4, Luma([0]));
        let mut compositor = Compositor::passthrough();
        let out = compositor.composite(&frame, &mask, &config(ModeKind::Original), (6, 4));
        assert_eq!(out, &frame);
    }

    #[test]
    fn blur_replaces_only_background_pixels() {
        let frame = stripes(8, 4);
        let mut mask = GrayImage::from_pixel(8, 4, Luma([200]));
        mask.put_pixel(3, 2, Luma([100]));

        let cfg = CompositingConfig {
            blur_strength: 50,
            ..config(ModeKind::Blur)
        };
        let blurred = filters::gaussian_blur(&frame, 10, filters::default_sigma(10));

        let mut compositor = Compositor::passthrough();
        let out = compositor.composite(&frame, &mask, &cfg, (8, 4));

        assert_eq!(out.get_pixel(3, 2), blurred.get_pixel(3, 2));
        assert_ne!(out.get_pixel(3, 2), frame.get_pixel(3, 2));
        assert_eq!(out.get_pixel(4, 2), frame.get_pixel(4, 2));
    }

    #[test]
    fn blur_threshold_is_hard() {
        let frame = stripes(4, 1);
        let mask = GrayImage::from_fn(4, 1, |x, _| Luma([[127, 128, 0, 255][x as usize]]));
        let cfg = CompositingConfig {
            blur_strength: 100,
            ..config(ModeKind::Blur)
        };
        let blurred = filters::gaussian_blur(&frame, 20, filters::default_sigma(20));

        let mut compositor = Compositor::passthrough();
        let out = compositor.composite(&frame, &mask, &cfg, (4, 1));
        assert_eq!(out.get_pixel(0, 0), blurred.get_pixel(0, 0));
        assert_eq!(out.get_pixel(1, 0), frame.get_pixel(1, 0));
        assert_eq!(out.get_pixel(2, 0), blurred.get_pixel(2, 0));
        assert_eq!(out.get_pixel(3, 0), frame.get_pixel(3, 0));
    }

    #[test]
    fn solid_mode_keeps_foreground_and_replaces_background() {
        let frame = RgbaImage::from_pixel(12, 12, Rgba([40, 50, 60, 255]));
        let mask = GrayImage::from_fn(12, 12, |x, _| if x < 6 { Luma([255]) } else { Luma([0]) });
        let cfg = CompositingConfig {
            solid_color: Rgb([200, 100, 0]),
            ..config(ModeKind::Solid)
        };

        let mut compositor = Compositor::passthrough();
        let out = compositor.composite(&frame, &mask, &cfg, (12, 12));

        assert_eq!(out.get_pixel(0, 5).0, [40, 50, 60, 255]);
        assert_eq!(out.get_pixel(11, 5).0, [200, 100, 0, 255]);
        // Smoothed seam lands between the two
        let seam = out.get_pixel(6, 5);
        assert!(seam[0] > 40 && seam[0] < 200);
    }

    #[test]
    fn smoothing_can_be_disabled() {
        let frame = RgbaImage::from_pixel(8, 2, Rgba([0, 0, 0, 255]));
        let mask = GrayImage::from_fn(8, 2, |x, _| if x < 4 { Luma([255]) } else { Luma([0]) });
        let cfg = CompositingConfig {
            solid_color: Rgb([255, 255, 255]),
            smooth_edges: false,
            ..config(ModeKind::Solid)
        };

        let mut compositor = Compositor::passthrough();
        let out = compositor.composite(&frame, &mask, &cfg, (8, 2));
        assert_eq!(out.get_pixel(3, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(4, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn edge_adjust_grows_the_foreground() {
        let frame = RgbaImage::from_pixel(9, 1, Rgba([0, 0, 0, 255]));
        let mask = GrayImage::from_fn(9, 1, |x, _| if x == 4 { Luma([255]) } else { Luma([0]) });
        let cfg = CompositingConfig {
            solid_color: Rgb([255, 255, 255]),
            smooth_edges: false,
            edge_adjust: 2,
            ..config(ModeKind::Solid)
        };

        let mut compositor = Compositor::passthrough();
        let out = compositor.composite(&frame, &mask, &cfg, (9, 1));
        let foreground = out.pixels().filter(|p| p[0] == 0).count();
        assert_eq!(foreground, 5);
    }

    #[test]
    fn gradient_background_at_corners() {
        let frame = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 255]));
        let mask = GrayImage::new(2, 1);
        let cfg = CompositingConfig {
            gradient: GradientPreset::Sunset,
            smooth_edges: false,
            ..config(ModeKind::Gradient)
        };

        let mut compositor = Compositor::passthrough();
        let out = compositor.composite(&frame, &mask, &cfg, (2, 1));
        assert_eq!(out.get_pixel(0, 0).0, [0xf9, 0x73, 0x16, 255]);
        assert_eq!(out.get_pixel(1, 0).0, [0xec, 0x48, 0x99, 255]);
    }

    #[test]
    fn mask_is_resampled_to_frame() {
        let frame = RgbaImage::from_pixel(8, 8, Rgba([10, 10, 10, 255]));
        // Left half foreground at quarter resolution
        let mask = GrayImage::from_fn(2, 2, |x, _| if x == 0 { Luma([255]) } else { Luma([0]) });
        let cfg = CompositingConfig {
            smooth_edges: false,
            solid_color: Rgb([90, 90, 90]),
            ..config(ModeKind::Solid)
        };

        let mut compositor = Compositor::passthrough();
        let out = compositor.composite(&frame, &mask, &cfg, (8, 8));
        assert_eq!(out.dimensions(), (8, 8));
        assert_eq!(out.get_pixel(1, 6).0, [10, 10, 10, 255]);
        assert_eq!(out.get_pixel(6, 1).0, [90, 90, 90, 255]);
    }

    #[test]
    fn working_resolution_downscales_output() {
        let frame = RgbaImage::from_pixel(20, 10, Rgba([1, 2, 3, 255]));
        let mask = GrayImage::from_pixel(20, 10, Luma([255]));
        let mut compositor = Compositor::passthrough();
        let out = compositor.composite(&frame, &mask, &config(ModeKind::Solid), (10, 5));
        assert_eq!(out.dimensions(), (10, 5));
        assert!(out.pixels().all(|p| p.0 == [1, 2, 3, 255]));
    }

    #[test]
    fn matte_view_shows_the_mask() {
        let frame = stripes(4, 4);
        let mask = GrayImage::from_pixel(4, 4, Luma([66]));
        let cfg = CompositingConfig {
            view: PreviewView::Matte,
            ..config(ModeKind::Gradient)
        };
        let mut compositor = Compositor::passthrough();
        let out = compositor.composite(&frame, &mask, &cfg, (4, 4));
        assert!(out.pixels().all(|p| p.0 == [66, 66, 66, 255]));
    }

    #[test]
    fn passthrough_ignores_mirror_under_default_settings() {
        let source = RgbaImage::from_fn(4, 1, |x, _| Rgba([x as u8 * 60, 0, 0, 255]));
        let config = CompositingConfig::default();
        assert!(config.mirror);

        let mut compositor = Compositor::passthrough();
        let mut sink = Recorder::default();
        let pacer = FramePacer::new(30);
        let frame = Frame::new(FrameId(0), Instant::now(), source.clone());

        let outcome = compositor.run_cycle(frame, &config, &pacer, &mut sink).unwrap();
        assert_eq!(outcome, CycleOutcome::Passthrough(FrameId(0)));
        assert_eq!(sink.0, vec![source]);
    }

    #[test]
    fn mirror_flips_output() {
        let frame = stripes(2, 1);
        let mask = GrayImage::from_pixel(2, 1, Luma([255]));
        let cfg = CompositingConfig {
            mirror: true,
            ..config(ModeKind::Original)
        };
        let mut compositor = Compositor::passthrough();
        let out = compositor.composite(&frame, &mask, &cfg, (2, 1));
        assert_eq!(out.get_pixel(0, 0), frame.get_pixel(1, 0));
        assert_eq!(out.get_pixel(1, 0), frame.get_pixel(0, 0));
    }
}

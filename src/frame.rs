use image::{GrayImage, RgbaImage};
use std::sync::Arc;
use std::time::Instant;

/// Foreground confidence: 0 = background, 255 = foreground, one byte per pixel
///
/// May be at the model's native resolution; resample before compositing.
pub type Mask = GrayImage;

/// Identity of a captured frame, monotonically increasing per source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One captured RGBA video image
///
/// Pixel data is shared so a frame can travel with a mask request without a
/// copy. It is never mutated after capture.
#[derive(Debug, Clone)]
pub struct Frame {
    id: FrameId,
    captured_at: Instant,
    pixels: Arc<RgbaImage>,
}

impl Frame {
    pub fn new(id: FrameId, captured_at: Instant, pixels: RgbaImage) -> Self {
        Self {
            id,
            captured_at,
            pixels: Arc::new(pixels),
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

/// Hands out increasing frame ids for a capture source
#[derive(Debug, Default)]
pub struct FrameCounter {
    next: u64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&mut self, pixels: RgbaImage) -> Frame {
        let frame = Frame::new(FrameId(self.next), Instant::now(), pixels);
        self.next += 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_ids_increase() {
        let mut counter = FrameCounter::new();
        let a = counter.stamp(RgbaImage::new(2, 2));
        let b = counter.stamp(RgbaImage::new(2, 2));
        assert!(a.id() < b.id());
        assert_eq!(b.id(), FrameId(1));
    }

    #[test]
    fn clones_share_pixels() {
        let frame = Frame::new(FrameId(3), Instant::now(), RgbaImage::new(4, 3));
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.pixels(), copy.pixels()));
        assert_eq!(copy.dimensions(), (4, 3));
    }
}

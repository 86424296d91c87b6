use crate::background::BackgroundImage;
use crate::error::{Error, Result};
use clap::ValueEnum;
use image::Rgb;
use parking_lot::RwLock;
use std::str::FromStr;
use std::sync::Arc;

/// Largest blur radius, reached at blur strength 100
pub const MAX_BLUR_RADIUS: u32 = 20;

/// Bound on edge adjustment iterations in either direction
pub const MAX_EDGE_ADJUST: i32 = 10;

/// Background mode selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeKind {
    Original,
    Blur,
    Gradient,
    Solid,
    Image,
}

impl FromStr for ModeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ModeKind::from_str_value(s)
            .ok_or_else(|| Error::InvalidCommand(format!("unknown mode '{}'", s)))
    }
}

/// Two-stop gradient presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GradientPreset {
    PurpleBlue,
    Sunset,
    Forest,
}

impl GradientPreset {
    /// Start and end colors, from the top-left to the bottom-right corner
    pub fn stops(self) -> (Rgb<u8>, Rgb<u8>) {
        match self {
            GradientPreset::PurpleBlue => (Rgb([0x63, 0x66, 0xf1]), Rgb([0x3b, 0x82, 0xf6])),
            GradientPreset::Sunset => (Rgb([0xf9, 0x73, 0x16]), Rgb([0xec, 0x48, 0x99])),
            GradientPreset::Forest => (Rgb([0x05, 0x96, 0x69]), Rgb([0x1e, 0x40, 0xaf])),
        }
    }
}

impl FromStr for GradientPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        GradientPreset::from_str_value(s).ok_or_else(|| Error::UnknownGradient(s.to_string()))
    }
}

/// Edge smoothing kernel used by the blend modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EdgeQuality {
    Low,
    Medium,
    High,
}

impl EdgeQuality {
    /// Returns (radius, sigma)
    pub fn smoothing(self) -> (u32, f32) {
        match self {
            EdgeQuality::Low => (1, 0.75),
            EdgeQuality::Medium => (2, 1.5),
            EdgeQuality::High => (3, 2.25),
        }
    }
}

impl FromStr for EdgeQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EdgeQuality::from_str_value(s)
            .ok_or_else(|| Error::InvalidCommand(format!("unknown edge quality '{}'", s)))
    }
}

/// What the display sink is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PreviewView {
    /// Composited output
    Processed,
    /// Unmodified camera frames (comparison view)
    Original,
    /// The foreground mask as a greyscale image
    Matte,
}

impl FromStr for PreviewView {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PreviewView::from_str_value(s)
            .ok_or_else(|| Error::InvalidCommand(format!("unknown view '{}'", s)))
    }
}

/// Hardware class; picks the target rate and caps the capture size
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceProfile {
    Standard,
    LowEnd,
}

impl DeviceProfile {
    pub fn target_fps(self) -> u32 {
        match self {
            DeviceProfile::Standard => 30,
            DeviceProfile::LowEnd => 24,
        }
    }

    pub fn max_capture(self) -> (u32, u32) {
        match self {
            DeviceProfile::Standard => (1280, 720),
            DeviceProfile::LowEnd => (640, 480),
        }
    }

    /// `width`x`height` limited to this profile's capture cap
    pub fn capture_size(self, width: u32, height: u32) -> (u32, u32) {
        let (max_width, max_height) = self.max_capture();
        (width.min(max_width), height.min(max_height))
    }
}

/// Case-insensitive lookup through the clap value names
trait ValueName: ValueEnum {
    fn from_str_value(s: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(s, true).ok()
    }
}

impl<T: ValueEnum> ValueName for T {}

/// Parse a `#rrggbb` color
pub fn parse_hex_color(s: &str) -> Result<Rgb<u8>> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidColor(s.to_string()));
    }

    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| Error::InvalidColor(s.to_string()))
    };

    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

/// Blur radius for a blur strength in 0-100
pub fn blur_radius(strength: u8) -> u32 {
    let strength = strength.min(100) as f32;
    (strength / 100.0 * MAX_BLUR_RADIUS as f32).round() as u32
}

/// Settings read by the compositor at the start of each cycle
///
/// Parameters of inactive modes are kept, not cleared, so switching back to a
/// mode restores its last settings.
#[derive(Debug, Clone)]
pub struct CompositingConfig {
    pub mode: ModeKind,
    /// 0-100, only used in blur mode
    pub blur_strength: u8,
    pub solid_color: Rgb<u8>,
    pub gradient: GradientPreset,
    pub image: Option<Arc<BackgroundImage>>,
    pub mirror: bool,
    pub smooth_edges: bool,
    pub edge_quality: EdgeQuality,
    /// Positive values dilate the mask, negative values erode it
    pub edge_adjust: i32,
    pub view: PreviewView,
}

impl Default for CompositingConfig {
    fn default() -> Self {
        Self {
            mode: ModeKind::Gradient,
            blur_strength: 25,
            solid_color: Rgb([0x1f, 0x29, 0x37]),
            gradient: GradientPreset::PurpleBlue,
            image: None,
            mirror: true,
            smooth_edges: true,
            edge_quality: EdgeQuality::Medium,
            edge_adjust: 0,
            view: PreviewView::Processed,
        }
    }
}

/// The selected mode with only the parameters it uses
#[derive(Debug, Clone, Copy)]
pub enum ActiveMode<'a> {
    Original,
    Blur { radius: u32 },
    Gradient(GradientPreset),
    Solid(Rgb<u8>),
    /// `None` when no image has been uploaded
    Image(Option<&'a BackgroundImage>),
}

impl CompositingConfig {
    pub fn active_mode(&self) -> ActiveMode<'_> {
        match self.mode {
            ModeKind::Original => ActiveMode::Original,
            ModeKind::Blur => ActiveMode::Blur {
                radius: blur_radius(self.blur_strength),
            },
            ModeKind::Gradient => ActiveMode::Gradient(self.gradient),
            ModeKind::Solid => ActiveMode::Solid(self.solid_color),
            ModeKind::Image => ActiveMode::Image(self.image.as_deref()),
        }
    }

    pub fn set_blur_strength(&mut self, strength: u32) {
        self.blur_strength = strength.min(100) as u8;
    }

    pub fn set_edge_adjust(&mut self, adjust: i32) {
        self.edge_adjust = adjust.clamp(-MAX_EDGE_ADJUST, MAX_EDGE_ADJUST);
    }
}

/// Shared compositing settings with last-write-wins snapshot reads
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<Arc<CompositingConfig>>>,
}

impl ConfigStore {
    pub fn new(config: CompositingConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Consistent copy of the current settings
    pub fn snapshot(&self) -> Arc<CompositingConfig> {
        self.inner.read().clone()
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut CompositingConfig),
    {
        let mut guard = self.inner.write();
        let mut next = CompositingConfig::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }
}

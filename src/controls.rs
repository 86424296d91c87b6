//! Line-based control interface standing in for the settings UI
//!
//! Each line is one command, e.g. `mode blur`, `blur 40`, `color #1f2937`.
//! Bad commands are reported and ignored.

use crate::background::BackgroundImage;
use crate::config::{
    parse_hex_color, CompositingConfig, ConfigStore, EdgeQuality, GradientPreset, ModeKind,
    PreviewView,
};
use crate::error::{Error, Result};
use crate::pipeline::StopHandle;
use image::Rgb;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

pub const HELP: &str = "commands: mode <original|blur|gradient|solid|image>, blur <0-100>, \
color <#rrggbb>, gradient <purple-blue|sunset|forest>, image <path|none>, mirror <on|off>, \
smooth <on|off>, quality <low|medium|high>, edges <n>, view <processed|original|matte>, \
status, quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Mode(ModeKind),
    Blur(u32),
    Color(Rgb<u8>),
    Gradient(GradientPreset),
    /// `None` clears the uploaded image
    Image(Option<PathBuf>),
    Mirror(bool),
    Smooth(bool),
    Quality(EdgeQuality),
    Edges(i32),
    View(PreviewView),
    Status,
    Quit,
}

/// What the control loop should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (keyword, arg) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, Some(rest.trim())),
            None => (line, None),
        };
        let keyword = keyword.to_ascii_lowercase();

        let arg = || {
            arg.filter(|a| !a.is_empty())
                .ok_or_else(|| Error::InvalidCommand(format!("'{}' needs an argument", keyword)))
        };

        let command = match keyword.as_str() {
            "mode" => ControlCommand::Mode(arg()?.parse()?),
            "blur" => ControlCommand::Blur(parse_number(arg()?)?),
            "color" | "colour" => ControlCommand::Color(parse_hex_color(arg()?)?),
            "gradient" => ControlCommand::Gradient(arg()?.parse()?),
            "image" => match arg()? {
                none if none.eq_ignore_ascii_case("none") => ControlCommand::Image(None),
                path => ControlCommand::Image(Some(PathBuf::from(path))),
            },
            "mirror" => ControlCommand::Mirror(parse_switch(arg()?)?),
            "smooth" => ControlCommand::Smooth(parse_switch(arg()?)?),
            "quality" => ControlCommand::Quality(arg()?.parse()?),
            "edges" => ControlCommand::Edges(parse_number(arg()?)?),
            "view" => ControlCommand::View(arg()?.parse()?),
            "status" => ControlCommand::Status,
            "quit" | "exit" => ControlCommand::Quit,
            "" => return Err(Error::InvalidCommand("empty command".into())),
            other => return Err(Error::InvalidCommand(format!("unknown command '{}'", other))),
        };

        Ok(command)
    }

    /// Apply to the shared settings
    ///
    /// Background images are decoded here, before the store is touched, so a
    /// bad file leaves the current settings alone.
    pub fn apply(self, store: &ConfigStore) -> Result<Flow> {
        match self {
            ControlCommand::Mode(mode) => store.update(|c| c.mode = mode),
            ControlCommand::Blur(strength) => store.update(|c| c.set_blur_strength(strength)),
            ControlCommand::Color(color) => store.update(|c| c.solid_color = color),
            ControlCommand::Gradient(preset) => store.update(|c| c.gradient = preset),
            ControlCommand::Image(Some(path)) => {
                let image = Arc::new(BackgroundImage::load(&path)?);
                store.update(|c| c.image = Some(image));
            }
            ControlCommand::Image(None) => store.update(|c| c.image = None),
            ControlCommand::Mirror(on) => store.update(|c| c.mirror = on),
            ControlCommand::Smooth(on) => store.update(|c| c.smooth_edges = on),
            ControlCommand::Quality(quality) => store.update(|c| c.edge_quality = quality),
            ControlCommand::Edges(adjust) => store.update(|c| c.set_edge_adjust(adjust)),
            ControlCommand::View(view) => store.update(|c| c.view = view),
            ControlCommand::Status => tracing::info!("{}", describe(&store.snapshot())),
            ControlCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }
}

fn parse_number<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| Error::InvalidCommand(format!("'{}' is not a valid number", s)))
}

fn parse_switch(s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(Error::InvalidCommand(format!("expected on or off, got '{}'", s))),
    }
}

/// One-line summary of the settings
pub fn describe(config: &CompositingConfig) -> String {
    let Rgb([r, g, b]) = config.solid_color;
    format!(
        "mode={:?} blur={} color=#{:02x}{:02x}{:02x} gradient={:?} image={} mirror={} smooth={} quality={:?} edges={} view={:?}",
        config.mode,
        config.blur_strength,
        r,
        g,
        b,
        config.gradient,
        if config.image.is_some() { "loaded" } else { "none" },
        config.mirror,
        config.smooth_edges,
        config.edge_quality,
        config.edge_adjust,
        config.view
    )
}

/// Apply commands from `input` until it ends or a `quit` arrives
///
/// `quit` stops the pipeline; end of input only ends the control loop.
pub fn run_controls<R: BufRead>(input: R, store: &ConfigStore, stop: &StopHandle) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!("Control input closed: {}", err);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match ControlCommand::parse(&line).and_then(|command| command.apply(store)) {
            Ok(Flow::Continue) => tracing::debug!("Applied '{}'", line.trim()),
            Ok(Flow::Quit) => {
                tracing::info!("Quit requested");
                stop.stop();
                return;
            }
            Err(err) => tracing::warn!("{} ({})", err, HELP),
        }

        if stop.is_stopped() {
            return;
        }
    }
    tracing::debug!("Control input ended");
}

/// Read commands from stdin on a background thread
pub fn spawn_stdin_controls(store: ConfigStore, stop: StopHandle) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("controls".into())
        .spawn(move || run_controls(std::io::stdin().lock(), &store, &stop))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    #[test]
    fn parses_commands() {
        assert_eq!(ControlCommand::parse("mode blur").unwrap(), ControlCommand::Mode(ModeKind::Blur));
        assert_eq!(ControlCommand::parse("  BLUR 40 ").unwrap(), ControlCommand::Blur(40));
        assert_eq!(
            ControlCommand::parse("color #f97316").unwrap(),
            ControlCommand::Color(Rgb([0xf9, 0x73, 0x16]))
        );
        assert_eq!(
            ControlCommand::parse("gradient forest").unwrap(),
            ControlCommand::Gradient(GradientPreset::Forest)
        );
        assert_eq!(ControlCommand::parse("image None").unwrap(), ControlCommand::Image(None));
        assert_eq!(
            ControlCommand::parse("image /tmp/my beach.png").unwrap(),
            ControlCommand::Image(Some(PathBuf::from("/tmp/my beach.png")))
        );
        assert_eq!(ControlCommand::parse("mirror off").unwrap(), ControlCommand::Mirror(false));
        assert_eq!(ControlCommand::parse("edges -2").unwrap(), ControlCommand::Edges(-2));
        assert_eq!(ControlCommand::parse("view matte").unwrap(), ControlCommand::View(PreviewView::Matte));
        assert_eq!(ControlCommand::parse("quit").unwrap(), ControlCommand::Quit);
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(matches!(ControlCommand::parse("warp 9"), Err(Error::InvalidCommand(_))));
        assert!(matches!(ControlCommand::parse("blur"), Err(Error::InvalidCommand(_))));
        assert!(matches!(ControlCommand::parse("blur -3"), Err(Error::InvalidCommand(_))));
        assert!(matches!(ControlCommand::parse("color teal"), Err(Error::InvalidColor(_))));
        assert!(matches!(ControlCommand::parse("gradient ocean"), Err(Error::UnknownGradient(_))));
        assert!(matches!(ControlCommand::parse("smooth maybe"), Err(Error::InvalidCommand(_))));
    }

    #[test]
    fn apply_updates_store() {
        let store = ConfigStore::default();
        ControlCommand::Blur(400).apply(&store).unwrap();
        ControlCommand::Mode(ModeKind::Solid).apply(&store).unwrap();
        ControlCommand::Edges(3).apply(&store).unwrap();

        let config = store.snapshot();
        assert_eq!(config.blur_strength, 100);
        assert_eq!(config.mode, ModeKind::Solid);
        assert_eq!(config.edge_adjust, 3);
        assert_eq!(ControlCommand::Quit.apply(&store).unwrap(), Flow::Quit);
    }

    #[test]
    fn image_upload_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backdrop.png");
        RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255])).save(&path).unwrap();

        let store = ConfigStore::default();
        ControlCommand::Image(Some(path)).apply(&store).unwrap();
        let loaded = store.snapshot();
        let image = loaded.image.as_ref().unwrap();
        assert_eq!(image.pixels().dimensions(), (3, 2));

        ControlCommand::Image(None).apply(&store).unwrap();
        assert!(store.snapshot().image.is_none());
    }

    #[test]
    fn bad_image_keeps_current_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-an-image.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let store = ConfigStore::default();
        let before = store.snapshot();
        let err = ControlCommand::Image(Some(path)).apply(&store).unwrap_err();
        assert!(matches!(err, Error::BackgroundImage { .. }));
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn control_loop_skips_errors_and_stops_on_quit() {
        let store = ConfigStore::default();
        let stop = StopHandle::new();
        let input = Cursor::new("mode solid\nbogus\n\ncolor #000000\nquit\nmode blur\n");

        run_controls(input, &store, &stop);

        let config = store.snapshot();
        assert!(stop.is_stopped());
        assert_eq!(config.mode, ModeKind::Solid);
        assert_eq!(config.solid_color, Rgb([0, 0, 0]));
    }

    #[test]
    fn end_of_input_leaves_pipeline_running() {
        let store = ConfigStore::default();
        let stop = StopHandle::new();
        run_controls(Cursor::new("smooth off\n"), &store, &stop);
        assert!(!stop.is_stopped());
        assert!(!store.snapshot().smooth_edges);
    }
}

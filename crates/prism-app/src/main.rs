// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::Parser;
use prism_core::init_tracing;
use prism_platform::DesktopWindow;
use prism_render::{
    wait_until_drawable, FrameOutcome, RenderSettings, RenderSize, Renderer, DEFAULT_EXTENT,
    WINDOW_TITLE,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn};

#[cfg(feature = "vulkan")]
type ActiveRenderer = prism_render_vk::VkRenderer;

#[cfg(not(feature = "vulkan"))]
compile_error!("prism-app needs a backend: build with `--features vulkan`");

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config; a missing file means defaults
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,

    /// Stop after this many frames (0 = until the window closes)
    #[arg(long, default_value_t = 0)]
    frames: u64,

    /// Disable validation layers even in debug builds
    #[arg(long)]
    no_validation: bool,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
struct WindowCfg {
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            width: DEFAULT_EXTENT.width,
            height: DEFAULT_EXTENT.height,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    window: WindowCfg,
    #[serde(default)]
    render: RenderSettings,
}

fn load_cfg(path: &Path) -> AppCfg {
    match std::fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(_) => AppCfg::default(),
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = load_cfg(&args.config);
    let mut settings = cfg.render;
    if args.no_validation {
        settings.validation = false;
    }

    let mut window = DesktopWindow::open(
        WINDOW_TITLE,
        RenderSize::new(cfg.window.width, cfg.window.height),
    )?;
    let size = wait_until_drawable(&mut window);
    let mut renderer = ActiveRenderer::init(window.window(), window.window(), size, &settings)
        .context("renderer init")?;

    let mut frames: u64 = 0;
    let mut presented: u32 = 0;
    let mut last_fps = Instant::now();

    // poll -> draw, one frame per tick
    let result = loop {
        window.poll_events();
        if window.should_close() {
            break Ok(());
        }
        if window.take_resized() {
            renderer.signal_resize();
        }

        match renderer.draw(&mut window) {
            Ok(FrameOutcome::Presented { .. }) => presented += 1,
            Ok(FrameOutcome::Skipped) => {}
            Err(e) => break Err(e),
        }
        frames += 1;
        if args.frames > 0 && frames >= args.frames {
            info!(frames, "frame limit reached");
            break Ok(());
        }

        let now = Instant::now();
        if now.duration_since(last_fps).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", presented);
            presented = 0;
            last_fps = now;
        }
    };

    renderer.cleanup();
    result
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let args = Args::try_parse_from(["prism"]).unwrap();
        assert_eq!(args.config, PathBuf::from("prism.toml"));
        assert_eq!(args.frames, 0);
        assert!(!args.no_validation);
    }

    #[test]
    fn cli_flags() {
        let args = Args::try_parse_from([
            "prism",
            "--config",
            "alt.toml",
            "--frames",
            "10",
            "--no-validation",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("alt.toml"));
        assert_eq!(args.frames, 10);
        assert!(args.no_validation);
    }

    #[test]
    fn missing_config_is_defaults() {
        let cfg = load_cfg(Path::new("/no/such/prism.toml"));
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.render.clear_color, [129, 186, 219]);
    }

    #[test]
    fn config_sections_parse() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [window]
            width = 640

            [render]
            mesh = "triangle"
            present_mode = "fifo"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.render.mesh, prism_render::geometry::MeshKind::Triangle);
        assert_eq!(
            cfg.render.present_mode,
            prism_render::settings::PresentPreference::Fifo
        );
    }

    #[test]
    fn malformed_config_falls_back() {
        let dir = std::env::temp_dir().join(format!("prism-app-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.toml");
        std::fs::write(&path, "[render\nmesh = ").unwrap();
        let cfg = load_cfg(&path);
        assert_eq!(cfg.render.mesh, prism_render::geometry::MeshKind::Cube);
    }
}

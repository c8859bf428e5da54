use std::path::PathBuf;

use clap::{Parser, Subcommand};
use simconfig::parse_override;

#[derive(Parser, Debug)]
#[command(
    name = "blackhole",
    author,
    version,
    about = "Real-time black hole visualization",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Configuration file; defaults to `<config dir>/blackhole/blackhole.toml`.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Asset root holding `shader/` and `assets/` (HTTP(S) URL or directory).
    #[arg(long, value_name = "URL|DIR", global = true)]
    pub assets: Option<String>,

    /// Override the render resolution (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<SurfaceSize>,

    /// Frame cap (0=uncapped).
    #[arg(long, value_name = "FPS", value_parser = parse_fps)]
    pub fps: Option<f32>,

    /// Override a simulation parameter by uniform name (repeatable).
    #[arg(
        long = "set",
        value_name = "NAME=VALUE",
        value_parser = parse_override,
        global = true
    )]
    pub overrides: Vec<(String, f32)>,

    /// Run against a recording GL backend instead of opening a window.
    #[arg(long)]
    pub headless: bool,

    /// Number of frames to drive in headless mode.
    #[arg(long, value_name = "N", default_value_t = 120, requires = "headless")]
    pub frames: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective simulation parameters and exit.
    Params(ParamsArgs),
}

#[derive(Parser, Debug, Default)]
pub struct ParamsArgs {
    /// Emit JSON instead of TOML.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<SurfaceSize, String> {
    let trimmed = value.trim();
    let (w, h) = trimmed
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{trimmed}'"))?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("surface dimensions must be greater than zero".into());
    }
    Ok(SurfaceSize { width, height })
}

pub fn parse_fps(value: &str) -> Result<f32, String> {
    let fps: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid frame rate '{}'", value.trim()))?;
    if !fps.is_finite() || fps < 0.0 {
        return Err("frame rate must be a non-negative number".into());
    }
    Ok(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_surface_sizes() {
        assert_eq!(
            parse_size("1280x720").unwrap(),
            SurfaceSize {
                width: 1280,
                height: 720,
            }
        );
        assert_eq!(parse_size(" 64 X 32 ").unwrap().height, 32);
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x720").is_err());
        assert!(parse_size("wide x tall").is_err());
    }

    #[test]
    fn rejects_negative_frame_rates() {
        assert_eq!(parse_fps("0").unwrap(), 0.0);
        assert_eq!(parse_fps("30").unwrap(), 30.0);
        assert!(parse_fps("-1").is_err());
        assert!(parse_fps("inf").is_err());
    }

    #[test]
    fn collects_repeated_overrides() {
        let cli = Cli::try_parse_from([
            "blackhole",
            "--headless",
            "--frames",
            "3",
            "--set",
            "gamma=2.2",
            "--set",
            "bloomStrength=0.5",
        ])
        .unwrap();
        assert!(cli.run.headless);
        assert_eq!(cli.run.frames, 3);
        assert_eq!(
            cli.run.overrides,
            vec![
                ("gamma".to_string(), 2.2),
                ("bloomStrength".to_string(), 0.5)
            ]
        );
    }

    #[test]
    fn frames_require_headless() {
        assert!(Cli::try_parse_from(["blackhole", "--frames", "3"]).is_err());
    }

    #[test]
    fn params_subcommand_accepts_global_flags() {
        let cli = Cli::try_parse_from(["blackhole", "params", "--json", "--set", "gamma=1.5"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Params(ParamsArgs { json: true }))
        ));
        assert_eq!(cli.run.overrides.len(), 1);
    }
}

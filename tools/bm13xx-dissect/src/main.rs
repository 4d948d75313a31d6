//! BM13xx frame dissector.
//!
//! Decodes hex dumps of host frames (`55 aa ...`) and chip responses
//! (`aa 55 ...`), one frame per argument or per stdin line.

mod dissect;
mod output;

use std::io::{self, BufRead, IsTerminal};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use dissect::{dissect, has_preamble, parse_hex, Direction};
use output::{format_frame, OutputConfig};

/// Decode BM13xx serial frames given as hex
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Frames as hex, e.g. "55 aa 53 05 00 00 03"; read from stdin if absent
    frames: Vec<String>,

    /// Treat every frame as a chip response regardless of its preamble
    #[arg(short = 'r', long)]
    responses: bool,

    /// Show raw hex data for each frame
    #[arg(short = 'x', long)]
    hex: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("bm13xx_dissect=debug".parse()?),
            )
            .init();
    }

    let use_color = !args.no_color && io::stdout().is_terminal();
    colored::control::set_override(use_color);
    let config = OutputConfig {
        show_raw_hex: args.hex,
        use_color,
    };

    let lines: Vec<String> = if args.frames.is_empty() {
        io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<_>>()
            .context("Failed to read frames from stdin")?
    } else {
        args.frames.clone()
    };

    let mut invalid = 0usize;
    for (number, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let bytes = parse_hex(line)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("frame {}", number + 1))?;
        if !has_preamble(&bytes) {
            debug!(line = number + 1, "No preamble, decoding as host frame");
        }

        let direction = if args.responses {
            Direction::ChipToHost
        } else {
            Direction::detect(&bytes)
        };

        let frame = dissect(&bytes, direction);
        if matches!(frame.content, dissect::FrameContent::Invalid(_)) {
            invalid += 1;
        }
        println!("{}", format_frame(&frame, &config));
    }

    if invalid > 0 {
        anyhow::bail!("{} frame(s) failed to decode", invalid);
    }
    Ok(())
}

//! Output formatting for dissected frames.

use colored::Colorize;

use crate::dissect::{CrcStatus, DissectedFrame, Direction, FrameContent};

/// Gray color for hex data output
const HEX_DATA_GRAY_R: u8 = 128;
const HEX_DATA_GRAY_G: u8 = 128;
const HEX_DATA_GRAY_B: u8 = 128;

fn gray_hex(text: &str) -> colored::ColoredString {
    text.truecolor(HEX_DATA_GRAY_R, HEX_DATA_GRAY_G, HEX_DATA_GRAY_B)
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub show_raw_hex: bool,
    pub use_color: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            show_raw_hex: false,
            use_color: true,
        }
    }
}

/// One line per frame, plus the raw bytes below it when asked for.
pub fn format_frame(frame: &DissectedFrame, config: &OutputConfig) -> String {
    let direction = match (frame.direction, config.use_color) {
        (Direction::HostToChip, true) => format!("{}", "TX host → chip".bright_cyan()),
        (Direction::ChipToHost, true) => format!("{}", "RX chip → host".bright_yellow()),
        (Direction::HostToChip, false) => "TX host → chip".to_string(),
        (Direction::ChipToHost, false) => "RX chip → host".to_string(),
    };

    let content = match &frame.content {
        FrameContent::Host {
            header,
            kind,
            length_field,
            summary,
        } => format!(
            "{:?} hdr={:#04x} len={} {}",
            kind, header, length_field, summary
        ),
        FrameContent::Response(response) => format!("{:?}", response),
        FrameContent::Invalid(reason) if config.use_color => {
            format!("{}", format!("INVALID: {}", reason).red())
        }
        FrameContent::Invalid(reason) => format!("INVALID: {}", reason),
    };

    let mut result = format!("{} {}", direction, content);

    let crc = format_crc(&frame.crc_status, config);
    if !crc.is_empty() {
        result.push_str(&format!(" [{}]", crc));
    }

    if config.show_raw_hex && !frame.raw.is_empty() {
        for line in format_hex_multiline(&frame.raw).lines() {
            if config.use_color {
                result.push_str(&format!("\n        {}", gray_hex(line)));
            } else {
                result.push_str(&format!("\n        {}", line));
            }
        }
    }

    result
}

fn format_crc(status: &CrcStatus, config: &OutputConfig) -> String {
    if config.use_color {
        return status.to_string();
    }
    match status {
        CrcStatus::Valid => "CRC OK".to_string(),
        CrcStatus::Invalid { computed, received } => {
            format!("CRC FAIL (expected {:#x}, got {:#x})", computed, received)
        }
        CrcStatus::NotChecked => String::new(),
    }
}

/// Format hex data with line wrapping at 16 bytes per line
fn format_hex_multiline(data: &[u8]) -> String {
    data.chunks(16)
        .map(|chunk| {
            chunk
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

//! Text overlays burned into concat inputs with FFmpeg `drawtext`.

use std::path::Path;

use reclip_models::{EncodingConfig, OverlayAlign, OverlayConfig};

use crate::command::FfmpegCommand;

/// Escape a value for use inside a quoted `drawtext` option.
pub fn escape_drawtext(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Accept named colors as-is and turn `#rrggbb[aa]` into FFmpeg's `0x` form.
/// Anything unparseable falls back to white.
pub fn normalize_color(value: &str) -> String {
    let color = value.trim();
    if color.is_empty() {
        return "white".to_string();
    }
    match color.strip_prefix('#') {
        Some(hex) if matches!(hex.len(), 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit()) => {
            format!("0x{}", hex)
        }
        Some(_) => "white".to_string(),
        None => color.to_string(),
    }
}

/// Build the `drawtext=...` filter for `overlay`.
pub fn drawtext_filter(overlay: &OverlayConfig) -> String {
    let x = match overlay.align {
        OverlayAlign::TopCenter => "(w-text_w)/2".to_string(),
        OverlayAlign::Manual => overlay.x.to_string(),
    };

    let mut parts = vec![
        format!("text='{}'", escape_drawtext(overlay.text.trim())),
        format!("x={}", x),
        format!("y={}", overlay.y),
        format!("fontsize={}", overlay.font_size),
        format!("fontcolor={}", normalize_color(&overlay.font_color)),
    ];

    let family = overlay.font_family.trim();
    if !family.is_empty() {
        let style = overlay.font_style.trim();
        let name = if style.is_empty() || style.eq_ignore_ascii_case("normal") {
            family.to_string()
        } else {
            format!("{} {}", family, style)
        };
        parts.push(format!("font='{}'", escape_drawtext(&name)));
    }

    if overlay.stroke_width > 0 {
        parts.push(format!("borderw={}", overlay.stroke_width));
        parts.push(format!("bordercolor={}", normalize_color(&overlay.stroke_color)));
    }
    if overlay.line_spacing > 0 {
        parts.push(format!("line_spacing={}", overlay.line_spacing));
    }
    if overlay.duration > 0.0 {
        parts.push(format!("enable='between(t,0,{})'", overlay.duration));
    }

    format!("drawtext={}", parts.join(":"))
}

/// Command that re-encodes `input` with `overlay` burned in, copying audio.
pub fn overlay_command(
    input: &Path,
    output: &Path,
    overlay: &OverlayConfig,
    encoding: &EncodingConfig,
) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input(input)
        .video_filter(drawtext_filter(overlay))
        .map("0:v:0")
        .map("0:a?")
        .output_args(encoding.video_args())
        .output_args(["-c:a", "copy"])
}

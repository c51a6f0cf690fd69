//! ASS subtitle generation for word-by-word captions.

use std::fmt::Write;

use crate::captions::TranscriptWord;

pub const CAPTION_FONT: &str = "Futura";

/// Caption font size as a fraction of the frame height.
const FONT_SIZE_RATIO: f64 = 0.06;

/// `H:MM:SS.cc`
pub fn ms_to_ass_time(ms: u64) -> String {
    let centis = (ms % 1000) / 10;
    let total_secs = ms / 1000;
    format!(
        "{}:{:02}:{:02}.{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        centis
    )
}

fn escape_ass_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('{', "\\{")
        .replace('}', "\\}")
}

pub fn caption_font_size(height: u32) -> u32 {
    (height as f64 * FONT_SIZE_RATIO) as u32
}

/// One dialogue event per word: white bold text, no outline or shadow,
/// centered at the bottom of a `width`x`height` frame.
pub fn build_ass(words: &[TranscriptWord], width: u32, height: u32) -> String {
    let mut out = format!(
        "[Script Info]\n\
         Title: UGC Captions\n\
         ScriptType: v4.00+\n\
         PlayResX: {width}\n\
         PlayResY: {height}\n\
         WrapStyle: 0\n\
         \n\
         [V4+ Styles]\n\
         Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
         Style: Default,{font},Bold,{size},&H00FFFFFF,&H00FFFFFF,&H00000000,&H00000000,1,0,0,0,100,100,0,0,1,0,0,2,10,10,50,1\n\
         \n\
         [Events]\n\
         Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n",
        font = CAPTION_FONT,
        size = caption_font_size(height),
    );

    for word in words {
        let _ = writeln!(
            out,
            "Dialogue: 0,{},{},Default,,0,0,0,,{}",
            ms_to_ass_time(word.start_ms),
            ms_to_ass_time(word.end_ms),
            escape_ass_text(&word.text)
        );
    }
    out
}

/// Path form accepted inside the `ass='...'` filter option.
pub fn escape_filter_path(path: &str) -> String {
    path.replace('\\', "/").replace(':', "\\:").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start_ms: u64, end_ms: u64) -> TranscriptWord {
        TranscriptWord {
            text: text.to_string(),
            start_ms,
            end_ms,
        }
    }

    #[test]
    fn test_ms_to_ass_time() {
        assert_eq!(ms_to_ass_time(0), "0:00:00.00");
        assert_eq!(ms_to_ass_time(1_230), "0:00:01.23");
        assert_eq!(ms_to_ass_time(61_005), "0:01:01.00");
        assert_eq!(ms_to_ass_time(3_723_990), "1:02:03.99");
    }

    #[test]
    fn test_build_ass() {
        let ass = build_ass(&[word("Hello", 0, 400), word("{world}", 400, 900)], 1080, 1920);

        assert!(ass.contains("PlayResX: 1080\nPlayResY: 1920\n"));
        assert!(ass.contains("Style: Default,Futura,Bold,115,"));
        assert!(ass.contains("Dialogue: 0,0:00:00.00,0:00:00.40,Default,,0,0,0,,Hello\n"));
        assert!(ass.contains(",,\\{world\\}\n"));
        assert_eq!(ass.lines().filter(|l| l.starts_with("Dialogue:")).count(), 2);
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(escape_filter_path(r"C:\work\captions.ass"), r"C\:/work/captions.ass");
        assert_eq!(escape_filter_path("/tmp/job/captions.ass"), "/tmp/job/captions.ass");
    }
}

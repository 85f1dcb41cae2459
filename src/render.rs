//! Terminal rendering of merged highlight fragments.

use std::fmt::Write as _;

use crate::heatmap::{Fragment, Hsl};

const RESET: &str = "\x1b[0m";
/// Highlights are light, so their text is drawn black.
const DARK_TEXT: &str = "\x1b[38;2;0;0;0m";

/// Plain markers used when colors are disabled.
const PLAIN_START: &str = "[";
const PLAIN_END: &str = "]";

/// Render fragments of `text` with 24-bit background colors.
pub fn render_ansi(text: &str, fragments: &[Fragment]) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for fragment in fragments {
        match fragment {
            Fragment::Text(span) => out.push_str(&text[span.start..span.end]),
            Fragment::LineBreak(_) => out.push('\n'),
            Fragment::Highlight { span, color, .. } => {
                let (r, g, b) = hsl_to_rgb(*color);
                let _ = write!(
                    out,
                    "\x1b[48;2;{r};{g};{b}m{DARK_TEXT}{}{RESET}",
                    &text[span.start..span.end]
                );
            }
        }
    }
    out
}

/// Render fragments with `[..]` around highlights and no escape codes.
pub fn render_plain(text: &str, fragments: &[Fragment]) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for fragment in fragments {
        match fragment {
            Fragment::Text(span) => out.push_str(&text[span.start..span.end]),
            Fragment::LineBreak(_) => out.push('\n'),
            Fragment::Highlight { span, .. } => {
                out.push_str(PLAIN_START);
                out.push_str(&text[span.start..span.end]);
                out.push_str(PLAIN_END);
            }
        }
    }
    out
}

/// Convert HSL (degrees, percent, percent) to 8-bit RGB.
pub fn hsl_to_rgb(color: Hsl) -> (u8, u8, u8) {
    let h = color.hue.rem_euclid(360.0) / 60.0;
    let s = (color.saturation / 100.0).clamp(0.0, 1.0);
    let l = (color.lightness / 100.0).clamp(0.0, 1.0);

    let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = l - chroma / 2.0;
    let to_byte = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (to_byte(r), to_byte(g), to_byte(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        heatmap::{HeatMap, merge_spans},
        records::Span,
    };

    fn hsl(hue: f32, saturation: f32, lightness: f32) -> Hsl {
        Hsl {
            hue,
            saturation,
            lightness,
        }
    }

    #[test]
    fn converts_primary_colors() {
        assert_eq!(hsl_to_rgb(hsl(0.0, 100.0, 50.0)), (255, 0, 0));
        assert_eq!(hsl_to_rgb(hsl(120.0, 100.0, 50.0)), (0, 255, 0));
        assert_eq!(hsl_to_rgb(hsl(240.0, 100.0, 50.0)), (0, 0, 255));
        assert_eq!(hsl_to_rgb(hsl(0.0, 85.0, 100.0)), (255, 255, 255));
    }

    #[test]
    fn plain_rendering_marks_highlights() {
        let text = "the cat sat\n\non the mat";
        let mut map = HeatMap::new();
        map.record(Span::new(0, 3), Span::new(4, 7), 0.9);
        map.record(Span::new(4, 7), Span::new(20, 23), 0.4);
        let fragments = merge_spans(&map, text);
        assert_eq!(render_plain(text, &fragments), "the [cat]\n[mat]");
    }

    #[test]
    fn ansi_rendering_wraps_highlights() {
        let text = "the cat";
        let mut map = HeatMap::new();
        map.record(Span::new(0, 3), Span::new(4, 7), 1.0);
        let rendered = render_ansi(text, &merge_spans(&map, text));
        assert!(rendered.starts_with("the \x1b[48;2;"));
        assert!(rendered.ends_with(&format!("cat{RESET}")));
    }
}

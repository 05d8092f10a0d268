use avt::{Line, Pen};

use super::state::{Color, FormattedLine, Span, Style};

/// Convert an avt Line to a FormattedLine.
///
/// For plain format, trailing whitespace is always trimmed. For styled
/// format, trailing whitespace is trimmed only when it carries default
/// styling, preserving intentional styled whitespace such as colored
/// backgrounds.
pub fn format_line(line: &Line, styled: bool) -> FormattedLine {
    if styled {
        let mut spans = line_to_spans(line);
        trim_trailing_default_whitespace(&mut spans);
        FormattedLine::Styled(spans)
    } else {
        FormattedLine::Plain(line.text().trim_end().to_string())
    }
}

/// Merge adjacent cells with identical styling into spans.
fn line_to_spans(line: &Line) -> Vec<Span> {
    let cells = line.cells();
    if cells.is_empty() {
        return vec![];
    }

    let mut spans = Vec::new();
    let mut current_text = String::new();
    let mut current_style: Option<Style> = None;

    for cell in cells {
        let ch = cell.char();
        if ch == '\0' || cell.width() == 0 {
            continue;
        }

        let style = pen_to_style(cell.pen());

        match &current_style {
            Some(s) if *s == style => current_text.push(ch),
            Some(_) => {
                if !current_text.is_empty() {
                    spans.push(Span {
                        text: std::mem::take(&mut current_text),
                        style: current_style.take().unwrap(),
                    });
                }
                current_style = Some(style);
                current_text.push(ch);
            }
            None => {
                current_style = Some(style);
                current_text.push(ch);
            }
        }
    }

    if !current_text.is_empty() {
        if let Some(style) = current_style {
            spans.push(Span {
                text: current_text,
                style,
            });
        }
    }

    spans
}

fn trim_trailing_default_whitespace(spans: &mut Vec<Span>) {
    while let Some(last) = spans.last_mut() {
        if !last.style.is_default() {
            break;
        }
        let trimmed = last.text.trim_end();
        if trimmed.is_empty() {
            spans.pop();
        } else {
            last.text = trimmed.to_string();
            break;
        }
    }
}

fn pen_to_style(pen: &Pen) -> Style {
    Style {
        fg: pen.foreground().map(color_to_color),
        bg: pen.background().map(color_to_color),
        bold: pen.is_bold(),
        italic: pen.is_italic(),
        underline: pen.is_underline(),
        inverse: pen.is_inverse(),
    }
}

fn color_to_color(c: avt::Color) -> Color {
    match c {
        avt::Color::Indexed(i) => Color::Indexed(i),
        avt::Color::RGB(rgb) => Color::Rgb {
            r: rgb.r,
            g: rgb.g,
            b: rgb.b,
        },
    }
}

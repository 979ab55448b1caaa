use super::fence::{is_closing_fence, is_partial_closing_fence, opening_fence, parse_info, Fence};
use super::markup::prose_to_markup;
use super::{BlockSegment, ProseSegment, Segment};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// The snapshot may still grow: an unterminated final fence is trailing.
    #[default]
    Streaming,
    /// The producer has finished: every block is committed.
    Final,
}

/// Segment a mid-stream snapshot.
pub fn parse(text: &str) -> Vec<Segment> {
    parse_with(text, ParseMode::Streaming)
}

pub fn parse_with(text: &str, mode: ParseMode) -> Vec<Segment> {
    let lines = split_lines(text);
    let mut builder = SegmentBuilder::new(text);
    let mut prose_start = 0;
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index];
        let Some((fence, info)) = opening_fence(line.body(text)) else {
            index += 1;
            continue;
        };

        builder.push_prose(prose_start..line.start);

        if !line.terminated {
            // The info string is still arriving; do not commit a kind yet.
            let (kind, file_path) = match mode {
                ParseMode::Streaming => (None, None),
                ParseMode::Final => parse_info(info),
            };
            builder.push_block(
                kind,
                file_path,
                String::new(),
                mode == ParseMode::Streaming,
                line.start..text.len(),
            );
            prose_start = text.len();
            break;
        }

        let (kind, file_path) = parse_info(info);
        let content_start = line.end;
        let closing = lines[index + 1..]
            .iter()
            .position(|candidate| is_closing_fence(candidate.body(text), fence))
            .map(|offset| index + 1 + offset);

        match closing {
            Some(close_index) => {
                let close = lines[close_index];
                let raw = strip_final_newline(&text[content_start..close.start]);
                builder.push_block(
                    kind,
                    file_path,
                    raw.to_string(),
                    false,
                    line.start..close.end,
                );
                prose_start = close.end;
                index = close_index + 1;
            }
            None => {
                let raw = unterminated_content(text, &lines[index + 1..], content_start, fence, mode);
                builder.push_block(
                    kind,
                    file_path,
                    raw.to_string(),
                    mode == ParseMode::Streaming,
                    line.start..text.len(),
                );
                prose_start = text.len();
                break;
            }
        }
    }

    builder.push_prose(prose_start..text.len());
    builder.finish()
}

/// Rebuild the source text from the ranges of a parse.
pub fn reconstruct(text: &str, segments: &[Segment]) -> String {
    segments
        .iter()
        .filter_map(|segment| text.get(segment.range().clone()))
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Line {
    start: usize,
    /// End of the line body, before any `\r\n` or `\n`.
    body_end: usize,
    /// End including the terminator.
    end: usize,
    terminated: bool,
}

impl Line {
    fn body<'t>(&self, text: &'t str) -> &'t str {
        &text[self.start..self.body_end]
    }
}

fn split_lines(text: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut start = 0;
    for piece in text.split_inclusive('\n') {
        let end = start + piece.len();
        let terminated = piece.ends_with('\n');
        let body = piece.strip_suffix('\n').unwrap_or(piece);
        let body = body.strip_suffix('\r').unwrap_or(body);
        lines.push(Line {
            start,
            body_end: start + body.len(),
            end,
            terminated,
        });
        start = end;
    }
    lines
}

fn strip_final_newline(content: &str) -> &str {
    let content = content.strip_suffix('\n').unwrap_or(content);
    content.strip_suffix('\r').unwrap_or(content)
}

fn unterminated_content<'t>(
    text: &'t str,
    rest: &[Line],
    content_start: usize,
    fence: Fence,
    mode: ParseMode,
) -> &'t str {
    let mut content_end = text.len();
    if mode == ParseMode::Streaming {
        // Hold back a closing fence that is only partially received.
        if let Some(last) = rest.last() {
            if !last.terminated && is_partial_closing_fence(last.body(text), fence) {
                content_end = last.start;
            }
        }
    }
    strip_final_newline(&text[content_start..content_end])
}

struct SegmentBuilder<'t> {
    text: &'t str,
    segments: Vec<Segment>,
    next_ordinal: usize,
}

impl<'t> SegmentBuilder<'t> {
    fn new(text: &'t str) -> Self {
        Self {
            text,
            segments: Vec::new(),
            next_ordinal: 0,
        }
    }

    fn push_prose(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        let rendered_markup = prose_to_markup(&self.text[range.clone()]);
        self.segments.push(Segment::Prose(ProseSegment {
            rendered_markup,
            range,
        }));
    }

    fn push_block(
        &mut self,
        kind: Option<String>,
        file_path: Option<String>,
        raw_content: String,
        is_trailing: bool,
        range: Range<usize>,
    ) {
        self.segments.push(Segment::Block(BlockSegment {
            kind,
            raw_content,
            file_path,
            ordinal: self.next_ordinal,
            is_trailing,
            range,
        }));
        self.next_ordinal += 1;
    }

    fn finish(self) -> Vec<Segment> {
        self.segments
    }
}

const MIN_FENCE_LEN: usize = 3;
const MAX_FENCE_INDENT: usize = 3;

/// The delimiter that opened a block. Only a line made of the same character,
/// at least as long, closes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Fence {
    marker: u8,
    len: usize,
}

/// Returns the fence and its info string if `line` opens a block.
/// `line` must not contain the line terminator.
pub(super) fn opening_fence(line: &str) -> Option<(Fence, &str)> {
    let rest = strip_indent(line)?;
    let marker = *rest.as_bytes().first()?;
    if marker != b'`' && marker != b'~' {
        return None;
    }

    let len = marker_run(rest, marker);
    if len < MIN_FENCE_LEN {
        return None;
    }

    let info = &rest[len..];
    // A backtick inside a backtick fence's info string means inline code.
    if marker == b'`' && info.contains('`') {
        return None;
    }

    Some((Fence { marker, len }, info.trim()))
}

pub(super) fn is_closing_fence(line: &str, fence: Fence) -> bool {
    let Some(rest) = strip_indent(line) else {
        return false;
    };
    let len = marker_run(rest, fence.marker);
    len >= fence.len && rest[len..].trim().is_empty()
}

/// A final, unterminated line that could still grow into the closing fence.
pub(super) fn is_partial_closing_fence(line: &str, fence: Fence) -> bool {
    let Some(rest) = strip_indent(line) else {
        return false;
    };
    !rest.is_empty() && marker_run(rest, fence.marker) == rest.len()
}

/// Splits the info string into `(kind, file_path)`.
pub(super) fn parse_info(info: &str) -> (Option<String>, Option<String>) {
    let mut tokens = info.split_whitespace();
    let kind = tokens.next().map(str::to_string);
    let file_path = tokens.next().map(str::to_string);
    (kind, file_path)
}

fn strip_indent(line: &str) -> Option<&str> {
    let indent = line.bytes().take_while(|b| *b == b' ').count();
    if indent > MAX_FENCE_INDENT {
        return None;
    }
    Some(&line[indent..])
}

fn marker_run(text: &str, marker: u8) -> usize {
    text.bytes().take_while(|b| *b == marker).count()
}

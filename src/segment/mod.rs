//! Splitting a (possibly incomplete) model response into prose and fenced
//! blocks.
//!
//! Every segment records the byte range of the snapshot it came from. The
//! ranges of one parse are contiguous and cover the whole input, so the
//! source text can always be rebuilt with [`reconstruct`].

mod fence;
mod markup;
mod parser;

pub use markup::{escape_html, prose_to_markup};
pub use parser::{parse, parse_with, reconstruct, ParseMode};

use serde::Serialize;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Prose(ProseSegment),
    Block(BlockSegment),
}

/// Sanitised markup for a span of prose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProseSegment {
    pub rendered_markup: String,
    pub range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSegment {
    /// First token of the fence info string, if committed.
    pub kind: Option<String>,
    pub raw_content: String,
    /// Second token of the fence info string.
    pub file_path: Option<String>,
    /// 0-based position among the blocks of one snapshot.
    pub ordinal: usize,
    /// The closing fence has not arrived yet and the content may still grow.
    pub is_trailing: bool,
    pub range: Range<usize>,
}

impl Segment {
    pub fn range(&self) -> &Range<usize> {
        match self {
            Self::Prose(prose) => &prose.range,
            Self::Block(block) => &block.range,
        }
    }

    pub fn as_block(&self) -> Option<&BlockSegment> {
        match self {
            Self::Block(block) => Some(block),
            Self::Prose(_) => None,
        }
    }
}

impl BlockSegment {
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref()
    }

    pub fn kind_label(&self) -> &str {
        self.kind().filter(|kind| !kind.is_empty()).unwrap_or("text")
    }
}

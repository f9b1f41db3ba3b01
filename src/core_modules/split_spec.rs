// THEORY:
// A `SplitSpec` is the contract shared by every stage that touches blocks. The
// image, its mask and any reconstruction target must all be walked with the same
// block size and the same overlap, otherwise block (row, col) in one grid stops
// meaning the same pixels as block (row, col) in another.
//
// The only hard rule is that an overlap is strictly smaller than the block it
// belongs to. That keeps both strides positive, which is what guarantees the
// tiling walk terminates. The rule is checked once, at construction, and the
// fields are private so a constructed spec can never be bent out of shape.

use crate::error::{Error, Result};
use serde::Deserialize;

/// Block size and overlap used to tile an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSpec {
    block_width: usize,
    block_height: usize,
    overlap_horizontal: usize,
    overlap_vertical: usize,
}

impl SplitSpec {
    pub fn new(
        block_width: usize,
        block_height: usize,
        overlap_horizontal: usize,
        overlap_vertical: usize,
    ) -> Result<Self> {
        if overlap_horizontal >= block_width || overlap_vertical >= block_height {
            return Err(Error::invalid(format!(
                "overlap ({overlap_horizontal}x{overlap_vertical}) must be strictly smaller \
                 than block size ({block_width}x{block_height})"
            )));
        }
        Ok(Self {
            block_width,
            block_height,
            overlap_horizontal,
            overlap_vertical,
        })
    }

    /// Square blocks with no overlap.
    pub fn square(size: usize) -> Result<Self> {
        Self::new(size, size, 0, 0)
    }

    pub fn block_width(&self) -> usize {
        self.block_width
    }

    pub fn block_height(&self) -> usize {
        self.block_height
    }

    pub fn overlap_horizontal(&self) -> usize {
        self.overlap_horizontal
    }

    pub fn overlap_vertical(&self) -> usize {
        self.overlap_vertical
    }

    /// Horizontal step between successive block origins.
    pub fn stride_x(&self) -> usize {
        self.block_width - self.overlap_horizontal
    }

    /// Vertical step between successive block origins.
    pub fn stride_y(&self) -> usize {
        self.block_height - self.overlap_vertical
    }

    /// Length of a flattened full-size block with `channels` samples per pixel.
    pub fn sample_len(&self, channels: usize) -> usize {
        self.block_width * self.block_height * channels
    }
}

/// Unvalidated form of a [`SplitSpec`], as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RawSplitSpec {
    pub block_width: usize,
    pub block_height: usize,
    #[serde(default)]
    pub overlap_horizontal: usize,
    #[serde(default)]
    pub overlap_vertical: usize,
}

impl TryFrom<RawSplitSpec> for SplitSpec {
    type Error = Error;

    fn try_from(raw: RawSplitSpec) -> Result<Self> {
        SplitSpec::new(
            raw.block_width,
            raw.block_height,
            raw.overlap_horizontal,
            raw.overlap_vertical,
        )
    }
}

impl TryFrom<Option<RawSplitSpec>> for SplitSpec {
    type Error = Error;

    fn try_from(raw: Option<RawSplitSpec>) -> Result<Self> {
        raw.ok_or_else(|| Error::invalid("split specification is missing"))?
            .try_into()
    }
}

impl From<SplitSpec> for RawSplitSpec {
    fn from(spec: SplitSpec) -> Self {
        Self {
            block_width: spec.block_width,
            block_height: spec.block_height,
            overlap_horizontal: spec.overlap_horizontal,
            overlap_vertical: spec.overlap_vertical,
        }
    }
}

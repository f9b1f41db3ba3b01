// THEORY:
// A `Block` is a rectangular window onto a larger array. It owns no pixels: it is
// an `ndarray` view plus the two coordinates that identify it, its position in the
// block grid and the pixel origin it was cut from. Keeping both lets a caller pair
// an image block with the mask block at the same grid position, and lets a
// reconstruction put it back where it came from.
//
// Only the first two axes are spatial. Anything after them (colour channels) is
// carried through untouched, so the same type serves grayscale images, colour
// images and boolean masks.

use crate::core_modules::split_spec::SplitSpec;
use ndarray::{ArrayView, Dimension};

/// A view of one tile of a source array.
#[derive(Debug)]
pub struct Block<'a, A, D: Dimension> {
    /// Grid row of this block (0 = top).
    pub row: usize,
    /// Grid column of this block (0 = left).
    pub col: usize,
    /// Pixel row of the block's top-left corner in the source.
    pub y: usize,
    /// Pixel column of the block's top-left corner in the source.
    pub x: usize,
    /// The block's pixels, borrowed from the source array.
    pub view: ArrayView<'a, A, D>,
}

// Views clone without requiring `A: Clone`.
impl<A, D: Dimension> Clone for Block<'_, A, D> {
    fn clone(&self) -> Self {
        Self {
            row: self.row,
            col: self.col,
            y: self.y,
            x: self.x,
            view: self.view.clone(),
        }
    }
}

impl<'a, A, D: Dimension> Block<'a, A, D> {
    pub fn height(&self) -> usize {
        self.view.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.view.shape()[1]
    }

    /// `(height, width)` of the block.
    pub fn spatial_shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    /// Samples per pixel (product of all non-spatial axes, 1 for 2-D arrays).
    pub fn channels(&self) -> usize {
        self.view.shape()[2..].iter().product()
    }

    /// Number of pixels covered by the block.
    pub fn pixel_count(&self) -> usize {
        self.height() * self.width()
    }

    /// True when the block was not clipped by the right or bottom edge.
    pub fn is_full(&self, spec: &SplitSpec) -> bool {
        self.height() == spec.block_height() && self.width() == spec.block_width()
    }

    /// Copies the block into a row-major sample vector, channels innermost.
    pub fn flatten(&self) -> Vec<f32>
    where
        A: Copy + Into<f32>,
    {
        self.view.iter().map(|&v| v.into()).collect()
    }
}

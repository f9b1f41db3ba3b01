// THEORY:
// The tiling engine turns one array into an ordered grid of block views and puts
// such a grid back together again. It is the only place that knows how block
// origins are laid out, so every other stage (mask selection, corpus assembly,
// label maps) gets identical geometry by going through it.
//
// Key architectural principles:
// 1.  **Fixed traversal**: origins advance left-to-right by `stride_x`, then
//     top-to-bottom by `stride_y`. A row ends once the next origin would start at
//     or past the right edge; the grid ends the same way at the bottom edge.
// 2.  **Clipping, not padding**: a block starting near an edge is cut to the array
//     bounds. Edge blocks can therefore be smaller than the nominal block size and
//     callers decide whether to keep them.
// 3.  **Zero-copy**: split never copies pixels. Blocks are `ndarray` views that
//     borrow the source for as long as the grid lives.
// 4.  **Last writer wins**: join replays the same walk and writes each block over
//     whatever is already in the target. In overlapped zones the bottom/right
//     block's pixels are the ones that survive. Nothing is averaged.

use crate::core_modules::block::Block;
use crate::core_modules::split_spec::SplitSpec;
use crate::error::{Error, Result};
use ndarray::{Array, ArrayBase, ArrayView, ArrayViewMut, Axis, Data, DataMut, Dimension, Slice};
use tracing::debug;

/// Grid and pixel coordinates of one block origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOrigin {
    pub row: usize,
    pub col: usize,
    pub y: usize,
    pub x: usize,
}

/// Lazily walks the block origins of a `height` x `width` array.
#[derive(Debug, Clone)]
pub struct BlockOrigins {
    height: usize,
    width: usize,
    stride_y: usize,
    stride_x: usize,
    row: usize,
    col: usize,
    y: usize,
    x: usize,
}

impl BlockOrigins {
    pub fn new(height: usize, width: usize, spec: &SplitSpec) -> Self {
        Self {
            height,
            width,
            stride_y: spec.stride_y(),
            stride_x: spec.stride_x(),
            row: 0,
            col: 0,
            y: 0,
            x: 0,
        }
    }
}

impl Iterator for BlockOrigins {
    type Item = BlockOrigin;

    fn next(&mut self) -> Option<Self::Item> {
        if self.width == 0 || self.y >= self.height {
            return None;
        }

        let origin = BlockOrigin {
            row: self.row,
            col: self.col,
            y: self.y,
            x: self.x,
        };

        self.x += self.stride_x;
        self.col += 1;
        if self.x >= self.width {
            self.x = 0;
            self.col = 0;
            self.y += self.stride_y;
            self.row += 1;
        }

        Some(origin)
    }
}

/// Number of blocks `split` produces for a `height` x `width` array.
pub fn count_blocks(height: usize, width: usize, spec: &SplitSpec) -> usize {
    if height == 0 || width == 0 {
        return 0;
    }
    height.div_ceil(spec.stride_y()) * width.div_ceil(spec.stride_x())
}

/// The blocks of one array, row-major, together with the spec that cut them.
#[derive(Debug, Clone)]
pub struct BlockGrid<'a, A, D: Dimension> {
    spec: SplitSpec,
    source_dim: D,
    rows: Vec<Vec<Block<'a, A, D>>>,
}

impl<'a, A, D: Dimension> BlockGrid<'a, A, D> {
    pub fn spec(&self) -> &SplitSpec {
        &self.spec
    }

    /// Full shape of the array the grid was cut from.
    pub fn source_dim(&self) -> &D {
        &self.source_dim
    }

    pub fn rows(&self) -> &[Vec<Block<'a, A, D>>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Total number of blocks.
    pub fn len(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Block<'a, A, D>> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Row-major iterator over all blocks.
    pub fn iter(&self) -> Blocks<'_, 'a, A, D> {
        iterate(self)
    }

    /// Row-major iterator over the blocks that were not clipped by an edge.
    pub fn full_blocks(&self) -> impl Iterator<Item = Block<'a, A, D>> + '_ {
        let spec = self.spec;
        self.iter().filter(move |block| block.is_full(&spec))
    }

    /// Rebuilds the source array from the blocks on a canvas filled with `fill`.
    pub fn reassemble(&self, fill: A) -> Result<Array<A, D>>
    where
        A: Clone,
    {
        let mut canvas = Array::from_elem(self.source_dim.clone(), fill);
        join(self, &mut canvas, &self.spec)?;
        Ok(canvas)
    }
}

/// Cursor over a [`BlockGrid`]: forward-only, one block per `next`.
#[derive(Debug)]
pub struct Blocks<'g, 'a, A, D: Dimension> {
    grid: &'g BlockGrid<'a, A, D>,
    row: usize,
    col: usize,
}

impl<'g, 'a, A, D: Dimension> Iterator for Blocks<'g, 'a, A, D> {
    type Item = Block<'a, A, D>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = self.grid.rows.get(self.row)?;
            if let Some(block) = row.get(self.col) {
                self.col += 1;
                debug!(
                    row = block.row,
                    col = block.col,
                    shape = ?block.view.shape(),
                    "image block at sequence location"
                );
                return Some(block.clone());
            }
            self.row += 1;
            self.col = 0;
        }
    }
}

impl<'a, A, D: Dimension> IntoIterator for BlockGrid<'a, A, D> {
    type Item = Block<'a, A, D>;
    type IntoIter = std::iter::Flatten<std::vec::IntoIter<Vec<Block<'a, A, D>>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter().flatten()
    }
}

/// Cuts `image` into blocks of `spec`, left-to-right then top-to-bottom.
///
/// The first two axes are treated as (height, width). Edge blocks are clipped to
/// the array bounds. The returned blocks borrow `image`.
pub fn split<'a, A, S, D>(image: &'a ArrayBase<S, D>, spec: &SplitSpec) -> Result<BlockGrid<'a, A, D>>
where
    S: Data<Elem = A>,
    D: Dimension,
{
    if image.ndim() < 2 {
        return Err(Error::invalid(format!(
            "cannot split a {}-dimensional array into blocks",
            image.ndim()
        )));
    }

    let (height, width) = (image.shape()[0], image.shape()[1]);
    let mut rows: Vec<Vec<Block<'a, A, D>>> = Vec::new();

    for origin in BlockOrigins::new(height, width, spec) {
        let view = window(
            image.view(),
            origin.y,
            origin.x,
            spec.block_height(),
            spec.block_width(),
        );
        debug!(
            y = origin.y,
            x = origin.x,
            shape = ?view.shape(),
            "image block at image position"
        );

        if origin.col == 0 {
            rows.push(Vec::new());
        }
        if let Some(current) = rows.last_mut() {
            current.push(Block {
                row: origin.row,
                col: origin.col,
                y: origin.y,
                x: origin.x,
                view,
            });
        }
    }

    Ok(BlockGrid {
        spec: *spec,
        source_dim: image.raw_dim(),
        rows,
    })
}

/// Writes every block of `grid` back into `target`.
///
/// Offsets are recomputed by accumulating the strides of `spec` over the grid's
/// rows and columns, exactly as `split` laid them out. Later blocks overwrite
/// earlier ones where they overlap. Writes falling outside `target` are clipped.
pub fn join<'t, A, S, D>(
    grid: &BlockGrid<'_, A, D>,
    target: &'t mut ArrayBase<S, D>,
    spec: &SplitSpec,
) -> Result<&'t mut ArrayBase<S, D>>
where
    A: Clone,
    S: DataMut<Elem = A>,
    D: Dimension,
{
    let mut y = 0;
    for row in &grid.rows {
        let mut x = 0;
        for block in row {
            debug!(
                block = ?block.view.shape(),
                target = ?target.shape(),
                y,
                x,
                "copying block into target"
            );
            paste(target, y, x, block.view.clone())?;
            x += spec.stride_x();
        }
        y += spec.stride_y();
    }
    Ok(target)
}

/// Iterates the blocks of `grid` in the order `split` produced them.
pub fn iterate<'g, 'a, A, D: Dimension>(grid: &'g BlockGrid<'a, A, D>) -> Blocks<'g, 'a, A, D> {
    Blocks { grid, row: 0, col: 0 }
}

/// Copies `source` into `target` with its top-left corner at (`y`, `x`).
///
/// The part of `source` that falls outside `target` is dropped.
pub(crate) fn paste<A, S, D>(
    target: &mut ArrayBase<S, D>,
    y: usize,
    x: usize,
    source: ArrayView<'_, A, D>,
) -> Result<()>
where
    A: Clone,
    S: DataMut<Elem = A>,
    D: Dimension,
{
    if target.ndim() < 2 || source.ndim() < 2 || target.shape()[2..] != source.shape()[2..] {
        return Err(Error::invalid(format!(
            "block shape {:?} does not fit target shape {:?}",
            source.shape(),
            target.shape()
        )));
    }

    let (target_height, target_width) = (target.shape()[0], target.shape()[1]);
    if y >= target_height || x >= target_width {
        return Ok(());
    }
    let height = source.shape()[0].min(target_height - y);
    let width = source.shape()[1].min(target_width - x);

    let mut destination: ArrayViewMut<'_, A, D> = target.view_mut();
    destination.slice_axis_inplace(Axis(0), Slice::from(y..y + height));
    destination.slice_axis_inplace(Axis(1), Slice::from(x..x + width));
    destination.assign(&window(source, 0, 0, height, width));
    Ok(())
}

/// Narrows `view` to at most `height` x `width` pixels starting at (`y`, `x`).
fn window<A, D: Dimension>(
    mut view: ArrayView<'_, A, D>,
    y: usize,
    x: usize,
    height: usize,
    width: usize,
) -> ArrayView<'_, A, D> {
    let y_end = (y + height).min(view.shape()[0]);
    let x_end = (x + width).min(view.shape()[1]);
    view.slice_axis_inplace(Axis(0), Slice::from(y..y_end));
    view.slice_axis_inplace(Axis(1), Slice::from(x..x_end));
    view
}

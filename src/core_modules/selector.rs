// THEORY:
// The selector decides which image blocks are worth keeping by looking at the mask
// block cut from the same grid position. A block survives when the share of
// "allowed" mask pixels, rounded to a whole percent, reaches the threshold.
// Allowed pixels are the true cells, or the false cells when the mask is inverted.
//
// Selection is a lazy filter over two parallel block sequences. It pairs them
// positionally and stops at the end of the shorter one, so both grids must come
// from the same `SplitSpec` applied to arrays of the same height and width.

use crate::core_modules::block::Block;
use crate::error::{Error, Result};
use ndarray::{ArrayBase, Data, Dimension, Ix2};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_THRESHOLD_PERCENT: u32 = 10;

/// Parameters of the mask selection predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SelectionRule {
    /// Count false mask cells as allowed instead of true ones.
    pub invert: bool,
    /// Minimum rounded percentage of allowed pixels, inclusive.
    pub threshold_percent: u32,
}

impl Default for SelectionRule {
    fn default() -> Self {
        Self {
            invert: false,
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
        }
    }
}

/// `part * 100 / total` rounded half-up to a whole percent.
pub fn rounded_percent(part: usize, total: usize) -> u64 {
    if total == 0 {
        return 0;
    }
    let (part, total) = (part as u64, total as u64);
    (part * 200 + total) / (2 * total)
}

/// Applies `rule` to one image block and the mask block covering the same pixels.
pub fn is_block_selected<S, D, M>(
    image_block: &ArrayBase<S, D>,
    mask_block: &ArrayBase<M, Ix2>,
    rule: &SelectionRule,
) -> Result<bool>
where
    S: Data,
    D: Dimension,
    M: Data<Elem = bool>,
{
    if image_block.ndim() < 2 || mask_block.dim() != (image_block.shape()[0], image_block.shape()[1]) {
        return Err(Error::invalid(format!(
            "mask block shape {:?} should match image block shape {:?}",
            mask_block.shape(),
            &image_block.shape()[..image_block.ndim().min(2)]
        )));
    }

    let total = mask_block.len();
    let selected = mask_block.iter().filter(|&&cell| cell).count();
    let allowed = if rule.invert { total - selected } else { selected };
    if total == 0 {
        return Ok(false);
    }
    Ok(rounded_percent(allowed, total) >= u64::from(rule.threshold_percent))
}

/// Lazy filter yielding the image blocks whose mask block satisfies a rule.
///
/// A shape mismatch is yielded once as an error and ends the sequence.
#[derive(Debug)]
pub struct SelectByMask<I, M> {
    image_blocks: I,
    mask_blocks: M,
    rule: SelectionRule,
    failed: bool,
}

impl<'a, 'm, A, D, I, M> Iterator for SelectByMask<I, M>
where
    A: 'a,
    D: Dimension,
    I: Iterator<Item = Block<'a, A, D>>,
    M: Iterator<Item = Block<'m, bool, Ix2>>,
{
    type Item = Result<Block<'a, A, D>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let image_block = self.image_blocks.next()?;
            let mask_block = self.mask_blocks.next()?;
            match is_block_selected(&image_block.view, &mask_block.view, &self.rule) {
                Ok(selected) => {
                    debug!(
                        row = image_block.row,
                        col = image_block.col,
                        image = ?image_block.view.shape(),
                        mask = ?mask_block.view.shape(),
                        selected,
                        "mask selection"
                    );
                    if selected {
                        return Some(Ok(image_block));
                    }
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Pairs image blocks with mask blocks and keeps the image blocks selected by `rule`.
pub fn select_by_mask<I, M>(image_blocks: I, mask_blocks: M, rule: SelectionRule) -> SelectByMask<I::IntoIter, M::IntoIter>
where
    I: IntoIterator,
    M: IntoIterator,
{
    SelectByMask {
        image_blocks: image_blocks.into_iter(),
        mask_blocks: mask_blocks.into_iter(),
        rule,
        failed: false,
    }
}

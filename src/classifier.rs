//! The seam to an external classifier.
//!
//! The crate does not learn anything itself. It only guarantees that sample rows
//! and labels line up, and that predictions made per block can be mapped back
//! onto the image they came from.

use crate::core_modules::split_spec::SplitSpec;
use crate::core_modules::tiling::{paste, split};
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Dimension};
use std::path::Path;
use tracing::debug;

/// A trainable classifier over fixed-length `f32` samples.
pub trait Classifier {
    type Model;

    /// Fits a model; `labels[i]` belongs to `samples.row(i)`.
    fn train(&self, samples: ArrayView2<'_, f32>, labels: ArrayView1<'_, i32>) -> Result<Self::Model>;

    /// Predicts one label per row of `samples`.
    fn predict(&self, model: &Self::Model, samples: ArrayView2<'_, f32>) -> Result<Array1<i32>>;

    fn save(&self, model: &Self::Model, path: &Path) -> Result<()>;

    fn load(&self, path: &Path) -> Result<Self::Model>;
}

/// Predicted label of one full-size block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPrediction {
    pub row: usize,
    pub col: usize,
    pub y: usize,
    pub x: usize,
    pub label: i32,
}

/// Tiles `image` and predicts a label for each full-size block, in grid order.
pub fn classify_image<C, A, S, D>(
    image: &ArrayBase<S, D>,
    spec: &SplitSpec,
    classifier: &C,
    model: &C::Model,
) -> Result<Vec<BlockPrediction>>
where
    C: Classifier,
    A: Copy + Into<f32>,
    S: Data<Elem = A>,
    D: Dimension,
{
    let grid = split(image, spec)?;
    let blocks: Vec<_> = grid.full_blocks().collect();
    let Some(first) = blocks.first() else {
        return Ok(Vec::new());
    };

    let sample_len = spec.sample_len(first.channels());
    let samples: Vec<f32> = blocks.iter().flat_map(|block| block.flatten()).collect();
    let samples = Array2::from_shape_vec((blocks.len(), sample_len), samples)
        .map_err(|e| Error::invalid(e.to_string()))?;

    let labels = classifier.predict(model, samples.view())?;
    if labels.len() != blocks.len() {
        return Err(Error::Classifier(format!(
            "expected {} predictions, got {}",
            blocks.len(),
            labels.len()
        )));
    }
    debug!(blocks = blocks.len(), "classified image blocks");

    Ok(blocks
        .iter()
        .zip(labels.iter())
        .map(|(block, &label)| BlockPrediction {
            row: block.row,
            col: block.col,
            y: block.y,
            x: block.x,
            label,
        })
        .collect())
}

/// Paints each prediction over its block on a `height` x `width` map filled with
/// `background`. Where blocks overlap, later predictions overwrite earlier ones.
pub fn label_map(
    predictions: &[BlockPrediction],
    (height, width): (usize, usize),
    spec: &SplitSpec,
    background: i32,
) -> Result<Array2<i32>> {
    let mut map = Array2::from_elem((height, width), background);
    for prediction in predictions {
        let patch = Array2::from_elem((spec.block_height(), spec.block_width()), prediction.label);
        paste(&mut map, prediction.y, prediction.x, patch.view())?;
    }
    Ok(map)
}

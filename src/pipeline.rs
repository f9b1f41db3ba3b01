// THEORY:
// The `pipeline` module is the top-level API of the crate. It turns a labelled
// folder of images into one training matrix for an external classifier:
//
//   root/
//     0_NotGrass/  a.png b.png ...
//     1_Grass/     c.png c_mask.png ...
//
// Stage 1: Discovery. The corpus walker mirrors the root, the tree is flattened
//          to a sorted list of files and optionally shuffled with a fixed seed.
// Stage 2: Loading. Each file is decoded as grayscale. Anything that does not
//          decode (stray notes or corrupt data) is skipped here,
//          before its location is looked at.
// Stage 3: Labelling. The label comes from the parent folder name, `<id>_<name>`.
//          An image in a folder that does not follow the convention stops the
//          whole run, since its label cannot be known.
// Stage 4: Tiling. The image is split into blocks. When a mask image sits next
//          to it, the mask is decoded, tiled the same way and used to filter the
//          blocks. Only blocks of the exact nominal size are kept; clipped edge
//          blocks are dropped, never padded.
// Stage 5: Stacking. Retained blocks are flattened into rows of the sample matrix
//          in traversal order, with the image's label repeated once per row.
//
// Images or masks that fail to load are logged and the image is skipped. Every
// other failure aborts, including a strict mask with a second colour.

use crate::classifier::Classifier;
use crate::core_modules::corpus::{build_structure, flatten};
use crate::core_modules::mask::{DEFAULT_MASK_COLOR, MaskMode, decode};
use crate::core_modules::selector::{SelectionRule, select_by_mask};
use crate::core_modules::split_spec::SplitSpec;
use crate::core_modules::tiling::split;
use crate::core_modules::utils::image_helper::{FileImageLoader, ImageLoader};
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Label id -> label name, taken from `<id>_<name>` folder names.
pub type LabelTable = BTreeMap<i32, String>;

pub const DEFAULT_MASK_SUFFIX: &str = "_mask";

/// How companion mask images are found and applied.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskOptions {
    /// `photo.png` is masked by `photo<suffix>.png` in the same folder.
    pub suffix: String,
    /// Reference colour marking relevant pixels, `#rrggbb`.
    pub color: String,
    pub mode: MaskMode,
    pub rule: SelectionRule,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_MASK_SUFFIX.to_string(),
            color: DEFAULT_MASK_COLOR.to_string(),
            mode: MaskMode::default(),
            rule: SelectionRule::default(),
        }
    }
}

/// Configuration for corpus assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusOptions {
    pub split: SplitSpec,
    /// Shuffle discovered files with this seed before tiling.
    pub shuffle_seed: Option<u64>,
    /// Filter blocks with companion masks when set.
    pub mask: Option<MaskOptions>,
}

impl CorpusOptions {
    pub fn new(split: SplitSpec) -> Self {
        Self {
            split,
            shuffle_seed: None,
            mask: None,
        }
    }
}

/// What one image added to the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub path: PathBuf,
    pub label: i32,
    pub blocks: usize,
}

/// Stacked samples, their labels and the label names.
#[derive(Debug, Clone)]
pub struct TrainingCorpus {
    /// One flattened full-size block per row.
    pub samples: Array2<f32>,
    /// `labels[i]` is the label of `samples.row(i)`.
    pub labels: Array1<i32>,
    pub label_table: LabelTable,
    /// Images that contributed at least one row, in stacking order.
    pub sources: Vec<SourceSummary>,
}

impl TrainingCorpus {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Length of one sample row.
    pub fn sample_len(&self) -> usize {
        self.samples.ncols()
    }

    /// Hands the corpus to `classifier` for training.
    pub fn train_with<C: Classifier>(&self, classifier: &C) -> Result<C::Model> {
        info!(
            samples = self.len(),
            features = self.sample_len(),
            labels = self.label_table.len(),
            "training classifier"
        );
        classifier.train(self.samples.view(), self.labels.view())
    }
}

/// The retained rows of one image, before stacking.
#[derive(Debug, Clone)]
pub(crate) struct ImageContribution {
    pub path: PathBuf,
    pub label: i32,
    pub label_name: String,
    pub rows: Vec<f32>,
    pub blocks: usize,
}

/// Sequential corpus assembler.
pub struct TrainingPipeline<L: ImageLoader = FileImageLoader> {
    options: CorpusOptions,
    loader: L,
}

impl TrainingPipeline<FileImageLoader> {
    pub fn new(options: CorpusOptions) -> Self {
        Self {
            options,
            loader: FileImageLoader,
        }
    }
}

impl<L: ImageLoader> TrainingPipeline<L> {
    pub fn with_loader(options: CorpusOptions, loader: L) -> Self {
        Self { options, loader }
    }

    pub fn options(&self) -> &CorpusOptions {
        &self.options
    }

    /// Builds the training corpus for every image under `root`.
    pub fn prepare(&self, root: &Path) -> Result<TrainingCorpus> {
        let files = discover_images(root, &self.options)?;
        let mut builder = CorpusBuilder::new(&self.options.split);
        for path in &files {
            if let Some(contribution) = process_image(&self.loader, path, &self.options)? {
                builder.push(contribution);
            }
        }
        builder.finish()
    }
}

/// Builds the training corpus under `root_folder` with blocks of `spec`.
pub fn prepare_corpus(root_folder: impl AsRef<Path>, spec: &SplitSpec) -> Result<TrainingCorpus> {
    TrainingPipeline::new(CorpusOptions::new(*spec)).prepare(root_folder.as_ref())
}

/// Lists the image files under `root` in the order they will be stacked.
///
/// Files are sorted by path. Mask companions are left out when masking is
/// enabled. With a shuffle seed the sorted list is permuted deterministically.
pub fn discover_images(root: &Path, options: &CorpusOptions) -> Result<Vec<PathBuf>> {
    let structure = build_structure::<()>(root, false)?;
    let mut files: Vec<PathBuf> = flatten(structure)
        .into_keys()
        .filter(|path| match &options.mask {
            Some(mask) => !is_mask_file(path, &mask.suffix),
            None => true,
        })
        .collect();

    if let Some(seed) = options.shuffle_seed {
        files.shuffle(&mut StdRng::seed_from_u64(seed));
    }
    info!(root = %root.display(), files = files.len(), "discovered corpus files");
    Ok(files)
}

/// Reads `(id, name)` from the `<id>_<name>` folder that directly contains `path`.
pub fn parse_label(path: &Path) -> Result<(i32, String)> {
    let folder = path
        .parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            Error::PreconditionViolation(format!(
                "'{}' has no label folder",
                path.display()
            ))
        })?;

    let (id, name) = folder.split_once('_').ok_or_else(|| {
        Error::PreconditionViolation(format!(
            "label folder '{folder}' does not match '<id>_<name>'"
        ))
    })?;
    let id = id.parse::<i32>().map_err(|_| {
        Error::PreconditionViolation(format!(
            "label folder '{folder}' does not start with an integer id"
        ))
    })?;
    Ok((id, name.to_string()))
}

/// Path of the mask companion of `image` (`dir/stem<suffix>.ext`).
pub fn mask_path_for(image: &Path, suffix: &str) -> Option<PathBuf> {
    let stem = image.file_stem()?.to_str()?;
    let file_name = match image.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}{suffix}.{ext}"),
        None => format!("{stem}{suffix}"),
    };
    Some(image.with_file_name(file_name))
}

fn is_mask_file(path: &Path, suffix: &str) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.ends_with(suffix))
}

/// Loads, labels, tiles and flattens one image.
///
/// Returns `Ok(None)` when the image or its mask cannot be loaded. A strict mask
/// of the wrong colours is an error.
pub(crate) fn process_image<L: ImageLoader + ?Sized>(
    loader: &L,
    path: &Path,
    options: &CorpusOptions,
) -> Result<Option<ImageContribution>> {
    let image = match loader.load_grayscale(path) {
        Ok(image) => image,
        Err(Error::NotFound { path, reason }) => {
            warn!(path = %path.display(), %reason, "unable to load image, skipping");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    debug!(path = %path.display(), shape = ?image.shape(), "loaded image");
    let (label, label_name) = parse_label(path)?;

    let mask = match &options.mask {
        Some(mask_options) => match load_mask(loader, path, image.dim(), mask_options) {
            Ok(mask) => mask,
            Err(Error::NotFound { path: mask_path, reason }) => {
                warn!(
                    path = %path.display(),
                    mask = %mask_path.display(),
                    %reason,
                    "unable to load mask, skipping image"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        },
        None => None,
    };
    let rows = image_rows(image.view(), mask.as_ref().map(|m| m.view()), options)?;
    let blocks = rows.len() / options.split.sample_len(1);
    debug!(path = %path.display(), blocks, "retained blocks");

    Ok(Some(ImageContribution {
        path: path.to_path_buf(),
        label,
        label_name,
        rows,
        blocks,
    }))
}

fn load_mask<L: ImageLoader + ?Sized>(
    loader: &L,
    image_path: &Path,
    image_dim: (usize, usize),
    options: &MaskOptions,
) -> Result<Option<Array2<bool>>> {
    let Some(mask_path) = mask_path_for(image_path, &options.suffix) else {
        return Ok(None);
    };
    if !mask_path.is_file() {
        return Ok(None);
    }

    let mask_image = loader.load_color(&mask_path)?;
    let mask = decode(&mask_image, &options.color, options.mode)?;
    if mask.dim() != image_dim {
        return Err(Error::invalid(format!(
            "mask '{}' is {:?} but its image is {:?}",
            mask_path.display(),
            mask.dim(),
            image_dim
        )));
    }
    debug!(mask = %mask_path.display(), "applying mask");
    Ok(Some(mask))
}

/// Flattened full-size blocks of `image`, optionally filtered by `mask`.
fn image_rows(
    image: ArrayView2<'_, u8>,
    mask: Option<ArrayView2<'_, bool>>,
    options: &CorpusOptions,
) -> Result<Vec<f32>> {
    let spec = &options.split;
    let grid = split(&image, spec)?;
    let mut rows = Vec::new();

    match (mask, &options.mask) {
        (Some(mask), Some(mask_options)) => {
            let mask_grid = split(&mask, spec)?;
            for block in select_by_mask(grid.iter(), mask_grid.iter(), mask_options.rule) {
                let block = block?;
                if block.is_full(spec) {
                    rows.extend(block.flatten());
                }
            }
        }
        _ => {
            for block in grid.full_blocks() {
                rows.extend(block.flatten());
            }
        }
    }
    Ok(rows)
}

/// Accumulates image contributions into the stacked corpus.
pub(crate) struct CorpusBuilder {
    sample_len: usize,
    samples: Vec<f32>,
    labels: Vec<i32>,
    label_table: LabelTable,
    sources: Vec<SourceSummary>,
}

impl CorpusBuilder {
    pub fn new(spec: &SplitSpec) -> Self {
        Self {
            sample_len: spec.sample_len(1),
            samples: Vec::new(),
            labels: Vec::new(),
            label_table: LabelTable::new(),
            sources: Vec::new(),
        }
    }

    pub fn push(&mut self, contribution: ImageContribution) {
        self.label_table
            .entry(contribution.label)
            .or_insert(contribution.label_name);
        if contribution.blocks == 0 {
            return;
        }
        self.samples.extend(contribution.rows);
        self.labels
            .extend(std::iter::repeat_n(contribution.label, contribution.blocks));
        self.sources.push(SourceSummary {
            path: contribution.path,
            label: contribution.label,
            blocks: contribution.blocks,
        });
    }

    pub fn finish(self) -> Result<TrainingCorpus> {
        let rows = self.labels.len();
        let samples = Array2::from_shape_vec((rows, self.sample_len), self.samples)
            .map_err(|e| Error::invalid(e.to_string()))?;
        info!(
            rows,
            features = self.sample_len,
            labels = ?self.label_table,
            "training corpus assembled"
        );
        Ok(TrainingCorpus {
            samples,
            labels: Array1::from(self.labels),
            label_table: self.label_table,
            sources: self.sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn label_comes_from_parent_folder() {
        let (id, name) = parse_label(Path::new("/data/train/1_Grass/img.png")).unwrap();
        assert_eq!((id, name.as_str()), (1, "Grass"));

        let (id, name) = parse_label(Path::new("0_Not_Grass/img.png")).unwrap();
        assert_eq!((id, name.as_str()), (0, "Not_Grass"));
    }

    #[test]
    fn unconventional_folders_violate_the_precondition() {
        for path in ["/data/Grass/img.png", "/data/x_Grass/img.png", "img.png"] {
            assert!(
                matches!(parse_label(Path::new(path)), Err(Error::PreconditionViolation(_))),
                "{path}"
            );
        }
    }

    #[test]
    fn mask_companion_paths() {
        assert_eq!(
            mask_path_for(Path::new("/d/1_Grass/photo.png"), "_mask"),
            Some(PathBuf::from("/d/1_Grass/photo_mask.png"))
        );
        assert!(is_mask_file(Path::new("/d/photo_mask.png"), "_mask"));
        assert!(!is_mask_file(Path::new("/d/photo.png"), "_mask"));
    }

    /// Serves arrays from memory; unknown paths are `NotFound`.
    struct MemoryLoader {
        gray: HashMap<PathBuf, Array2<u8>>,
    }

    impl ImageLoader for MemoryLoader {
        fn load_grayscale(&self, path: &Path) -> Result<Array2<u8>> {
            self.gray.get(path).cloned().ok_or_else(|| Error::NotFound {
                path: path.to_path_buf(),
                reason: "not in memory".into(),
            })
        }

        fn load_color(&self, path: &Path) -> Result<ndarray::Array3<u8>> {
            Err(Error::NotFound {
                path: path.to_path_buf(),
                reason: "no colour images".into(),
            })
        }
    }

    #[test]
    fn process_image_keeps_only_full_blocks() {
        let path = PathBuf::from("/corpus/1_Grass/a.png");
        let loader = MemoryLoader {
            gray: HashMap::from([(path.clone(), Array2::from_elem((25, 32), 7u8))]),
        };
        let options = CorpusOptions::new(SplitSpec::square(10).unwrap());

        let contribution = process_image(&loader, &path, &options).unwrap().unwrap();
        assert_eq!(contribution.label, 1);
        assert_eq!(contribution.blocks, 6);
        assert_eq!(contribution.rows.len(), 600);
        assert!(contribution.rows.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn unloadable_images_are_skipped() {
        let loader = MemoryLoader { gray: HashMap::new() };
        let options = CorpusOptions::new(SplitSpec::square(10).unwrap());
        let skipped = process_image(&loader, Path::new("/corpus/0_NotGrass/gone.png"), &options).unwrap();
        assert!(skipped.is_none());
    }

    #[test]
    fn stray_files_outside_label_folders_are_skipped() {
        let loader = MemoryLoader { gray: HashMap::new() };
        let options = CorpusOptions::new(SplitSpec::square(10).unwrap());
        let skipped = process_image(&loader, Path::new("/corpus/README.txt"), &options).unwrap();
        assert!(skipped.is_none());
    }

    #[test]
    fn loadable_image_outside_label_folders_aborts() {
        let path = PathBuf::from("/corpus/Grass/a.png");
        let loader = MemoryLoader {
            gray: HashMap::from([(path.clone(), Array2::from_elem((10, 10), 1u8))]),
        };
        let options = CorpusOptions::new(SplitSpec::square(10).unwrap());
        assert!(matches!(
            process_image(&loader, &path, &options),
            Err(Error::PreconditionViolation(_))
        ));
    }

    #[test]
    fn builder_keeps_first_label_name_and_aligns_rows() {
        let spec = SplitSpec::square(2).unwrap();
        let mut builder = CorpusBuilder::new(&spec);
        builder.push(ImageContribution {
            path: "a".into(),
            label: 3,
            label_name: "First".into(),
            rows: vec![1.0; 8],
            blocks: 2,
        });
        builder.push(ImageContribution {
            path: "b".into(),
            label: 3,
            label_name: "Second".into(),
            rows: vec![],
            blocks: 0,
        });
        builder.push(ImageContribution {
            path: "c".into(),
            label: 5,
            label_name: "Other".into(),
            rows: vec![2.0; 4],
            blocks: 1,
        });

        let corpus = builder.finish().unwrap();
        assert_eq!(corpus.samples.dim(), (3, 4));
        assert_eq!(corpus.labels.to_vec(), vec![3, 3, 5]);
        assert_eq!(corpus.label_table[&3], "First");
        assert_eq!(corpus.sources.len(), 2);
        assert_eq!(corpus.samples.row(2).to_vec(), vec![2.0; 4]);
    }
}

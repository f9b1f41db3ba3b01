use ndarray::{Array2, Array3, s};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};
use tile_trainer::config::{MaskConfig, TrainerConfig};
use tile_trainer::core_modules::mask::MaskMode;
use tile_trainer::core_modules::utils::image_helper::{save_color, save_grayscale};
use tile_trainer::parallel_pipeline::ParallelTrainingPipeline;
use tile_trainer::pipeline::{CorpusOptions, TrainingPipeline, discover_images};
use tile_trainer::{Error, SplitSpec, prepare_corpus};

fn gray(path: &Path, height: usize, width: usize, value: u8) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    save_grayscale(path, &Array2::from_elem((height, width), value)).unwrap();
    path.to_path_buf()
}

/// Two label folders: three images of grass, two of something else.
fn grass_corpus() -> TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path();
    gray(&root.join("0_NotGrass/a.png"), 20, 20, 10);
    gray(&root.join("0_NotGrass/b.png"), 25, 31, 20);
    gray(&root.join("1_Grass/c.png"), 20, 20, 200);
    gray(&root.join("1_Grass/d.png"), 10, 10, 210);
    gray(&root.join("1_Grass/e.png"), 9, 40, 220);
    dir
}

#[test]
fn labels_and_rows_line_up() {
    let dir = grass_corpus();
    let corpus = prepare_corpus(dir.path(), &SplitSpec::square(10).unwrap()).unwrap();

    assert_eq!(corpus.label_table.get(&0).map(String::as_str), Some("NotGrass"));
    assert_eq!(corpus.label_table.get(&1).map(String::as_str), Some("Grass"));
    assert_eq!(corpus.label_table.len(), 2);

    // a: 4 blocks, b: 2x3 full blocks, c: 4, d: 1, e: none (too short)
    assert_eq!(corpus.len(), 4 + 6 + 4 + 1);
    assert_eq!(corpus.labels.len(), corpus.samples.nrows());
    assert_eq!(corpus.sample_len(), 100);

    let labels = corpus.labels.to_vec();
    assert_eq!(labels.iter().filter(|&&l| l == 0).count(), 10);
    assert_eq!(labels.iter().filter(|&&l| l == 1).count(), 5);

    // Sorted discovery stacks NotGrass before Grass, each row keeps its pixels.
    assert!(corpus.samples.row(0).iter().all(|&v| v == 10.0));
    assert!(corpus.samples.row(14).iter().all(|&v| v == 210.0));

    let sources: Vec<_> = corpus
        .sources
        .iter()
        .map(|s| (s.path.file_name().unwrap().to_str().unwrap().to_string(), s.blocks))
        .collect();
    assert_eq!(
        sources,
        vec![("a.png".into(), 4), ("b.png".into(), 6), ("c.png".into(), 4), ("d.png".into(), 1)]
    );
}

#[test]
fn unreadable_files_are_skipped() {
    let dir = grass_corpus();
    fs::write(dir.path().join("1_Grass/notes.txt"), "not an image").unwrap();
    fs::write(dir.path().join("1_Grass/broken.png"), [0x89, b'P', b'N', b'G']).unwrap();

    let corpus = prepare_corpus(dir.path(), &SplitSpec::square(10).unwrap()).unwrap();
    assert_eq!(corpus.len(), 15);
    assert_eq!(corpus.sources.len(), 4);
}

#[test]
fn stray_files_at_the_root_are_skipped() {
    let dir = grass_corpus();
    fs::write(dir.path().join("README.txt"), "training data, do not edit").unwrap();
    fs::write(dir.path().join(".DS_Store"), [0u8, 0, 0, 1]).unwrap();

    let corpus = prepare_corpus(dir.path(), &SplitSpec::square(10).unwrap()).unwrap();
    assert_eq!(corpus.len(), 15);
    assert_eq!(corpus.label_table.len(), 2);
}

#[test]
fn folder_without_label_aborts() {
    let dir = grass_corpus();
    gray(&dir.path().join("Grass/f.png"), 10, 10, 0);

    let result = prepare_corpus(dir.path(), &SplitSpec::square(10).unwrap());
    assert!(matches!(result, Err(Error::PreconditionViolation(_))));
}

#[test]
fn empty_root_gives_an_empty_corpus() {
    let dir = tempdir().unwrap();
    let corpus = prepare_corpus(dir.path(), &SplitSpec::square(10).unwrap()).unwrap();
    assert!(corpus.is_empty());
    assert_eq!(corpus.samples.dim(), (0, 100));
    assert!(corpus.label_table.is_empty());
}

#[test]
fn mask_keeps_only_the_marked_blocks() {
    let dir = tempdir().unwrap();
    let image = gray(&dir.path().join("1_Grass/top_left.png"), 20, 20, 128);

    let mut mask = Array3::<u8>::zeros((20, 20, 3));
    mask.slice_mut(s![..10, ..10, 1]).fill(255);
    save_color(&image.with_file_name("top_left_mask.png"), &mask).unwrap();

    let config = TrainerConfig {
        mask: Some(MaskConfig::default()),
        ..TrainerConfig::default()
    };
    let mut options = config.corpus_options().unwrap();
    options.split = SplitSpec::square(10).unwrap();

    let files = discover_images(dir.path(), &options).unwrap();
    assert_eq!(files, vec![image.clone()]);

    let corpus = TrainingPipeline::new(options.clone()).prepare(dir.path()).unwrap();
    assert_eq!(corpus.len(), 1);
    assert_eq!(corpus.labels.to_vec(), vec![1]);

    // Stride 8: the right and lower neighbours see 20% of the corner, the
    // diagonal one only 4%.
    options.split = SplitSpec::new(10, 10, 2, 2).unwrap();
    let corpus = TrainingPipeline::new(options.clone()).prepare(dir.path()).unwrap();
    assert_eq!(corpus.len(), 3);

    options.mask.as_mut().unwrap().rule.invert = true;
    options.split = SplitSpec::square(10).unwrap();
    let corpus = TrainingPipeline::new(options).prepare(dir.path()).unwrap();
    assert_eq!(corpus.len(), 3);
}

fn masked_options(mode: MaskMode) -> CorpusOptions {
    let config = TrainerConfig {
        mask: Some(MaskConfig { mode, ..MaskConfig::default() }),
        ..TrainerConfig::default()
    };
    let mut options = config.corpus_options().unwrap();
    options.split = SplitSpec::square(10).unwrap();
    options
}

#[test]
fn corrupt_mask_skips_only_its_image() {
    let dir = tempdir().unwrap();
    let broken = gray(&dir.path().join("1_Grass/a.png"), 20, 20, 50);
    fs::write(broken.with_file_name("a_mask.png"), b"\x89PNG\r\n").unwrap();
    gray(&dir.path().join("1_Grass/b.png"), 20, 20, 60);
    gray(&dir.path().join("0_NotGrass/c.png"), 10, 20, 70);

    let corpus = TrainingPipeline::new(masked_options(MaskMode::Lenient))
        .prepare(dir.path())
        .unwrap();
    let names: Vec<_> = corpus
        .sources
        .iter()
        .map(|s| s.path.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["c.png", "b.png"]);
    assert_eq!(corpus.len(), 2 + 4);
}

#[test]
fn strict_mask_with_a_second_colour_aborts() {
    let dir = tempdir().unwrap();
    let image = gray(&dir.path().join("1_Grass/a.png"), 20, 20, 50);
    let mut mask = Array3::<u8>::zeros((20, 20, 3));
    mask.slice_mut(s![.., .., 1]).fill(255);
    save_color(&image.with_file_name("a_mask.png"), &mask).unwrap();
    gray(&dir.path().join("1_Grass/b.png"), 20, 20, 60);

    // a mask that is entirely the reference colour passes strict decoding
    let corpus = TrainingPipeline::new(masked_options(MaskMode::Strict))
        .prepare(dir.path())
        .unwrap();
    assert_eq!(corpus.len(), 8);

    mask[[19, 0, 1]] = 0;
    save_color(&image.with_file_name("a_mask.png"), &mask).unwrap();
    let result = TrainingPipeline::new(masked_options(MaskMode::Strict)).prepare(dir.path());
    assert!(matches!(
        result,
        Err(Error::InconsistentMask { row: 19, col: 0, .. })
    ));

    let corpus = TrainingPipeline::new(masked_options(MaskMode::Lenient))
        .prepare(dir.path())
        .unwrap();
    assert_eq!(corpus.len(), 8);
}

#[test]
fn seeded_shuffle_is_reproducible() {
    let dir = grass_corpus();
    let mut options = CorpusOptions::new(SplitSpec::square(10).unwrap());
    let sorted = discover_images(dir.path(), &options).unwrap();

    options.shuffle_seed = Some(42);
    let first = discover_images(dir.path(), &options).unwrap();
    let second = discover_images(dir.path(), &options).unwrap();
    assert_eq!(first, second);

    let mut resorted = first.clone();
    resorted.sort();
    assert_eq!(resorted, sorted);
}

#[tokio::test]
async fn concurrent_assembly_matches_sequential() {
    let dir = grass_corpus();
    let options = CorpusOptions {
        shuffle_seed: Some(7),
        ..CorpusOptions::new(SplitSpec::new(10, 10, 3, 1).unwrap())
    };

    let sequential = TrainingPipeline::new(options.clone()).prepare(dir.path()).unwrap();
    let concurrent = ParallelTrainingPipeline::new(options)
        .with_workers(3)
        .prepare(dir.path())
        .await
        .unwrap();

    assert_eq!(concurrent.samples, sequential.samples);
    assert_eq!(concurrent.labels, sequential.labels);
    assert_eq!(concurrent.label_table, sequential.label_table);
    assert_eq!(concurrent.sources, sequential.sources);
}

#[tokio::test]
async fn concurrent_assembly_reports_bad_folders() {
    let dir = grass_corpus();
    gray(&dir.path().join("misc/f.png"), 10, 10, 0);

    let result = ParallelTrainingPipeline::new(CorpusOptions::new(SplitSpec::square(10).unwrap()))
        .prepare(dir.path())
        .await;
    assert!(matches!(result, Err(Error::PreconditionViolation(_))));
}

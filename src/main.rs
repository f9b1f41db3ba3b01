// Thin driver over the `tile_trainer` library: inspect how an image tiles, check
// a mask against an image, or assemble a training corpus and report on it.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tile_trainer::config::{MaskConfig, TrainerConfig};
use tile_trainer::core_modules::mask::{MaskMode, coverage_percent, decode};
use tile_trainer::core_modules::selector::{SelectionRule, select_by_mask};
use tile_trainer::core_modules::split_spec::RawSplitSpec;
use tile_trainer::core_modules::tiling::{count_blocks, split};
use tile_trainer::core_modules::utils::image_helper::{FileImageLoader, ImageLoader};
use tile_trainer::parallel_pipeline::ParallelTrainingPipeline;
use tile_trainer::pipeline::{TrainingCorpus, TrainingPipeline};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "tile_trainer")]
#[command(version, about = "Block tiling and training-matrix assembly for image classifiers", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log every block and selection decision
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct SplitArgs {
    /// Block width in pixels
    #[arg(long, value_name = "PX")]
    block_width: Option<usize>,

    /// Block height in pixels
    #[arg(long, value_name = "PX")]
    block_height: Option<usize>,

    /// Pixels shared by horizontally adjacent blocks
    #[arg(long, value_name = "PX")]
    overlap_horizontal: Option<usize>,

    /// Pixels shared by vertically adjacent blocks
    #[arg(long, value_name = "PX")]
    overlap_vertical: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Split an image into blocks and verify it reassembles
    Split {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        #[command(flatten)]
        split: SplitArgs,
    },
    /// Decode a colour-coded mask and optionally select blocks of an image with it
    Mask {
        #[arg(value_name = "MASK")]
        mask: PathBuf,

        /// Image whose blocks are selected by the mask
        #[arg(short, long, value_name = "IMAGE")]
        image: Option<PathBuf>,

        /// Reference colour (#rrggbb)
        #[arg(long, value_name = "HEX")]
        color: Option<String>,

        /// Fail on any pixel that is not the reference colour
        #[arg(long)]
        strict: bool,

        /// Select blocks where the mask is NOT set
        #[arg(long)]
        invert: bool,

        /// Minimum percentage of allowed pixels per block
        #[arg(long, value_name = "PERCENT")]
        threshold: Option<u32>,

        #[command(flatten)]
        split: SplitArgs,
    },
    /// Assemble the training corpus under a labelled folder
    Corpus {
        /// Folder holding `<id>_<name>` label folders
        #[arg(value_name = "ROOT")]
        root: PathBuf,

        /// Shuffle files with this seed before tiling
        #[arg(long, value_name = "SEED")]
        seed: Option<u64>,

        /// Load and tile images on worker threads
        #[arg(long)]
        concurrent: bool,

        /// Worker cap for --concurrent
        #[arg(short = 'j', long, value_name = "N")]
        workers: Option<usize>,

        /// Filter blocks with `<stem>_mask` companion images
        #[arg(long)]
        masked: bool,

        #[command(flatten)]
        split: SplitArgs,
    },
}

fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("installing log subscriber")?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TrainerConfig> {
    match path {
        Some(path) => TrainerConfig::from_path(path)
            .with_context(|| format!("reading configuration {}", path.display())),
        None => Ok(TrainerConfig::default()),
    }
}

/// Command-line split flags take precedence over the configuration file.
fn apply_split_overrides(config: &mut TrainerConfig, args: &SplitArgs) {
    let base = config.split.unwrap_or(RawSplitSpec {
        block_width: 0,
        block_height: 0,
        overlap_horizontal: 0,
        overlap_vertical: 0,
    });
    let any_override = args.block_width.is_some()
        || args.block_height.is_some()
        || args.overlap_horizontal.is_some()
        || args.overlap_vertical.is_some();
    if !any_override {
        return;
    }
    config.split = Some(RawSplitSpec {
        block_width: args.block_width.unwrap_or(base.block_width),
        block_height: args.block_height.unwrap_or(base.block_height),
        overlap_horizontal: args.overlap_horizontal.unwrap_or(base.overlap_horizontal),
        overlap_vertical: args.overlap_vertical.unwrap_or(base.overlap_vertical),
    });
}

fn run_split(config: &TrainerConfig, image_path: &Path) -> anyhow::Result<()> {
    let spec = config.split_spec()?;
    let image = FileImageLoader.load_color(image_path)?;
    let (height, width, _) = image.dim();

    let grid = split(&image, &spec)?;
    let full = grid.full_blocks().count();
    let restored = grid.reassemble(0)? == image;
    info!(
        image = %image_path.display(),
        height,
        width,
        rows = grid.row_count(),
        cols = grid.col_count(),
        blocks = grid.len(),
        expected = count_blocks(height, width, &spec),
        full_blocks = full,
        restored,
        "split image"
    );
    anyhow::ensure!(restored, "joined blocks differ from {}", image_path.display());
    Ok(())
}

fn run_mask(
    config: &TrainerConfig,
    mask_path: &Path,
    image_path: Option<&Path>,
    mask: &MaskConfig,
) -> anyhow::Result<()> {
    let loader = FileImageLoader;
    let mask_image = loader.load_color(mask_path)?;
    let binary = decode(&mask_image, &mask.color, mask.mode)?;
    info!(
        mask = %mask_path.display(),
        color = %mask.color,
        coverage_percent = coverage_percent(binary.view()),
        "decoded mask"
    );

    let Some(image_path) = image_path else {
        return Ok(());
    };
    let spec = config.split_spec()?;
    let image = loader.load_color(image_path)?;
    let image_grid = split(&image, &spec)?;
    let mask_grid = split(&binary, &spec)?;
    let rule = SelectionRule {
        invert: mask.invert,
        threshold_percent: mask.threshold_percent,
    };

    let mut selected = Vec::new();
    for block in select_by_mask(image_grid.iter(), mask_grid.iter(), rule) {
        let block = block?;
        selected.push((block.row, block.col));
    }
    info!(
        image = %image_path.display(),
        blocks = image_grid.len(),
        selected = selected.len(),
        "selected blocks"
    );
    for (row, col) in selected {
        println!("{row},{col}");
    }
    Ok(())
}

fn report(corpus: &TrainingCorpus) {
    for source in &corpus.sources {
        println!("{}\t{}\t{}", source.path.display(), source.label, source.blocks);
    }
    for (id, name) in &corpus.label_table {
        println!("label {id}: {name}");
    }
    println!(
        "{} samples x {} features",
        corpus.samples.nrows(),
        corpus.sample_len()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Split { image, split } => {
            apply_split_overrides(&mut config, &split);
            run_split(&config, &image)
        }
        Commands::Mask {
            mask,
            image,
            color,
            strict,
            invert,
            threshold,
            split,
        } => {
            apply_split_overrides(&mut config, &split);
            let mut mask_config = config.mask.clone().unwrap_or_default();
            if let Some(color) = color {
                mask_config.color = color;
            }
            if strict {
                mask_config.mode = MaskMode::Strict;
            }
            mask_config.invert |= invert;
            if let Some(threshold) = threshold {
                mask_config.threshold_percent = threshold;
            }
            run_mask(&config, &mask, image.as_deref(), &mask_config)
        }
        Commands::Corpus {
            root,
            seed,
            concurrent,
            workers,
            masked,
            split,
        } => {
            apply_split_overrides(&mut config, &split);
            if seed.is_some() {
                config.shuffle_seed = seed;
            }
            if masked && config.mask.is_none() {
                config.mask = Some(MaskConfig::default());
            }
            let options = config.corpus_options()?;

            let corpus = if concurrent || config.concurrent {
                let mut pipeline = ParallelTrainingPipeline::new(options);
                if let Some(workers) = workers.or(config.workers) {
                    pipeline = pipeline.with_workers(workers);
                }
                pipeline.prepare(&root).await?
            } else {
                TrainingPipeline::new(options).prepare(&root)?
            };
            report(&corpus);
            Ok(())
        }
    }
}

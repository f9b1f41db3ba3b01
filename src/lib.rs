// THEORY:
// This file is the entry point of the `tile_trainer` library crate. It exposes
// the tiling engine, the mask codec and the block selector under `core_modules`,
// and the training assemblers (`pipeline`, `parallel_pipeline`) built on top of
// them. The driver binary in `main.rs` is a thin consumer of this API.
//
// Layering, leaf-first:
// 1.  `core_modules::split_spec` / `block` / `tiling`: cut arrays into block views
//     and put them back together.
// 2.  `core_modules::mask` / `selector`: decode colour-coded masks and keep the
//     blocks a mask marks as relevant.
// 3.  `core_modules::corpus`: mirror a labelled folder tree.
// 4.  `pipeline` / `parallel_pipeline`: stack retained blocks into a labelled
//     training matrix and hand it to a `classifier::Classifier`.

pub mod classifier;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::block::Block;
pub use core_modules::split_spec::SplitSpec;
pub use core_modules::tiling::{BlockGrid, iterate, join, split};
pub use error::{Error, Result};
pub use pipeline::{TrainingCorpus, prepare_corpus};

// THEORY:
// Every image in a corpus is labelled, loaded and tiled independently of the
// others, so that work is farmed out to tokio's blocking pool. The results are
// consumed through an ordered `futures` stream: at most `workers` images are in
// flight, but they are stacked strictly in discovery order. The corpus produced
// here is therefore identical, row for row, to the one `TrainingPipeline` builds.

use crate::core_modules::utils::image_helper::{FileImageLoader, ImageLoader};
use crate::error::{Error, Result};
use crate::pipeline::{CorpusBuilder, CorpusOptions, TrainingCorpus, discover_images, process_image};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Corpus assembler that loads and tiles images on worker threads.
pub struct ParallelTrainingPipeline {
    options: Arc<CorpusOptions>,
    loader: Arc<dyn ImageLoader>,
    workers: usize,
}

impl ParallelTrainingPipeline {
    pub fn new(options: CorpusOptions) -> Self {
        Self::with_loader(options, Arc::new(FileImageLoader))
    }

    pub fn with_loader(options: CorpusOptions, loader: Arc<dyn ImageLoader>) -> Self {
        Self {
            options: Arc::new(options),
            loader,
            workers: num_cpus::get(),
        }
    }

    /// Caps the number of images processed at once (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Builds the training corpus for every image under `root`.
    pub async fn prepare(&self, root: &Path) -> Result<TrainingCorpus> {
        let files = {
            let root = root.to_path_buf();
            let options = Arc::clone(&self.options);
            tokio::task::spawn_blocking(move || discover_images(&root, &options))
                .await
                .map_err(|e| Error::Worker(e.to_string()))??
        };
        info!(files = files.len(), workers = self.workers, "tiling corpus concurrently");

        let mut results = stream::iter(files)
            .map(|path: PathBuf| {
                let loader = Arc::clone(&self.loader);
                let options = Arc::clone(&self.options);
                tokio::task::spawn_blocking(move || process_image(loader.as_ref(), &path, &options))
            })
            .buffered(self.workers);

        let mut builder = CorpusBuilder::new(&self.options.split);
        while let Some(joined) = results.next().await {
            let contribution = joined.map_err(|e| Error::Worker(e.to_string()))??;
            if let Some(contribution) = contribution {
                builder.push(contribution);
            }
        }
        builder.finish()
    }
}

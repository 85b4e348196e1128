use burn::tensor::backend::AutodiffBackend;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::*;

/// A single render request
pub struct RenderJob<'a> {
    /// Identifies the job towards the sink, eg. a file stem or request id
    pub id: String,
    /// Falls back to the configured default content image when `None`
    pub content: Option<ImageSource<'a>>,
    /// Falls back to the configured default style image when `None`
    pub style: Option<ImageSource<'a>>,
    pub weights: LossWeights,
}

impl<'a> RenderJob<'a> {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            content: None,
            style: None,
            weights: LossWeights::default(),
        }
    }

    pub fn content<I: Into<ImageSource<'a>>>(mut self, img: I) -> Self {
        self.content = Some(img.into());
        self
    }

    pub fn style<I: Into<ImageSource<'a>>>(mut self, img: I) -> Self {
        self.style = Some(img.into());
        self
    }

    pub fn weights(mut self, weights: LossWeights) -> Self {
        self.weights = weights;
        self
    }
}

/// Receives finished renders. The renderer knows nothing about where they
/// end up, that is entirely up to the sink.
pub trait RenderSink: Sync {
    fn deliver(&self, job_id: &str, image: RenderedImage) -> Result<(), Error>;
}

/// Saves every render as `<dir>/<job id>.png`
#[derive(Clone, Debug)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_owned(),
        }
    }

    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.png", job_id))
    }
}

impl RenderSink for DirectorySink {
    fn deliver(&self, job_id: &str, image: RenderedImage) -> Result<(), Error> {
        image.save(self.path_for(job_id))
    }
}

/// Runs independent renders in parallel with an upper bound on how many are
/// in flight at once.
///
/// All workers share the same frozen network, every render otherwise owns
/// its canvas and optimizer state.
pub struct RenderPool<B: AutodiffBackend> {
    extractor: FeatureExtractor<B>,
    config: RenderConfig,
    max_concurrent: usize,
}

impl<B: AutodiffBackend> RenderPool<B> {
    /// Creates a pool that renders with `config`. The concurrency cap is
    /// `config.max_concurrent_renders`, or the number of logical cores if
    /// that is not set.
    pub fn new(extractor: FeatureExtractor<B>, config: RenderConfig) -> Result<Self, Error> {
        config.validate()?;

        let max_concurrent = config
            .max_concurrent_renders
            .unwrap_or_else(num_cpus::get)
            .max(1);

        Ok(Self {
            extractor,
            config,
            max_concurrent,
        })
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Renders every job and hands the results to `sink`.
    ///
    /// Returns one result per job, in the order the jobs were given. A failed
    /// job never affects any other job.
    pub fn run<S: RenderSink>(&self, jobs: Vec<RenderJob<'_>>, sink: &S) -> Vec<Result<(), Error>> {
        let ids: Vec<String> = jobs.iter().map(|job| job.id.clone()).collect();
        let job_count = jobs.len();
        if job_count == 0 {
            return Vec::new();
        }

        let jobs: Vec<_> = jobs.into_iter().map(|job| Mutex::new(Some(job))).collect();
        let results: Vec<Mutex<Option<Result<(), Error>>>> =
            (0..job_count).map(|_| Mutex::new(None)).collect();
        let next_job = AtomicUsize::new(0);

        let worker_count = self.max_concurrent.min(job_count);
        tracing::info!(jobs = job_count, workers = worker_count, "starting render pool");

        let scoped = crossbeam_utils::thread::scope(|s| {
            let mut handles = Vec::with_capacity(worker_count);

            for _ in 0..worker_count {
                // modules are Send but not Sync, each worker gets its own handle
                let extractor = self.extractor.clone();
                let config = &self.config;
                let (jobs, results, next_job) = (&jobs, &results, &next_job);

                handles.push(s.spawn(move |_| loop {
                    let index = next_job.fetch_add(1, Ordering::Relaxed);
                    if index >= job_count {
                        break;
                    }

                    let job = jobs[index]
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();

                    if let Some(job) = job {
                        let id = job.id.clone();
                        // a panic stays inside its job, the worker moves on to the next one
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            render_job(config, &extractor, job, sink)
                        }))
                        .unwrap_or_else(|_| {
                            tracing::error!(job = %id, "render panicked");
                            Err(Error::WorkerPanicked(id))
                        });
                        *results[index]
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = Some(result);
                    }
                }));
            }

            for handle in handles {
                if handle.join().is_err() {
                    tracing::error!("render worker panicked");
                }
            }
        });

        if scoped.is_err() {
            tracing::error!("render pool scope panicked");
        }

        results
            .into_iter()
            .zip(ids)
            .map(|(slot, id)| {
                slot.into_inner()
                    .unwrap_or_else(PoisonError::into_inner)
                    .unwrap_or(Err(Error::WorkerPanicked(id)))
            })
            .collect()
    }
}

#[tracing::instrument(skip_all, fields(job = %job.id))]
fn render_job<B: AutodiffBackend, S: RenderSink>(
    config: &RenderConfig,
    extractor: &FeatureExtractor<B>,
    job: RenderJob<'_>,
    sink: &S,
) -> Result<(), Error> {
    let mut builder = SessionBuilder::from_config(config).weights(job.weights);
    if let Some(content) = job.content {
        builder = builder.content(content);
    }
    if let Some(style) = job.style {
        builder = builder.style(style);
    }

    let result = builder
        .build(extractor)
        .and_then(|session| session.run(None))
        .and_then(|image| sink.deliver(&job.id, image));

    match &result {
        Ok(()) => tracing::info!("delivered render"),
        Err(err) if err.is_input_error() => tracing::warn!(error = %err, "rejected render"),
        Err(err) => tracing::error!(error = %err, "render failed"),
    }

    result
}

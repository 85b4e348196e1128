use burn::tensor::{backend::AutodiffBackend, Tensor};
use std::path::{Path, PathBuf};

use crate::codec::{self, ImageCodec};
use crate::config::check_render_params;
use crate::loss::{LossReport, Targets};
use crate::render::OptimizationLoop;
use crate::*;

/// Size of the square kernel used when eroding the content image
const ERODE_KERNEL: u32 = 5;

/// Style transfer session.
///
/// Holds the encoded content image, the precomputed style and content
/// targets, and every parameter of one render. Calling `run()` optimizes a
/// copy of the content image and returns the result, consuming the session
/// in the process. You can provide a `RenderProgress` implementation to get
/// an update with the current canvas at the end of every epoch.
///
/// # Example
/// ```no_run
/// use neural_style as ns;
///
/// let config = ns::RenderConfig::from_json_file("render.json")?;
/// let extractor = ns::FeatureExtractor::<ns::DefaultBackend>::load(
///     &config.extractor,
///     &Default::default(),
/// )?;
///
/// let session = ns::Session::builder()
///     .content(&"imgs/modern.png")
///     .style(&"imgs/historical.png")
///     .weights(ns::LossWeights::new(150.0, 0.01, 30.0))
///     .build(&extractor)?;
///
/// let rendered = session.run(None)?;
/// rendered.save("out/rendered.png")?;
/// # Ok::<(), ns::Error>(())
/// ```
pub struct Session<B: AutodiffBackend> {
    extractor: FeatureExtractor<B>,
    canvas: Tensor<B::InnerBackend, 4>,
    targets: Targets<B>,
    weights: LossWeights,
    params: Parameters,
}

impl Session<DefaultBackend> {
    /// Creates a new session builder with default parameters. Sessions on
    /// other backends start from `SessionBuilder::new()`.
    pub fn builder<'a>() -> SessionBuilder<'a> {
        SessionBuilder::default()
    }
}

impl<B: AutodiffBackend> Session<B> {
    /// Size of the image that will be rendered
    pub fn output_size(&self) -> Dims {
        let [_, _, height, width] = self.canvas.dims();
        Dims::new(width as u32, height as u32)
    }

    pub fn weights(&self) -> LossWeights {
        self.weights
    }

    /// Runs both optimization phases and outputs the rendered image.
    #[tracing::instrument(skip_all, fields(size = ?self.output_size()))]
    pub fn run(self, progress: Option<Box<dyn RenderProgress>>) -> Result<RenderedImage, Error> {
        let optimization = OptimizationLoop {
            extractor: &self.extractor,
            targets: &self.targets,
            weights: self.weights,
            schedule: self.params.schedule,
            optimizer: self.params.optimizer,
        };

        let canvas = optimization.run(self.canvas.clone(), progress)?;
        let image = codec::tensor_to_rgb(canvas)?;

        tracing::info!("render finished");

        Ok(RenderedImage { image })
    }
}

#[derive(Clone, Debug)]
struct Parameters {
    max_dimension: u32,
    schedule: Schedule,
    optimizer: AdamConfig,
    weight_ranges: WeightRanges,
    default_content: Option<PathBuf>,
    default_style: Option<PathBuf>,
    erode_content: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self::from(&RenderConfig::default())
    }
}

impl From<&RenderConfig> for Parameters {
    fn from(config: &RenderConfig) -> Self {
        Self {
            max_dimension: config.max_dimension,
            schedule: config.schedule,
            optimizer: config.optimizer,
            weight_ranges: config.weight_ranges,
            default_content: config.default_content.clone(),
            default_style: config.default_style.clone(),
            erode_content: config.erode_content,
        }
    }
}

/// Builds a session by setting parameters and adding input images, calling
/// `build` will check all of the provided inputs and compute the targets the
/// render optimizes towards
#[derive(Default)]
pub struct SessionBuilder<'a> {
    content: Option<ImageSource<'a>>,
    style: Option<ImageSource<'a>>,
    weights: LossWeights,
    params: Parameters,
}

impl<'a> SessionBuilder<'a> {
    /// Creates a new `SessionBuilder`, can also be created via
    /// `Session::builder()`
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder with every parameter taken from `config`
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            params: Parameters::from(config),
            ..Self::default()
        }
    }

    /// The image whose layout is preserved. The render starts from it.
    ///
    /// If omitted, the configured default content image is used.
    pub fn content<I: Into<ImageSource<'a>>>(mut self, img: I) -> Self {
        self.content = Some(img.into());
        self
    }

    /// The image whose texture and colors are transferred.
    ///
    /// If omitted, the configured default style image is used.
    pub fn style<I: Into<ImageSource<'a>>>(mut self, img: I) -> Self {
        self.style = Some(img.into());
        self
    }

    /// Sets all three loss weights at once.
    ///
    /// Default: content 1e4, style 1e-2, total variation 30
    pub fn weights(mut self, weights: LossWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn content_weight(mut self, value: f32) -> Self {
        self.weights.content = value;
        self
    }

    pub fn style_weight(mut self, value: f32) -> Self {
        self.weights.style = value;
        self
    }

    pub fn total_variation_weight(mut self, value: f32) -> Self {
        self.weights.total_variation = value;
        self
    }

    /// The accepted range of each weight, checked by `build`.
    ///
    /// Default: content 10-100000, style 0.01, total variation 30
    pub fn weight_ranges(mut self, ranges: WeightRanges) -> Self {
        self.params.weight_ranges = ranges;
        self
    }

    /// The longer side of both images is scaled to this many pixels.
    ///
    /// Larger images keep more detail, but every step gets slower.
    ///
    /// Default: 512
    pub fn max_dimension(mut self, value: u32) -> Self {
        self.params.max_dimension = value;
        self
    }

    /// Replaces the whole iteration budget.
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.params.schedule = schedule;
        self
    }

    /// Epochs run with content and style loss only.
    ///
    /// Default: 10
    pub fn epochs_without_variation(mut self, epochs: usize) -> Self {
        self.params.schedule.epochs_without_variation = epochs;
        self
    }

    /// Epochs run with the total variation term added, after the epochs
    /// without it.
    ///
    /// Default: 10
    pub fn epochs_with_variation(mut self, epochs: usize) -> Self {
        self.params.schedule.epochs_with_variation = epochs;
        self
    }

    /// Default: 100
    pub fn steps_per_epoch(mut self, steps: usize) -> Self {
        self.params.schedule.steps_per_epoch = steps;
        self
    }

    /// Replaces all optimizer settings.
    pub fn optimizer(mut self, optimizer: AdamConfig) -> Self {
        self.params.optimizer = optimizer;
        self
    }

    /// Default: 0.02
    pub fn learning_rate(mut self, value: f32) -> Self {
        self.params.optimizer.learning_rate = value;
        self
    }

    /// Content image used when none is provided
    pub fn default_content<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.params.default_content = Some(path.as_ref().to_owned());
        self
    }

    /// Style image used when none is provided
    pub fn default_style<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.params.default_style = Some(path.as_ref().to_owned());
        self
    }

    /// Erodes the content image with a 5x5 kernel before rendering, which
    /// thickens dark strokes.
    ///
    /// Default: false
    pub fn erode_content(mut self, erode: bool) -> Self {
        self.params.erode_content = erode;
        self
    }

    /// Creates a `Session`, or returns an error if invalid parameters or input
    /// images were specified.
    ///
    /// This runs the extractor once over each input image.
    pub fn build<B: AutodiffBackend>(
        self,
        extractor: &FeatureExtractor<B>,
    ) -> Result<Session<B>, Error> {
        self.check_parameters_validity()?;

        let content = resolve_image(
            self.content,
            self.params.default_content.as_deref(),
            "content",
        )?;
        let style = resolve_image(self.style, self.params.default_style.as_deref(), "style")?;

        let content = if self.params.erode_content {
            utils::erode(&content, ERODE_KERNEL)
        } else {
            content
        };

        let codec = ImageCodec::new(self.params.max_dimension);
        let device = extractor.device();

        let canvas = codec
            .encode::<B::InnerBackend>(&content, device)
            .map_err(|err| Error::decode("content", err))?;
        let style = codec
            .encode::<B>(&style, device)
            .map_err(|err| Error::decode("style", err))?;

        let targets = Targets::new(extractor, style, Tensor::from_inner(canvas.clone()));

        Ok(Session {
            extractor: extractor.clone(),
            canvas,
            targets,
            weights: self.weights,
            params: self.params,
        })
    }

    fn check_parameters_validity(&self) -> Result<(), Error> {
        self.params.weight_ranges.validate(&self.weights)?;

        check_render_params(
            self.params.max_dimension,
            &self.params.schedule,
            &self.params.optimizer,
        )
    }
}

fn resolve_image(
    src: Option<ImageSource<'_>>,
    default: Option<&Path>,
    which: &'static str,
) -> Result<image::RgbImage, Error> {
    let src = match (src, default) {
        (Some(src), _) => src,
        (None, Some(path)) => {
            tracing::debug!(path = %path.display(), "using default {} image", which);
            ImageSource::Path(path)
        }
        (None, None) => return Err(Error::MissingImage(which)),
    };

    utils::load_rgb_image(src).map_err(|err| Error::decode(which, err))
}

/// Helper struct for passing progress information to external callers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProgressStat {
    /// The current amount of work that has been done
    pub current: usize,
    /// The total amount of work to do
    pub total: usize,
}

/// The state of the render at the end of an epoch
pub struct ProgressUpdate<'a> {
    /// The current canvas
    pub image: &'a image::RgbImage,
    /// The phase the epoch ran in
    pub phase: Phase,
    /// Completed epochs in `phase`, including this one
    pub epoch: usize,
    /// Losses averaged over the epoch's steps
    pub losses: LossReport,
    /// Steps completed over the whole render
    pub total: ProgressStat,
    /// Steps completed in the current phase
    pub phase_progress: ProgressStat,
}

/// Allows the renderer to update external callers with the current
/// progress of the render
pub trait RenderProgress {
    fn update(&mut self, info: ProgressUpdate<'_>);
}

impl<G> RenderProgress for G
where
    G: FnMut(ProgressUpdate<'_>) + Send,
{
    fn update(&mut self, info: ProgressUpdate<'_>) {
        self(info)
    }
}

use crate::{errors::InvalidRange, Error};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How images in [0,1] are rescaled into the range the pretrained network
/// was trained on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputNormalization {
    /// Scale to [0,255], swap to BGR and subtract the ImageNet channel means.
    /// This is what Keras/Caffe trained VGG weights expect.
    Caffe,
    /// Subtract the ImageNet RGB means and divide by the standard deviations,
    /// on [0,1] input. This is what torchvision trained VGG weights expect.
    Torch,
}

impl Default for InputNormalization {
    fn default() -> Self {
        Self::Caffe
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Layers whose gram matrices define the style, shallow to deep
    pub style_layers: Vec<String>,
    /// Layers whose activations define the content
    pub content_layers: Vec<String>,
    /// Path to the pretrained VGG19 record
    pub weights_path: Option<PathBuf>,
    pub normalization: InputNormalization,
    /// Channel width of the first block, doubled per block up to 8x.
    /// Must match the weights being loaded.
    pub base_channels: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            style_layers: [
                "block1_conv1",
                "block2_conv1",
                "block3_conv1",
                "block4_conv1",
                "block5_conv1",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            content_layers: vec!["block4_conv2".to_owned()],
            weights_path: None,
            normalization: InputNormalization::Caffe,
            base_channels: 64,
        }
    }
}

/// The fixed iteration budget of the two optimization phases.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    /// Epochs run with content and style loss only
    pub epochs_without_variation: usize,
    /// Epochs run with the total variation term added
    pub epochs_with_variation: usize,
    pub steps_per_epoch: usize,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            epochs_without_variation: 10,
            epochs_with_variation: 10,
            steps_per_epoch: 100,
        }
    }
}

impl Schedule {
    pub fn total_steps(&self) -> usize {
        (self.epochs_without_variation + self.epochs_with_variation) * self.steps_per_epoch
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta_1: f32,
    pub beta_2: f32,
    pub epsilon: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.02,
            beta_1: 0.99,
            beta_2: 0.999,
            epsilon: 0.1,
        }
    }
}

/// The three loss weights of a single render.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub content: f32,
    pub style: f32,
    pub total_variation: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            content: 1e4,
            style: 1e-2,
            total_variation: 30.0,
        }
    }
}

impl LossWeights {
    pub fn new(content: f32, style: f32, total_variation: f32) -> Self {
        Self {
            content,
            style,
            total_variation,
        }
    }

    /// All weights zero, which turns every step into a no-op
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    fn named(&self) -> [(&'static str, f32); 3] {
        [
            ("content-weight", self.content),
            ("style-weight", self.style),
            ("total-variation-weight", self.total_variation),
        ]
    }
}

/// Inclusive `[min, max]` bound for a single weight
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightRange {
    pub min: f32,
    pub max: f32,
}

impl WeightRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Any non-negative weight
    pub fn non_negative() -> Self {
        Self::new(0.0, f32::MAX)
    }

    fn check(self, name: &'static str, value: f32) -> Result<(), Error> {
        if !value.is_finite() || value < self.min || value > self.max {
            return Err(Error::InvalidRange(InvalidRange {
                min: self.min,
                max: self.max,
                value,
                name,
            }));
        }

        Ok(())
    }
}

/// The accepted range of each loss weight, checked before a render starts.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightRanges {
    pub content: WeightRange,
    pub style: WeightRange,
    pub total_variation: WeightRange,
}

impl Default for WeightRanges {
    fn default() -> Self {
        Self {
            content: WeightRange::new(10.0, 100_000.0),
            style: WeightRange::new(0.01, 0.01),
            total_variation: WeightRange::new(30.0, 30.0),
        }
    }
}

impl WeightRanges {
    /// Accepts every non-negative weight
    pub fn unbounded() -> Self {
        Self {
            content: WeightRange::non_negative(),
            style: WeightRange::non_negative(),
            total_variation: WeightRange::non_negative(),
        }
    }

    pub fn validate(&self, weights: &LossWeights) -> Result<(), Error> {
        let ranges = [self.content, self.style, self.total_variation];
        for (range, (name, value)) in ranges.iter().zip(weights.named().iter()) {
            // Weights are never negative, whatever range was configured
            WeightRange::non_negative().check(name, *value)?;
            range.check(name, *value)?;
        }

        Ok(())
    }
}

/// Every recognized option of a render, loadable from JSON.
///
/// Missing fields take their default values, so `{}` is a valid config.
///
/// ```
/// let config = neural_style::RenderConfig::from_json_str(
///     r#"{ "max_dimension": 256, "schedule": { "steps_per_epoch": 50 } }"#,
/// ).unwrap();
///
/// assert_eq!(config.max_dimension, 256);
/// assert_eq!(config.schedule.steps_per_epoch, 50);
/// assert_eq!(config.schedule.epochs_with_variation, 10);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub extractor: ExtractorConfig,
    /// The longer side of both images is scaled to this length
    pub max_dimension: u32,
    pub schedule: Schedule,
    pub optimizer: AdamConfig,
    pub weight_ranges: WeightRanges,
    /// Used when a request does not provide a content image
    pub default_content: Option<PathBuf>,
    /// Used when a request does not provide a style image
    pub default_style: Option<PathBuf>,
    /// Erode the content image before rendering
    pub erode_content: bool,
    /// Upper bound on simultaneous renders in a `RenderPool`, defaults to the
    /// number of logical cores
    pub max_concurrent_renders: Option<usize>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            extractor: ExtractorConfig::default(),
            max_dimension: 512,
            schedule: Schedule::default(),
            optimizer: AdamConfig::default(),
            weight_ranges: WeightRanges::default(),
            default_content: None,
            default_style: None,
            erode_content: false,
            max_concurrent_renders: None,
        }
    }
}

impl RenderConfig {
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_string(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the values that would otherwise only fail midway through a
    /// render
    pub fn validate(&self) -> Result<(), Error> {
        check_render_params(self.max_dimension, &self.schedule, &self.optimizer)?;

        if let Some(max_count) = self.max_concurrent_renders {
            if max_count == 0 {
                return Err(Error::InvalidRange(InvalidRange {
                    min: 1.0,
                    max: 1024.0,
                    value: max_count as f32,
                    name: "max-concurrent-renders",
                }));
            }
        }

        Ok(())
    }
}

/// Checks the parameters shared by a `RenderConfig` and a `SessionBuilder`
pub(crate) fn check_render_params(
    max_dimension: u32,
    schedule: &Schedule,
    optimizer: &AdamConfig,
) -> Result<(), Error> {
    if max_dimension == 0 {
        return Err(Error::InvalidRange(InvalidRange {
            min: 1.0,
            max: u32::MAX as f32,
            value: 0.0,
            name: "max-dimension",
        }));
    }

    if schedule.steps_per_epoch == 0 {
        return Err(Error::InvalidRange(InvalidRange {
            min: 1.0,
            max: usize::MAX as f32,
            value: 0.0,
            name: "steps-per-epoch",
        }));
    }

    check_optimizer(optimizer)
}

fn check_optimizer(adam: &AdamConfig) -> Result<(), Error> {
    if !(adam.learning_rate > 0.0) || !adam.learning_rate.is_finite() {
        return Err(Error::InvalidRange(InvalidRange {
            min: f32::EPSILON,
            max: f32::MAX,
            value: adam.learning_rate,
            name: "learning-rate",
        }));
    }

    for (name, value) in [("beta-1", adam.beta_1), ("beta-2", adam.beta_2)] {
        if !(0.0..1.0).contains(&value) {
            return Err(Error::InvalidRange(InvalidRange {
                min: 0.0,
                max: 1.0,
                value,
                name,
            }));
        }
    }

    if !(adam.epsilon > 0.0) {
        return Err(Error::InvalidRange(InvalidRange {
            min: f32::EPSILON,
            max: f32::MAX,
            value: adam.epsilon,
            name: "epsilon",
        }));
    }

    Ok(())
}

use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use std::ops::{AddAssign, Div};

use crate::extractor::{FeatureExtractor, LayerActivations, LayerOutput};
use crate::gram::gram_matrix;
use crate::vgg::LayerId;
use crate::{LossWeights, Phase};

/// What the canvas is optimized towards: gram matrices of the style image
/// and activations of the content image. Computed once per render.
#[derive(Clone, Debug)]
pub struct Targets<B: Backend> {
    style: Vec<(LayerId, Tensor<B, 3>)>,
    content: Vec<(LayerId, Tensor<B, 4>)>,
}

impl<B: Backend> Targets<B> {
    pub fn new(
        extractor: &FeatureExtractor<B>,
        style_image: Tensor<B, 4>,
        content_image: Tensor<B, 4>,
    ) -> Self {
        let style = extractor
            .extract(style_image)
            .style
            .into_iter()
            .map(|out| (out.layer, gram_matrix(out.activation).detach()))
            .collect();

        let content = extractor
            .extract(content_image)
            .content
            .into_iter()
            .map(|out| (out.layer, out.activation.detach()))
            .collect();

        Self { style, content }
    }

    pub fn style(&self) -> &[(LayerId, Tensor<B, 3>)] {
        &self.style
    }

    pub fn content(&self) -> &[(LayerId, Tensor<B, 4>)] {
        &self.content
    }
}

/// Mean over content layers of the mean squared activation difference
pub fn content_loss<B: Backend>(
    outputs: &[LayerOutput<B>],
    targets: &[(LayerId, Tensor<B, 4>)],
    device: &B::Device,
) -> Tensor<B, 1> {
    let sum = outputs
        .iter()
        .zip(targets.iter())
        .fold(Tensor::zeros([1], device), |acc, (out, (_, target))| {
            acc + mean_squared_error(out.activation.clone(), target.clone())
        });

    sum.div_scalar(outputs.len().max(1) as f32)
}

/// Mean over style layers of the mean squared gram matrix difference
pub fn style_loss<B: Backend>(
    outputs: &[LayerOutput<B>],
    targets: &[(LayerId, Tensor<B, 3>)],
    device: &B::Device,
) -> Tensor<B, 1> {
    let sum = outputs
        .iter()
        .zip(targets.iter())
        .fold(Tensor::zeros([1], device), |acc, (out, (_, target))| {
            acc + mean_squared_error(gram_matrix(out.activation.clone()), target.clone())
        });

    sum.div_scalar(outputs.len().max(1) as f32)
}

/// Sum of absolute differences between horizontally and vertically adjacent
/// pixels
pub fn total_variation_loss<B: Backend>(image: Tensor<B, 4>) -> Tensor<B, 1> {
    let [batch, channels, height, width] = image.dims();
    let mut tv = Tensor::zeros([1], &image.device());

    // an axis of length 1 has no neighbors, and burn rejects empty slices
    if width > 1 {
        let right = image
            .clone()
            .slice([0..batch, 0..channels, 0..height, 1..width]);
        let left = image
            .clone()
            .slice([0..batch, 0..channels, 0..height, 0..width - 1]);
        tv = tv + (right - left).abs().sum();
    }

    if height > 1 {
        let below = image
            .clone()
            .slice([0..batch, 0..channels, 1..height, 0..width]);
        let above = image.slice([0..batch, 0..channels, 0..height - 1, 0..width]);
        tv = tv + (below - above).abs().sum();
    }

    tv
}

fn mean_squared_error<B: Backend, const D: usize>(
    value: Tensor<B, D>,
    target: Tensor<B, D>,
) -> Tensor<B, 1> {
    (value - target).powf_scalar(2.0).mean()
}

/// The weighted loss terms of one step, still attached to the graph
pub struct LossTerms<B: Backend> {
    pub content: Tensor<B, 1>,
    pub style: Tensor<B, 1>,
    /// Only present in the phase that smooths the canvas
    pub total_variation: Option<Tensor<B, 1>>,
    pub total: Tensor<B, 1>,
}

impl<B: Backend> LossTerms<B> {
    /// Weighs each term and adds them up. `canvas` must be the tensor the
    /// activations were extracted from.
    pub fn compute(
        activations: &LayerActivations<B>,
        canvas: Tensor<B, 4>,
        targets: &Targets<B>,
        weights: &LossWeights,
        phase: Phase,
    ) -> Self {
        let device = canvas.device();

        let content = content_loss(&activations.content, targets.content(), &device)
            .mul_scalar(weights.content);
        let style =
            style_loss(&activations.style, targets.style(), &device).mul_scalar(weights.style);

        let total_variation = if phase.uses_total_variation() {
            Some(total_variation_loss(canvas).mul_scalar(weights.total_variation))
        } else {
            None
        };

        let mut total = content.clone() + style.clone();
        if let Some(tv) = &total_variation {
            total = total + tv.clone();
        }

        Self {
            content,
            style,
            total_variation,
            total,
        }
    }

    pub fn report(&self) -> LossReport {
        LossReport {
            content: scalar(&self.content),
            style: scalar(&self.style),
            total_variation: self.total_variation.as_ref().map_or(0.0, scalar),
            total: scalar(&self.total),
        }
    }
}

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f32 {
    t.clone().into_scalar().elem::<f32>()
}

/// Weighted loss values of a step, or averaged over an epoch
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct LossReport {
    pub content: f32,
    pub style: f32,
    pub total_variation: f32,
    pub total: f32,
}

impl AddAssign for LossReport {
    fn add_assign(&mut self, rhs: Self) {
        self.content += rhs.content;
        self.style += rhs.style;
        self.total_variation += rhs.total_variation;
        self.total += rhs.total;
    }
}

impl Div<f32> for LossReport {
    type Output = Self;

    fn div(self, rhs: f32) -> Self {
        Self {
            content: self.content / rhs,
            style: self.style / rhs,
            total_variation: self.total_variation / rhs,
            total: self.total / rhs,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::vgg::Vgg19Config;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type B = NdArray<f32>;

    fn tiny() -> FeatureExtractor<B> {
        let device = Default::default();
        let network = Vgg19Config::new().with_base_channels(2).init::<B>(&device);
        FeatureExtractor::from_model(network, &ExtractorConfig::default(), &device).unwrap()
    }

    fn random_image(height: usize, width: usize) -> Tensor<B, 4> {
        Tensor::random(
            [1, 3, height, width],
            Distribution::Uniform(0.0, 1.0),
            &Default::default(),
        )
    }

    #[test]
    fn zero_when_canvas_matches_targets() {
        let extractor = tiny();
        let image = random_image(8, 8);
        let targets = Targets::new(&extractor, image.clone(), image.clone());

        let activations = extractor.extract(image.clone());
        let terms = LossTerms::compute(
            &activations,
            image,
            &targets,
            &LossWeights::new(1e4, 1e-2, 30.0),
            Phase::Warmup,
        );

        let report = terms.report();
        assert_eq!(report.content, 0.0);
        assert_eq!(report.style, 0.0);
        assert_eq!(report.total_variation, 0.0);
        assert_eq!(report.total, 0.0);
    }

    #[test]
    fn style_and_content_targets_differ() {
        let extractor = tiny();
        let style = random_image(8, 8);
        let content = random_image(8, 8);
        let targets = Targets::new(&extractor, style.clone(), content.clone());

        assert_eq!(targets.style().len(), 5);
        assert_eq!(targets.content().len(), 1);

        // matching the content exactly leaves only the style term
        let terms = LossTerms::compute(
            &extractor.extract(content.clone()),
            content,
            &targets,
            &LossWeights::new(1.0, 1.0, 0.0),
            Phase::Warmup,
        );
        let report = terms.report();
        assert_eq!(report.content, 0.0);
        assert!(report.style >= 0.0);
    }

    #[test]
    fn total_variation_of_flat_image_is_zero() {
        let flat = Tensor::<B, 4>::ones([1, 3, 6, 4], &Default::default()).mul_scalar(0.3);
        let tv = total_variation_loss(flat).into_scalar();
        assert_eq!(tv, 0.0);
    }

    #[test]
    fn total_variation_sums_neighbor_differences() {
        // one channel worth of values, 2x2: [[0, 1], [1, 1]], repeated per channel
        let plane = [0.0f32, 1.0, 1.0, 1.0];
        let values: Vec<f32> = plane.iter().cycle().take(12).copied().collect();
        let image =
            Tensor::<B, 4>::from_data(TensorData::new(values, [1, 3, 2, 2]), &Default::default());

        // per channel: horizontal |1-0| + |1-1|, vertical |1-0| + |1-1|
        let tv = total_variation_loss(image).into_scalar();
        assert_eq!(tv, 6.0);
    }

    #[test]
    fn total_variation_only_in_refine_phase() {
        let extractor = tiny();
        let style = random_image(4, 4);
        let content = random_image(4, 4);
        let targets = Targets::new(&extractor, style, content);

        let canvas = random_image(4, 4);
        let activations = extractor.extract(canvas.clone());
        let weights = LossWeights::new(1.0, 1.0, 1.0);

        let warmup =
            LossTerms::compute(&activations, canvas.clone(), &targets, &weights, Phase::Warmup);
        assert!(warmup.total_variation.is_none());

        let refine = LossTerms::compute(&activations, canvas, &targets, &weights, Phase::Refine);
        let report = refine.report();
        assert!(report.total_variation > 0.0);
        let sum = report.content + report.style + report.total_variation;
        assert!((report.total - sum).abs() <= 1e-4 * sum.max(1.0));
    }

    #[test]
    fn single_pixel_total_variation() {
        let pixel = random_image(1, 1);
        assert_eq!(total_variation_loss(pixel).into_scalar(), 0.0);

        let row = Tensor::<B, 4>::from_data(
            TensorData::new(vec![0.0f32, 0.5, 0.0, 0.5, 0.0, 0.5], [1, 3, 1, 2]),
            &Default::default(),
        );
        assert!((total_variation_loss(row).into_scalar() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn report_averaging() {
        let mut sum = LossReport::default();
        sum += LossReport {
            content: 1.0,
            style: 2.0,
            total_variation: 0.0,
            total: 3.0,
        };
        sum += LossReport {
            content: 3.0,
            style: 4.0,
            total_variation: 2.0,
            total: 9.0,
        };

        assert_eq!(
            sum / 2.0,
            LossReport {
                content: 2.0,
                style: 3.0,
                total_variation: 1.0,
                total: 6.0,
            }
        );
    }
}

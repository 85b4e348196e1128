use burn::tensor::{backend::AutodiffBackend, ElementConversion, Tensor};
use std::fmt;

use crate::errors::NumericalDivergence;
use crate::extractor::FeatureExtractor;
use crate::loss::{LossReport, LossTerms, Targets};
use crate::optim::AdamState;
use crate::session::{ProgressStat, ProgressUpdate, RenderProgress};
use crate::{codec, AdamConfig, Error, LossWeights, Schedule};

/// The stage of a render. Phases only ever advance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Content and style loss only, lets coarse structure form
    Warmup,
    /// Adds the total variation term to remove high frequency noise
    Refine,
    Done,
}

impl Phase {
    pub fn uses_total_variation(self) -> bool {
        matches!(self, Self::Refine)
    }

    fn next(self) -> Self {
        match self {
            Self::Warmup => Self::Refine,
            Self::Refine | Self::Done => Self::Done,
        }
    }

    fn epochs(self, schedule: &Schedule) -> usize {
        match self {
            Self::Warmup => schedule.epochs_without_variation,
            Self::Refine => schedule.epochs_with_variation,
            Self::Done => 0,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warmup => "warmup",
            Self::Refine => "refine",
            Self::Done => "done",
        })
    }
}

/// Where a single render is in its schedule
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RenderState {
    pub phase: Phase,
    /// Completed epochs in the current phase
    pub epoch: usize,
    /// Completed steps in the current epoch
    pub epoch_step: usize,
    /// Completed steps over the whole render
    pub step: usize,
}

impl RenderState {
    pub fn new(schedule: &Schedule) -> Self {
        let mut state = Self {
            phase: Phase::Warmup,
            epoch: 0,
            epoch_step: 0,
            step: 0,
        };
        state.skip_empty_phases(schedule);
        state
    }

    fn skip_empty_phases(&mut self, schedule: &Schedule) {
        while self.phase != Phase::Done && self.phase.epochs(schedule) == 0 {
            self.phase = self.phase.next();
        }
    }

    /// Records a finished step. Returns true if it completed an epoch.
    fn advance(&mut self, schedule: &Schedule) -> bool {
        self.step += 1;
        self.epoch_step += 1;

        if self.epoch_step < schedule.steps_per_epoch {
            return false;
        }

        self.epoch_step = 0;
        self.epoch += 1;
        true
    }

    /// Moves on to the next phase once the current one has run all its epochs
    fn finish_epoch(&mut self, schedule: &Schedule) {
        if self.epoch >= self.phase.epochs(schedule) {
            self.phase = self.phase.next();
            self.epoch = 0;
            self.skip_empty_phases(schedule);
        }
    }
}

/// Drives the canvas towards the targets.
///
/// The canvas and optimizer moments live on the inner backend, each step
/// lifts the canvas into the autodiff backend just long enough to take its
/// gradient.
pub(crate) struct OptimizationLoop<'a, B: AutodiffBackend> {
    pub(crate) extractor: &'a FeatureExtractor<B>,
    pub(crate) targets: &'a Targets<B>,
    pub(crate) weights: LossWeights,
    pub(crate) schedule: Schedule,
    pub(crate) optimizer: AdamConfig,
}

type Canvas<B> = Tensor<<B as AutodiffBackend>::InnerBackend, 4>;

impl<'a, B: AutodiffBackend> OptimizationLoop<'a, B> {
    /// One loss + gradient + update + clip iteration.
    pub(crate) fn step(
        &self,
        canvas: Canvas<B>,
        optimizer: AdamState<B::InnerBackend, 4>,
        state: &RenderState,
    ) -> Result<(Canvas<B>, AdamState<B::InnerBackend, 4>, LossReport), Error> {
        let input = Tensor::<B, 4>::from_inner(canvas.clone()).require_grad();

        let activations = self.extractor.extract(input.clone());
        let terms = LossTerms::compute(
            &activations,
            input.clone(),
            self.targets,
            &self.weights,
            state.phase,
        );
        let report = terms.report();

        if !report.total.is_finite() {
            return Err(self.diverged(state, report.total));
        }

        let grads = terms.total.backward();
        let grad = match input.grad(&grads) {
            Some(grad) => grad,
            // nothing in the loss depends on the canvas
            None => canvas.zeros_like(),
        };

        let grad_magnitude = grad.clone().abs().sum().into_scalar().elem::<f32>();
        if !grad_magnitude.is_finite() {
            return Err(self.diverged(state, report.total));
        }

        let (canvas, optimizer) = optimizer.step(&self.optimizer, canvas, grad);

        Ok((canvas.clamp(0.0, 1.0), optimizer, report))
    }

    /// Runs every phase of the schedule to completion. There is no early
    /// exit, only the schedule decides when the render is done.
    pub(crate) fn run(
        &self,
        canvas: Canvas<B>,
        mut progress: Option<Box<dyn RenderProgress>>,
    ) -> Result<Canvas<B>, Error> {
        let schedule = &self.schedule;
        let total_steps = schedule.total_steps();

        let mut state = RenderState::new(schedule);
        let mut optimizer = AdamState::new(&canvas);
        let mut canvas = canvas;
        let mut epoch_losses = LossReport::default();

        tracing::info!(
            phase = %state.phase,
            total_steps,
            "starting render"
        );

        while state.phase != Phase::Done {
            let (next_canvas, next_optimizer, report) = self.step(canvas, optimizer, &state)?;
            canvas = next_canvas;
            optimizer = next_optimizer;
            epoch_losses += report;

            if !state.advance(schedule) {
                continue;
            }

            let phase = state.phase;
            let losses = epoch_losses / schedule.steps_per_epoch as f32;
            epoch_losses = LossReport::default();

            tracing::debug!(
                %phase,
                epoch = state.epoch,
                content = losses.content,
                style = losses.style,
                total_variation = losses.total_variation,
                total = losses.total,
                "finished epoch"
            );

            if let Some(progress) = progress.as_mut() {
                let image = codec::tensor_to_rgb(canvas.clone())?;
                let phase_steps = phase.epochs(schedule) * schedule.steps_per_epoch;

                progress.update(ProgressUpdate {
                    image: &image,
                    phase,
                    epoch: state.epoch,
                    losses,
                    total: ProgressStat {
                        current: state.step,
                        total: total_steps,
                    },
                    phase_progress: ProgressStat {
                        current: state.epoch * schedule.steps_per_epoch,
                        total: phase_steps,
                    },
                });
            }

            state.finish_epoch(schedule);
            if state.phase != phase {
                tracing::info!(from = %phase, to = %state.phase, step = state.step, "phase finished");
            }
        }

        Ok(canvas)
    }

    fn diverged(&self, state: &RenderState, loss: f32) -> Error {
        tracing::warn!(phase = %state.phase, step = state.step, loss, "render diverged");

        Error::NumericalDivergence(NumericalDivergence {
            phase: state.phase,
            step: state.step,
            loss,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ExtractorConfig, Vgg19Config};
    use burn::backend::{Autodiff, NdArray};

    type B = Autodiff<NdArray<f32>>;

    fn tiny() -> FeatureExtractor<B> {
        let device = Default::default();
        let network = Vgg19Config::new().with_base_channels(2).init::<B>(&device);
        FeatureExtractor::from_model(network, &ExtractorConfig::default(), &device).unwrap()
    }

    fn gradient(side: u32) -> Tensor<B, 4> {
        let image = image::RgbImage::from_fn(side, side, |x, y| {
            image::Rgb([(x * 255 / side) as u8, (y * 255 / side) as u8, 128])
        });
        codec::rgb_to_tensor(&image, &Default::default())
    }

    fn checkerboard(side: u32) -> Tensor<B, 4> {
        let image = image::RgbImage::from_fn(side, side, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([255, 0, 0])
            }
        });
        codec::rgb_to_tensor(&image, &Default::default())
    }

    fn state_at(phase: Phase, step: usize) -> RenderState {
        RenderState {
            phase,
            epoch: 0,
            epoch_step: 0,
            step,
        }
    }

    #[test]
    fn steps_keep_canvas_in_unit_range() {
        let extractor = tiny();
        let content = gradient(8);
        let targets = Targets::new(&extractor, checkerboard(8), content.clone());

        // every update overshoots by far, only clipping keeps the canvas valid
        let optimization = OptimizationLoop {
            extractor: &extractor,
            targets: &targets,
            weights: LossWeights::new(1.0, 1.0, 1.0),
            schedule: Schedule::default(),
            optimizer: AdamConfig {
                learning_rate: 50.0,
                ..Default::default()
            },
        };

        let mut canvas = content.inner();
        let mut optimizer = AdamState::new(&canvas);

        for (step, phase) in [Phase::Warmup, Phase::Warmup, Phase::Refine, Phase::Refine]
            .iter()
            .enumerate()
        {
            let (next_canvas, next_optimizer, report) = optimization
                .step(canvas, optimizer, &state_at(*phase, step))
                .unwrap();
            canvas = next_canvas;
            optimizer = next_optimizer;

            assert!(report.total.is_finite());
            assert_eq!(canvas.dims(), [1, 3, 8, 8]);

            let values = canvas.clone().into_data().to_vec::<f32>().unwrap();
            for value in values {
                assert!(
                    (0.0..=1.0).contains(&value),
                    "{} escaped the unit range at step {}",
                    value,
                    step
                );
            }
        }
    }

    #[test]
    fn non_finite_loss_reports_where_it_happened() {
        let extractor = tiny();
        let content = gradient(8);
        let targets = Targets::new(&extractor, checkerboard(8), content.clone());

        let optimization = OptimizationLoop {
            extractor: &extractor,
            targets: &targets,
            weights: LossWeights::new(0.0, f32::INFINITY, 0.0),
            schedule: Schedule::default(),
            optimizer: AdamConfig::default(),
        };

        let canvas = content.inner();
        let optimizer = AdamState::new(&canvas);
        match optimization.step(canvas, optimizer, &state_at(Phase::Warmup, 0)) {
            Err(Error::NumericalDivergence(divergence)) => {
                assert_eq!(divergence.phase(), Phase::Warmup);
                assert_eq!(divergence.step(), 0);
                assert!(!divergence.loss().is_finite());
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("step succeeded with an infinite weight"),
        }
    }

    fn walk(schedule: &Schedule) -> Vec<(Phase, usize)> {
        let mut state = RenderState::new(schedule);
        let mut epochs = Vec::new();

        while state.phase != Phase::Done {
            if state.advance(schedule) {
                epochs.push((state.phase, state.epoch));
                state.finish_epoch(schedule);
            }
        }

        assert_eq!(state.step, schedule.total_steps());
        epochs
    }

    #[test]
    fn phases_run_in_order() {
        let schedule = Schedule {
            epochs_without_variation: 2,
            epochs_with_variation: 3,
            steps_per_epoch: 4,
        };

        assert_eq!(
            walk(&schedule),
            vec![
                (Phase::Warmup, 1),
                (Phase::Warmup, 2),
                (Phase::Refine, 1),
                (Phase::Refine, 2),
                (Phase::Refine, 3),
            ]
        );
    }

    #[test]
    fn empty_phases_are_skipped() {
        let refine_only = Schedule {
            epochs_without_variation: 0,
            epochs_with_variation: 1,
            steps_per_epoch: 2,
        };
        assert_eq!(RenderState::new(&refine_only).phase, Phase::Refine);
        assert_eq!(walk(&refine_only), vec![(Phase::Refine, 1)]);

        let warmup_only = Schedule {
            epochs_without_variation: 1,
            epochs_with_variation: 0,
            steps_per_epoch: 2,
        };
        assert_eq!(walk(&warmup_only), vec![(Phase::Warmup, 1)]);

        let nothing = Schedule {
            epochs_without_variation: 0,
            epochs_with_variation: 0,
            steps_per_epoch: 100,
        };
        assert_eq!(RenderState::new(&nothing).phase, Phase::Done);
    }

    #[test]
    fn only_refine_uses_total_variation() {
        assert!(!Phase::Warmup.uses_total_variation());
        assert!(Phase::Refine.uses_total_variation());
        assert!(!Phase::Done.uses_total_variation());
    }
}

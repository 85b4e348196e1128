use burn::tensor::{backend::Backend, Tensor};

use crate::AdamConfig;

/// Moment estimates for a single optimized tensor.
///
/// Owned by one render. Each step consumes the state and returns the next
/// one, so it can't be shared between canvases.
#[derive(Clone, Debug)]
pub struct AdamState<B: Backend, const D: usize> {
    step: usize,
    moment_1: Tensor<B, D>,
    moment_2: Tensor<B, D>,
}

impl<B: Backend, const D: usize> AdamState<B, D> {
    /// Zeroed moments shaped like `param`
    pub fn new(param: &Tensor<B, D>) -> Self {
        Self {
            step: 0,
            moment_1: param.zeros_like(),
            moment_2: param.zeros_like(),
        }
    }

    /// Number of updates applied so far
    pub fn steps(&self) -> usize {
        self.step
    }

    /// Applies one bias corrected Adam update to `param` and returns it along
    /// with the advanced state.
    pub fn step(
        self,
        config: &AdamConfig,
        param: Tensor<B, D>,
        grad: Tensor<B, D>,
    ) -> (Tensor<B, D>, Self) {
        let step = self.step + 1;
        let (beta_1, beta_2) = (config.beta_1, config.beta_2);

        let moment_1 = self
            .moment_1
            .mul_scalar(beta_1)
            .add(grad.clone().mul_scalar(1.0 - beta_1));
        let moment_2 = self
            .moment_2
            .mul_scalar(beta_2)
            .add(grad.powf_scalar(2.0).mul_scalar(1.0 - beta_2));

        let t = step as i32;
        let correction =
            (1.0 - f64::from(beta_2).powi(t)).sqrt() / (1.0 - f64::from(beta_1).powi(t));
        let lr = (f64::from(config.learning_rate) * correction) as f32;

        let update = moment_1
            .clone()
            .div(moment_2.clone().sqrt().add_scalar(config.epsilon))
            .mul_scalar(lr);

        (
            param.sub(update),
            Self {
                step,
                moment_1,
                moment_2,
            },
        )
    }
}

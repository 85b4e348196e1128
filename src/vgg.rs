//! VGG19 convolutional trunk, without the classifier head.

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::MaxPool2dConfig;
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Number of 3x3 convolutions in each of the 5 blocks
const CONVS_PER_BLOCK: [usize; 5] = [2, 2, 4, 4, 4];
/// Channel multiplier of each block relative to the first
const WIDTH_MULTIPLIER: [usize; 5] = [1, 2, 4, 8, 8];

/// Identifies a convolution layer by its 1-based block and position within
/// the block, written `block{block}_conv{conv}`.
///
/// Ordering follows depth in the network.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId {
    pub block: usize,
    pub conv: usize,
}

impl LayerId {
    pub fn new(block: usize, conv: usize) -> Self {
        Self { block, conv }
    }

    /// True if VGG19 has this layer
    pub fn exists(self) -> bool {
        self.block >= 1
            && self.block <= CONVS_PER_BLOCK.len()
            && self.conv >= 1
            && self.conv <= CONVS_PER_BLOCK[self.block - 1]
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}_conv{}", self.block, self.conv)
    }
}

impl FromStr for LayerId {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let unknown = || Error::UnknownLayer(name.to_owned());

        let rest = name.strip_prefix("block").ok_or_else(unknown)?;
        let (block, conv) = rest.split_once("_conv").ok_or_else(unknown)?;

        let id = Self {
            block: block.parse().map_err(|_e| unknown())?,
            conv: conv.parse().map_err(|_e| unknown())?,
        };

        if !id.exists() {
            return Err(unknown());
        }

        Ok(id)
    }
}

#[derive(Config, Debug)]
pub struct Vgg19Config {
    /// Output channels of the first block. The pretrained network uses 64.
    #[config(default = 64)]
    pub base_channels: usize,
}

impl Vgg19Config {
    /// Builds a randomly initialized network, suitable as a starting point
    /// for loading a record, or on its own for tests.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg19<B> {
        let mut in_channels = 3;
        let blocks = CONVS_PER_BLOCK
            .iter()
            .zip(WIDTH_MULTIPLIER.iter())
            .map(|(&count, &mult)| {
                let out_channels = self.base_channels * mult;
                let convs = (0..count)
                    .map(|_| {
                        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
                            .with_padding(PaddingConfig2d::Same)
                            .init(device);
                        in_channels = out_channels;
                        conv
                    })
                    .collect();

                VggBlock { convs }
            })
            .collect();

        Vgg19 { blocks }
    }
}

#[derive(Module, Debug)]
pub struct VggBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
}

#[derive(Module, Debug)]
pub struct Vgg19<B: Backend> {
    blocks: Vec<VggBlock<B>>,
}

impl<B: Backend> Vgg19<B> {
    /// Runs the trunk up to the deepest of `layers` and returns the post-ReLU
    /// activation of each requested layer, in the order requested.
    ///
    /// Every id in `layers` must exist, see [`LayerId::exists`].
    pub fn forward_layers(&self, input: Tensor<B, 4>, layers: &[LayerId]) -> Vec<Tensor<B, 4>> {
        let deepest = match layers.iter().max() {
            Some(deepest) => *deepest,
            None => return Vec::new(),
        };

        let mut captured: Vec<Option<Tensor<B, 4>>> = vec![None; layers.len()];
        let mut x = input;

        'blocks: for (b, block) in self.blocks.iter().enumerate() {
            if b > 0 {
                x = downsample(x);
            }

            for (c, conv) in block.convs.iter().enumerate() {
                let id = LayerId::new(b + 1, c + 1);
                x = relu(conv.forward(x));

                for (slot, wanted) in captured.iter_mut().zip(layers.iter()) {
                    if *wanted == id {
                        *slot = Some(x.clone());
                    }
                }

                if id == deepest {
                    break 'blocks;
                }
            }
        }

        captured.into_iter().flatten().collect()
    }
}

/// 2x2 max pooling with stride 2. An axis of length 1 is left alone, so tiny
/// images still make it through all 5 blocks.
fn downsample<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    let kernel = [height.min(2), width.min(2)];

    if kernel == [1, 1] {
        return x;
    }

    MaxPool2dConfig::new(kernel)
        .with_strides(kernel)
        .init()
        .forward(x)
}

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::{backend::Backend, Tensor, TensorData};

use crate::config::{ExtractorConfig, InputNormalization};
use crate::vgg::{LayerId, Vgg19, Vgg19Config};
use crate::Error;

/// ImageNet channel means in BGR order, on the [0,255] scale
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];
const TORCH_MEAN_RGB: [f32; 3] = [0.485, 0.456, 0.406];
const TORCH_STD_RGB: [f32; 3] = [0.229, 0.224, 0.225];

/// The activation of a single named layer
#[derive(Clone, Debug)]
pub struct LayerOutput<B: Backend> {
    pub layer: LayerId,
    pub activation: Tensor<B, 4>,
}

/// Activations of every configured layer, split into the style group and
/// the content group. Both keep the configured layer order.
#[derive(Clone, Debug)]
pub struct LayerActivations<B: Backend> {
    pub style: Vec<LayerOutput<B>>,
    pub content: Vec<LayerOutput<B>>,
}

impl<B: Backend> LayerActivations<B> {
    pub fn get(&self, layer: LayerId) -> Option<&Tensor<B, 4>> {
        self.style
            .iter()
            .chain(self.content.iter())
            .find(|out| out.layer == layer)
            .map(|out| &out.activation)
    }
}

/// A frozen VGG19 that exposes only the configured style and content layers.
///
/// Cloning is cheap, the weights are reference counted tensors and are
/// never written to after construction.
#[derive(Clone, Debug)]
pub struct FeatureExtractor<B: Backend> {
    network: Vgg19<B>,
    style_layers: Vec<LayerId>,
    content_layers: Vec<LayerId>,
    /// style layers followed by content layers, as passed to the network
    layers: Vec<LayerId>,
    normalization: InputNormalization,
    device: B::Device,
}

impl<B: Backend> FeatureExtractor<B> {
    /// Loads pretrained weights from the path in `config`.
    ///
    /// The weights are a named MessagePack record of [`Vgg19`], the file
    /// extension is always `.mpk`. Failing to load them is fatal, no render
    /// can run without a network.
    pub fn load(config: &ExtractorConfig, device: &B::Device) -> Result<Self, Error> {
        let path = config.weights_path.clone().ok_or_else(|| Error::ModelLoad {
            path: Default::default(),
            reason: "no weights path was configured".to_owned(),
        })?;

        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let network = Vgg19Config::new()
            .with_base_channels(config.base_channels)
            .init::<B>(device)
            .load_file(path.clone(), &recorder, device)
            .map_err(|err| Error::ModelLoad {
                path: path.clone(),
                reason: format!("{:?}", err),
            })?;

        tracing::info!(path = %path.display(), "loaded pretrained weights");

        Self::from_model(network, config, device)
    }

    /// Wraps an already built network. Every parameter is frozen.
    pub fn from_model(
        network: Vgg19<B>,
        config: &ExtractorConfig,
        device: &B::Device,
    ) -> Result<Self, Error> {
        let style_layers = parse_layers(&config.style_layers, "style")?;
        let content_layers = parse_layers(&config.content_layers, "content")?;

        let layers = style_layers
            .iter()
            .chain(content_layers.iter())
            .copied()
            .collect();

        Ok(Self {
            network: network.no_grad(),
            style_layers,
            content_layers,
            layers,
            normalization: config.normalization,
            device: device.clone(),
        })
    }

    pub fn style_layers(&self) -> &[LayerId] {
        &self.style_layers
    }

    pub fn content_layers(&self) -> &[LayerId] {
        &self.content_layers
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Runs a batch of images in [0,1] through the network and returns the
    /// activations of the configured layers.
    pub fn extract(&self, images: Tensor<B, 4>) -> LayerActivations<B> {
        let input = self.normalize(images);
        let mut outputs = self.network.forward_layers(input, &self.layers).into_iter();

        // the first N outputs are style, the remainder content
        let style = self
            .style_layers
            .iter()
            .zip(outputs.by_ref())
            .map(|(&layer, activation)| LayerOutput { layer, activation })
            .collect();
        let content = self
            .content_layers
            .iter()
            .zip(outputs)
            .map(|(&layer, activation)| LayerOutput { layer, activation })
            .collect();

        LayerActivations { style, content }
    }

    /// Rescales [0,1] RGB into the input range the weights were trained on
    fn normalize(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = images.device();

        match self.normalization {
            InputNormalization::Caffe => {
                let [batch, _, height, width] = images.dims();
                let scaled = images.mul_scalar(255.0);

                let bgr = Tensor::cat(
                    vec![
                        scaled.clone().slice([0..batch, 2..3, 0..height, 0..width]),
                        scaled.clone().slice([0..batch, 1..2, 0..height, 0..width]),
                        scaled.slice([0..batch, 0..1, 0..height, 0..width]),
                    ],
                    1,
                );

                bgr.sub(per_channel(CAFFE_MEAN_BGR, &device))
            }
            InputNormalization::Torch => images
                .sub(per_channel(TORCH_MEAN_RGB, &device))
                .div(per_channel(TORCH_STD_RGB, &device)),
        }
    }
}

fn per_channel<B: Backend>(values: [f32; 3], device: &B::Device) -> Tensor<B, 4> {
    Tensor::from_data(TensorData::new(values.to_vec(), [1, 3, 1, 1]), device)
}

fn parse_layers(names: &[String], group: &'static str) -> Result<Vec<LayerId>, Error> {
    if names.is_empty() {
        return Err(Error::NoLayers(group));
    }

    names.iter().map(|name| name.parse()).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn tiny() -> FeatureExtractor<B> {
        let device = Default::default();
        let network = Vgg19Config::new().with_base_channels(2).init::<B>(&device);
        FeatureExtractor::from_model(network, &ExtractorConfig::default(), &device).unwrap()
    }

    #[test]
    fn outputs_are_partitioned_in_config_order() {
        let extractor = tiny();
        let device = Default::default();

        let images = Tensor::<B, 4>::ones([1, 3, 16, 16], &device).mul_scalar(0.5);
        let activations = extractor.extract(images);

        let style: Vec<_> = activations.style.iter().map(|o| o.layer.to_string()).collect();
        assert_eq!(
            style,
            vec![
                "block1_conv1",
                "block2_conv1",
                "block3_conv1",
                "block4_conv1",
                "block5_conv1"
            ]
        );
        assert_eq!(activations.content.len(), 1);
        assert_eq!(activations.content[0].layer, LayerId::new(4, 2));
        assert_eq!(activations.content[0].activation.dims(), [1, 16, 2, 2]);

        assert!(activations.get(LayerId::new(3, 1)).is_some());
        assert!(activations.get(LayerId::new(3, 2)).is_none());
    }

    #[test]
    fn forward_is_deterministic() {
        let extractor = tiny();
        let device = Default::default();
        let images = Tensor::<B, 4>::ones([1, 3, 8, 8], &device).mul_scalar(0.25);

        let first = extractor.extract(images.clone());
        let second = extractor.extract(images);

        let a = first.content[0].activation.clone().into_data();
        let b = second.content[0].activation.clone().into_data();
        assert_eq!(a.to_vec::<f32>().unwrap(), b.to_vec::<f32>().unwrap());
    }

    #[test]
    fn caffe_normalization_swaps_and_centers() {
        let extractor = tiny();
        let device = Default::default();

        // pure red, (255, 0, 0) once scaled
        let red = Tensor::<B, 4>::from_data(
            TensorData::new(vec![1.0f32, 0.0, 0.0], [1, 3, 1, 1]),
            &device,
        );
        let values = extractor.normalize(red).into_data().to_vec::<f32>().unwrap();

        let expected = [-103.939, -116.779, 255.0 - 123.68];
        for (v, e) in values.iter().zip(expected.iter()) {
            assert!((v - e).abs() < 1e-3, "{} != {}", v, e);
        }
    }

    #[test]
    fn bad_layer_configs_are_rejected() {
        let device = Default::default();

        let mut config = ExtractorConfig::default();
        config.content_layers.clear();
        let network = Vgg19Config::new().with_base_channels(2).init::<B>(&device);
        assert!(matches!(
            FeatureExtractor::from_model(network, &config, &device),
            Err(Error::NoLayers("content"))
        ));

        let mut config = ExtractorConfig::default();
        config.style_layers.push("block9_conv1".to_owned());
        let network = Vgg19Config::new().with_base_channels(2).init::<B>(&device);
        assert!(matches!(
            FeatureExtractor::from_model(network, &config, &device),
            Err(Error::UnknownLayer(name)) if name == "block9_conv1"
        ));
    }

    #[test]
    fn missing_weights_fail_to_load() {
        let device = Default::default();

        let config = ExtractorConfig::default();
        assert!(matches!(
            FeatureExtractor::<B>::load(&config, &device),
            Err(Error::ModelLoad { .. })
        ));

        let config = ExtractorConfig {
            weights_path: Some("does/not/exist/vgg19".into()),
            base_channels: 2,
            ..Default::default()
        };
        match FeatureExtractor::<B>::load(&config, &device) {
            Err(Error::ModelLoad { path, .. }) => {
                assert_eq!(path, std::path::PathBuf::from("does/not/exist/vgg19"));
            }
            other => panic!("expected a model load error, got {:?}", other.map(|_| ())),
        }
    }
}

//! Conversion between 8-bit RGB images and the `(1, 3, height, width)`
//! float tensors the renderer optimizes.

use crate::{
    errors::{DecodeError, PostprocessError},
    Dims, Error,
};
use burn::tensor::{backend::Backend, Tensor, TensorData};

/// Scales images so their longer side matches `max_dimension` and converts
/// them to tensors in [0,1].
#[derive(Copy, Clone, Debug)]
pub struct ImageCodec {
    max_dimension: u32,
}

impl ImageCodec {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// The size an image of `width`x`height` is resized to. The aspect ratio
    /// is kept, and neither side ever drops below 1 pixel.
    pub fn target_dims(&self, width: u32, height: u32) -> Dims {
        let max = u64::from(self.max_dimension);
        let (w, h) = (u64::from(width.max(1)), u64::from(height.max(1)));

        let (w, h) = if w >= h {
            (max, h * max / w)
        } else {
            (w * max / h, max)
        };

        Dims::new(w.max(1) as u32, h.max(1) as u32)
    }

    /// Resizes the image with bilinear filtering, then lays it out as a
    /// `(1, 3, height, width)` tensor with values in [0,1].
    ///
    /// Images without pixels can't be resized and are rejected.
    pub fn encode<B: Backend>(
        &self,
        img: &image::RgbImage,
        device: &B::Device,
    ) -> Result<Tensor<B, 4>, DecodeError> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroSized { width, height });
        }

        let dims = self.target_dims(width, height);

        let resized;
        let img = if dims.width != width || dims.height != height {
            resized = image::imageops::resize(
                img,
                dims.width,
                dims.height,
                image::imageops::FilterType::Triangle,
            );
            &resized
        } else {
            img
        };

        Ok(rgb_to_tensor(img, device))
    }
}

/// Packs an image into a `(1, 3, height, width)` tensor without resizing
pub fn rgb_to_tensor<B: Backend>(img: &image::RgbImage, device: &B::Device) -> Tensor<B, 4> {
    let (width, height) = img.dimensions();
    let plane = width as usize * height as usize;

    // interleaved RGB -> one plane per channel
    let mut values = vec![0f32; plane * 3];
    for (i, pixel) in img.pixels().enumerate() {
        for c in 0..3 {
            values[c * plane + i] = f32::from(pixel[c]) / 255.0;
        }
    }

    Tensor::from_data(
        TensorData::new(values, [1, 3, height as usize, width as usize]),
        device,
    )
}

/// Inverse of [`ImageCodec::encode`]: scales by 255, truncates to 8 bits and
/// drops the batch dimension, which must be exactly 1.
pub fn tensor_to_rgb<B: Backend>(tensor: Tensor<B, 4>) -> Result<image::RgbImage, Error> {
    let [batch, channels, height, width] = tensor.dims();
    if batch != 1 || channels != 3 {
        return Err(Error::Postprocess(PostprocessError {
            shape: vec![batch, channels, height, width],
        }));
    }

    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::Tensor(format!("{:?}", err)))?;

    let plane = width * height;
    let mut img = image::RgbImage::new(width as u32, height as u32);
    for (i, pixel) in img.pixels_mut().enumerate() {
        for c in 0..3 {
            // `as` saturates, and the canvas is already clipped to [0,1]
            pixel[c] = (values[c * plane + i] * 255.0) as u8;
        }
    }

    Ok(img)
}

use crate::errors::DecodeError;
use std::path::Path;

/// Helper type used to define the source of `ImageSource`'s data
#[derive(Clone)]
pub enum ImageSource<'a> {
    /// A raw buffer of image data, see `image::load_from_memory` for details
    /// on what is supported
    Memory(&'a [u8]),
    /// The path to an image to load from disk. The image format is inferred
    /// from the file extension, see `image::open` for details
    Path(&'a Path),
    /// An already loaded image that is passed directly to the renderer
    Image(image::DynamicImage),
}

impl<'a> ImageSource<'a> {
    pub fn from_path(path: &'a Path) -> Self {
        Self::Path(path)
    }
}

impl<'a> From<image::DynamicImage> for ImageSource<'a> {
    fn from(img: image::DynamicImage) -> Self {
        Self::Image(img)
    }
}

impl<'a> From<image::RgbImage> for ImageSource<'a> {
    fn from(img: image::RgbImage) -> Self {
        Self::Image(image::DynamicImage::ImageRgb8(img))
    }
}

impl<'a, S> From<&'a S> for ImageSource<'a>
where
    S: AsRef<Path> + 'a,
{
    fn from(path: &'a S) -> Self {
        Self::Path(path.as_ref())
    }
}

pub fn load_dynamic_image(src: ImageSource<'_>) -> Result<image::DynamicImage, image::ImageError> {
    match src {
        ImageSource::Memory(data) => image::load_from_memory(data),
        ImageSource::Path(path) => image::open(path),
        ImageSource::Image(img) => Ok(img),
    }
}

/// Decodes any supported source into a packed 8-bit RGB image, dropping alpha
pub fn load_rgb_image(src: ImageSource<'_>) -> Result<image::RgbImage, DecodeError> {
    let img = load_dynamic_image(src).map_err(DecodeError::Image)?;
    let img = img.to_rgb8();

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::ZeroSized { width, height });
    }

    Ok(img)
}

/// Morphological erosion with a square all-ones kernel, one iteration.
///
/// Each channel of each output pixel is the minimum of that channel over the
/// `kernel_size` x `kernel_size` window centered on it. Pixels outside the
/// image don't take part, so borders are not darkened.
pub fn erode(img: &image::RgbImage, kernel_size: u32) -> image::RgbImage {
    let (width, height) = img.dimensions();
    let radius = kernel_size / 2;

    // separable: a horizontal min pass followed by a vertical one
    let mut horizontal = image::RgbImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius).min(width - 1);

            let mut min = [u8::MAX; 3];
            for sx in x0..=x1 {
                let p = img.get_pixel(sx, y);
                for c in 0..3 {
                    min[c] = min[c].min(p[c]);
                }
            }
            horizontal.put_pixel(x, y, image::Rgb(min));
        }
    }

    let mut out = image::RgbImage::new(width, height);
    for y in 0..height {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius).min(height - 1);

        for x in 0..width {
            let mut min = [u8::MAX; 3];
            for sy in y0..=y1 {
                let p = horizontal.get_pixel(x, sy);
                for c in 0..3 {
                    min[c] = min[c].min(p[c]);
                }
            }
            out.put_pixel(x, y, image::Rgb(min));
        }
    }

    out
}

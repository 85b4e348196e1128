// BEGIN - Embark standard lints v0.4
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_on_vec_items,
    clippy::match_same_arms,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mismatched_target_os,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v0.4

//! `neural-style` renders the content of one image in the style of another.
//!
//! A frozen VGG19 network describes images as activations of its
//! convolution layers. Starting from the content image, the renderer
//! repeatedly nudges the pixels of a canvas so that its deep activations stay
//! close to the content image while the channel correlations (gram matrices)
//! of its activations move towards those of the style image.
//!
//! First, you load a `FeatureExtractor`, which is the only state shared
//! between renders. Then you build a `Session` via a `SessionBuilder`, which
//! follows the builder pattern. Calling `build` on the `SessionBuilder` loads
//! both input images, checks the parameters, and computes the targets.
//!
//! `Session` has a `run()` method that optimizes the canvas for a fixed
//! number of steps and returns the result as a `RenderedImage`, which you can
//! save, stream, or inspect.
//!
//! To serve many requests at once, `RenderPool` runs independent renders on a
//! bounded number of worker threads and hands each result to a `RenderSink`.
//!
//! ## Usage
//!
//! ```no_run
//! use neural_style as ns;
//!
//! let config = ns::ExtractorConfig {
//!     weights_path: Some("models/vgg19".into()),
//!     ..Default::default()
//! };
//! let extractor = ns::FeatureExtractor::<ns::DefaultBackend>::load(&config, &Default::default())?;
//!
//! // Create a new session with default parameters
//! let session = ns::Session::builder()
//!     // Set some parameters
//!     .max_dimension(256)
//!     .content_weight(150.0)
//!     // Specify the input images
//!     .content(&"imgs/modern.png")
//!     .style(&"imgs/historical.png")
//!     // Build the session
//!     .build(&extractor)?;
//!
//! // Render the image
//! let rendered = session.run(None)?;
//!
//! // Save the rendered image to disk
//! rendered.save("out/rendered.png")?;
//! # Ok::<(), ns::Error>(())
//! ```
mod codec;
mod config;
mod errors;
mod extractor;
mod gram;
pub mod loss;
mod optim;
mod pool;
mod render;
pub mod session;
mod utils;
mod vgg;

pub use burn;
pub use image;
use std::path::Path;

pub use codec::ImageCodec;
pub use config::{
    AdamConfig, ExtractorConfig, InputNormalization, LossWeights, RenderConfig, Schedule,
    WeightRange, WeightRanges,
};
pub use errors::{DecodeError, Error, InvalidRange, NumericalDivergence, PostprocessError};
pub use extractor::{FeatureExtractor, LayerActivations, LayerOutput};
pub use gram::gram_matrix;
pub use loss::LossReport;
pub use optim::AdamState;
pub use pool::{DirectorySink, RenderJob, RenderPool, RenderSink};
pub use render::{Phase, RenderState};
pub use session::{ProgressStat, ProgressUpdate, RenderProgress, Session, SessionBuilder};
pub use utils::{load_dynamic_image, ImageSource};
pub use vgg::{LayerId, Vgg19, Vgg19Config};

/// CPU backend with automatic differentiation, which every render needs
pub type DefaultBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;
pub type DefaultDevice = burn::backend::ndarray::NdArrayDevice;

/// Simple dimensions struct
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// The result of a finished render
pub struct RenderedImage {
    image: image::RgbImage,
}

impl RenderedImage {
    /// Saves the rendered image to the specified path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent_path) = path.parent() {
            std::fs::create_dir_all(parent_path)?;
        }

        self.image.save(path)?;
        Ok(())
    }

    /// Writes the rendered image to the specified stream
    pub fn write<W: std::io::Write + std::io::Seek>(
        self,
        writer: &mut W,
        fmt: image::ImageOutputFormat,
    ) -> Result<(), Error> {
        let dyn_img = self.into_image();
        Ok(dyn_img.write_to(writer, fmt)?)
    }

    pub fn dims(&self) -> Dims {
        let (width, height) = self.image.dimensions();
        Dims::new(width, height)
    }

    /// Returns the rendered output image
    pub fn into_image(self) -> image::DynamicImage {
        image::DynamicImage::ImageRgb8(self.image)
    }
}

impl AsRef<image::RgbImage> for RenderedImage {
    fn as_ref(&self) -> &image::RgbImage {
        &self.image
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rendered_image_output() {
        let img = image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30]));
        let rendered = RenderedImage { image: img.clone() };

        assert_eq!(rendered.dims(), Dims::new(3, 2));
        assert_eq!(rendered.as_ref(), &img);

        let mut png = std::io::Cursor::new(Vec::new());
        rendered.write(&mut png, image::ImageOutputFormat::Png).unwrap();

        let decoded = image::load_from_memory(png.get_ref()).unwrap().to_rgb8();
        assert_eq!(decoded, img);
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("neural-style-save-{}", std::process::id()));
        let path = dir.join("nested").join("out.png");

        let rendered = RenderedImage {
            image: image::RgbImage::from_pixel(2, 2, image::Rgb([0, 128, 255])),
        };
        rendered.save(&path).unwrap();

        assert_eq!(image::open(&path).unwrap().to_rgb8().dimensions(), (2, 2));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

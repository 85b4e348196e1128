use std::fmt;
use std::path::PathBuf;

use crate::Phase;

#[derive(Debug)]
pub struct InvalidRange {
    pub(crate) min: f32,
    pub(crate) max: f32,
    pub(crate) value: f32,
    pub(crate) name: &'static str,
}

impl InvalidRange {
    /// Name of the rejected parameter, eg. `content-weight`
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// The accepted inclusive range as `(min, max)`
    pub fn range(&self) -> (f32, f32) {
        (self.min, self.max)
    }
}

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter '{}' - value '{}' is outside the range of {}-{}",
            self.name, self.value, self.min, self.max
        )
    }
}

/// The input could not be turned into an image the codec can work with
#[derive(Debug)]
pub enum DecodeError {
    /// The byte stream or file was not a readable image
    Image(image::ImageError),
    /// The image decoded fine but has no pixels
    ZeroSized { width: u32, height: u32 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(ie) => write!(f, "{}", ie),
            Self::ZeroSized { width, height } => {
                write!(f, "image has a zero sized dimension ({}x{})", width, height)
            }
        }
    }
}

#[derive(Debug)]
pub struct PostprocessError {
    pub(crate) shape: Vec<usize>,
}

impl PostprocessError {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

impl fmt::Display for PostprocessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected a (1, 3, height, width) tensor, got shape {:?}",
            self.shape
        )
    }
}

#[derive(Debug)]
pub struct NumericalDivergence {
    pub(crate) phase: Phase,
    pub(crate) step: usize,
    pub(crate) loss: f32,
}

impl NumericalDivergence {
    /// The phase the render was in when the loss stopped being finite
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Steps completed before the failing one
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn loss(&self) -> f32 {
        self.loss
    }
}

impl fmt::Display for NumericalDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loss became non-finite ({}) at step {} of the {} phase",
            self.loss, self.step, self.phase
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An input image could not be decoded, the render was not started
    #[error("failed to decode {which} image: {source}")]
    Decode {
        which: &'static str,
        source: DecodeError,
    },
    /// The pretrained network weights could not be loaded
    #[error("failed to load model weights from '{}': {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },
    /// The optimized tensor did not have the shape of a single RGB image
    #[error("{0}")]
    Postprocess(PostprocessError),
    /// The loss became NaN or infinite during optimization
    #[error("{0}")]
    NumericalDivergence(NumericalDivergence),
    /// An input parameter had an invalid range specified
    #[error("{0}")]
    InvalidRange(InvalidRange),
    /// A layer name that does not exist in the network
    #[error("unknown layer '{0}', expected a name like 'block4_conv2'")]
    UnknownLayer(String),
    /// A layer group was configured without any layers
    #[error("at least 1 {0} layer must be configured")]
    NoLayers(&'static str),
    /// Neither an image nor a default was provided
    #[error("no {0} image was provided and no default is configured")]
    MissingImage(&'static str),
    /// A pool worker panicked before delivering its render
    #[error("render worker panicked while processing job '{0}'")]
    WorkerPanicked(String),
    /// Reading back tensor data failed
    #[error("tensor data error: {0}")]
    Tensor(String),
    /// An error in the image library occurred while saving or writing
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The configuration file was not valid
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Image(err) => Some(err),
            Self::ZeroSized { .. } => None,
        }
    }
}

impl Error {
    pub(crate) fn decode(which: &'static str, source: DecodeError) -> Self {
        Self::Decode { which, source }
    }

    /// Returns true for errors caused by the caller's input rather than by
    /// the engine itself
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::InvalidRange(_) | Self::MissingImage(_)
        )
    }
}

//! Result getters for jobs tracked by the job service.
//!
//! - [`getter`] -- [`Getter`]: binding, change detection and fetching.
//! - [`convert`] -- per-family converters from raw gateway JSON.
//! - [`cache`] -- processed results keyed by job and consumer.
//! - [`token`] -- the change-detection token.

pub mod cache;
pub mod convert;
pub mod getter;
pub mod token;

pub use cache::ProcessedResultCache;
pub use convert::{
    AudioConverter, AudioOutput, ConversionError, Converter, GeneratedImage, ImageConverter,
    ImageOutput, TextConverter, TextOutput, VideoConverter, VideoOutput,
};
pub use getter::{Fetch, Getter, GetterFailure, GetterFailureKind};
pub use token::ChangeToken;

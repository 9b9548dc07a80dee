//! Image decoding.
//!
//! Cached and downloaded payloads are stored as encoded bytes; decoding
//! happens once per delivery on a blocking worker. Animated GIFs keep their
//! encoded form alongside a first-frame still so callers that only want a
//! static image never pay for full-animation decode.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, ImageFormat};
use thiserror::Error;

/// Errors produced while turning raw bytes into an image.
///
/// Cloneable so a decode failure can fan out to every caller waiting on the
/// same in-flight request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The payload did not match any known image format
    #[error("unrecognized image data")]
    UnrecognizedFormat,

    /// The payload matched a format but failed to decode
    #[error("image decode failed: {0}")]
    Malformed(String),
}

/// An animated image kept in its encoded form.
///
/// Frames are decoded lazily by whatever renders them; the manager only
/// needs the byte payload and enough structure to know it is animated.
#[derive(Debug, Clone)]
pub struct AnimatedImage {
    /// The original encoded payload (GIF)
    pub data: Vec<u8>,
    /// Number of frames in the animation
    pub frame_count: usize,
}

/// Outcome of decoding a payload.
///
/// Exactly one of `image` and `animated` is populated for a successful
/// decode, except for animated formats where `image` also carries the
/// first frame as a still.
#[derive(Debug, Clone, Default)]
pub struct DecodedImage {
    /// Decoded still image (first frame for animations)
    pub image: Option<Arc<DynamicImage>>,
    /// Animated payload, when the format carries multiple frames
    pub animated: Option<Arc<AnimatedImage>>,
}

/// Trait for payload decoding, object-safe so the manager can hold it
/// behind a shared pointer.
pub trait ImageDecoder: Send + Sync {
    /// Decode `bytes` into a still and/or animated image.
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError>;
}

/// Default decoder over the `image` crate.
pub struct DefaultImageDecoder;

impl ImageDecoder for DefaultImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        let format =
            image::guess_format(bytes).map_err(|_| DecodeError::UnrecognizedFormat)?;

        if format == ImageFormat::Gif {
            return decode_gif(bytes);
        }

        let still = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        Ok(DecodedImage {
            image: Some(Arc::new(still)),
            animated: None,
        })
    }
}

/// GIFs with more than one frame yield both an animated payload and a
/// first-frame still; single-frame GIFs decode as plain stills.
fn decode_gif(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    let decoder = GifDecoder::new(Cursor::new(bytes))
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let first = frames
        .first()
        .ok_or_else(|| DecodeError::Malformed("animation contains no frames".to_string()))?;

    let still = DynamicImage::ImageRgba8(first.buffer().clone());
    let animated = if frames.len() > 1 {
        Some(Arc::new(AnimatedImage {
            data: bytes.to_vec(),
            frame_count: frames.len(),
        }))
    } else {
        None
    };

    Ok(DecodedImage {
        image: Some(Arc::new(still)),
        animated,
    })
}

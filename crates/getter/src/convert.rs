//! Conversion of raw gateway responses into typed outputs.
//!
//! Each [`Converter`] serves one [`OutputFamily`]. Conversions are pure
//! functions over the JSON body the gateway returned; a missing or
//! malformed field yields a [`ConversionError`] and leaves the job itself
//! untouched.

use jobrelay_core::{JobKind, OutputFamily};
use serde::Serialize;
use serde_json::Value;

/// A raw result could not be turned into the expected output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("Missing field `{0}`")]
    MissingField(String),

    #[error("Field `{field}` is not {expected}")]
    InvalidField { field: String, expected: &'static str },

    #[error("Field `{0}` is empty")]
    Empty(String),
}

/// Turns the raw result of a completed job into a typed output.
pub trait Converter: Send + Sync {
    type Output: Clone + Send + Sync;

    /// The family of job kinds this converter accepts.
    fn family(&self) -> OutputFamily;

    fn convert(&self, kind: JobKind, raw: &Value) -> Result<Self::Output, ConversionError>;

    /// Whether jobs of `kind` can be converted here.
    fn accepts(&self, kind: JobKind) -> bool {
        kind.output_family() == self.family()
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn field<'a>(raw: &'a Value, name: &str) -> Result<&'a Value, ConversionError> {
    raw.get(name)
        .ok_or_else(|| ConversionError::MissingField(name.to_string()))
}

fn non_empty_array<'a>(raw: &'a Value, name: &str) -> Result<&'a Vec<Value>, ConversionError> {
    let items = field(raw, name)?
        .as_array()
        .ok_or_else(|| ConversionError::InvalidField {
            field: name.to_string(),
            expected: "an array",
        })?;
    if items.is_empty() {
        return Err(ConversionError::Empty(name.to_string()));
    }
    Ok(items)
}

fn non_empty_str(value: &Value, name: &str) -> Result<String, ConversionError> {
    let text = value.as_str().ok_or_else(|| ConversionError::InvalidField {
        field: name.to_string(),
        expected: "a string",
    })?;
    if text.trim().is_empty() {
        return Err(ConversionError::Empty(name.to_string()));
    }
    Ok(text.to_string())
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

/// One generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedImage {
    pub url: String,
    pub seed: Option<u64>,
    pub nsfw: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageOutput {
    pub images: Vec<GeneratedImage>,
}

/// Converter for t2i, i2i, upscale and segment results.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageConverter;

impl Converter for ImageConverter {
    type Output = ImageOutput;

    fn family(&self) -> OutputFamily {
        OutputFamily::Image
    }

    fn convert(&self, _kind: JobKind, raw: &Value) -> Result<ImageOutput, ConversionError> {
        let images = non_empty_array(raw, "images")?
            .iter()
            .map(|image| {
                Ok(GeneratedImage {
                    url: non_empty_str(field(image, "url")?, "images[].url")?,
                    seed: image.get("seed").and_then(Value::as_u64),
                    nsfw: image.get("nsfw").and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect::<Result<Vec<_>, ConversionError>>()?;
        Ok(ImageOutput { images })
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoOutput {
    /// Frame or clip URLs, in the order the gateway returned them.
    pub urls: Vec<String>,
}

/// Converter for i2v and live2video results.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoConverter;

impl Converter for VideoConverter {
    type Output = VideoOutput;

    fn family(&self) -> OutputFamily {
        OutputFamily::Video
    }

    fn convert(&self, _kind: JobKind, raw: &Value) -> Result<VideoOutput, ConversionError> {
        let urls = non_empty_array(raw, "images")?
            .iter()
            .map(|clip| non_empty_str(field(clip, "url")?, "images[].url"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(VideoOutput { urls })
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextOutput {
    pub text: String,
}

/// Converter for a2t, i2t and llm results.
///
/// LLM responses carry the text in `choices[0].message.content`; the
/// other kinds use a top-level `text` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextConverter;

impl Converter for TextConverter {
    type Output = TextOutput;

    fn family(&self) -> OutputFamily {
        OutputFamily::Text
    }

    fn convert(&self, kind: JobKind, raw: &Value) -> Result<TextOutput, ConversionError> {
        let text = match kind {
            JobKind::Llm => {
                let choice = &non_empty_array(raw, "choices")?[0];
                let content = choice
                    .get("message")
                    .and_then(|message| message.get("content"))
                    .ok_or_else(|| {
                        ConversionError::MissingField("choices[0].message.content".to_string())
                    })?;
                non_empty_str(content, "choices[0].message.content")?
            }
            _ => non_empty_str(field(raw, "text")?, "text")?,
        };
        Ok(TextOutput { text })
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioOutput {
    pub url: String,
}

/// Converter for t2s results.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioConverter;

impl Converter for AudioConverter {
    type Output = AudioOutput;

    fn family(&self) -> OutputFamily {
        OutputFamily::Audio
    }

    fn convert(&self, _kind: JobKind, raw: &Value) -> Result<AudioOutput, ConversionError> {
        let audio = field(raw, "audio")?;
        let url = audio
            .get("url")
            .ok_or_else(|| ConversionError::MissingField("audio.url".to_string()))?;
        Ok(AudioOutput {
            url: non_empty_str(url, "audio.url")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn image_response_converts() {
        let raw = json!({"images": [
            {"url": "https://cdn/a.png", "seed": 7, "nsfw": false},
            {"url": "https://cdn/b.png", "nsfw": true},
        ]});
        let output = ImageConverter.convert(JobKind::TextToImage, &raw).unwrap();
        assert_eq!(output.images.len(), 2);
        assert_eq!(output.images[0].seed, Some(7));
        assert_eq!(output.images[1].seed, None);
        assert!(output.images[1].nsfw);
    }

    #[test]
    fn image_without_url_is_rejected() {
        let raw = json!({"images": [{"seed": 1}]});
        assert_matches!(
            ImageConverter.convert(JobKind::Upscale, &raw),
            Err(ConversionError::MissingField(f)) if f == "url"
        );
    }

    #[test]
    fn empty_image_list_is_rejected() {
        assert_matches!(
            ImageConverter.convert(JobKind::TextToImage, &json!({"images": []})),
            Err(ConversionError::Empty(_))
        );
        assert_matches!(
            ImageConverter.convert(JobKind::TextToImage, &json!({"images": "nope"})),
            Err(ConversionError::InvalidField { .. })
        );
    }

    #[test]
    fn video_urls_in_order() {
        let raw = json!({"images": [{"url": "https://cdn/1.mp4"}, {"url": "https://cdn/2.mp4"}]});
        let output = VideoConverter.convert(JobKind::ImageToVideo, &raw).unwrap();
        assert_eq!(output.urls, vec!["https://cdn/1.mp4", "https://cdn/2.mp4"]);
    }

    #[test]
    fn llm_text_comes_from_first_choice() {
        let raw = json!({"choices": [{"message": {"role": "assistant", "content": "Hello"}}]});
        let output = TextConverter.convert(JobKind::Llm, &raw).unwrap();
        assert_eq!(output.text, "Hello");
    }

    #[test]
    fn transcription_text_is_top_level() {
        let raw = json!({"text": "hello world", "chunks": []});
        let output = TextConverter.convert(JobKind::AudioToText, &raw).unwrap();
        assert_eq!(output.text, "hello world");
        assert_matches!(
            TextConverter.convert(JobKind::ImageToText, &json!({"text": "  "})),
            Err(ConversionError::Empty(_))
        );
    }

    #[test]
    fn audio_url_is_nested() {
        let raw = json!({"audio": {"url": "https://cdn/speech.wav"}});
        let output = AudioConverter.convert(JobKind::TextToSpeech, &raw).unwrap();
        assert_eq!(output.url, "https://cdn/speech.wav");
        assert_matches!(
            AudioConverter.convert(JobKind::TextToSpeech, &json!({"audio": {}})),
            Err(ConversionError::MissingField(_))
        );
    }

    #[test]
    fn converters_accept_only_their_family() {
        assert!(ImageConverter.accepts(JobKind::Segment));
        assert!(!ImageConverter.accepts(JobKind::ImageToVideo));
        assert!(TextConverter.accepts(JobKind::Llm));
        assert!(AudioConverter.accepts(JobKind::TextToSpeech));
        assert!(!AudioConverter.accepts(JobKind::AudioToText));
    }
}

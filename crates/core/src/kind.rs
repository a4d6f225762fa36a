//! Remote operation kinds and the output family each one produces.
//!
//! The short codes (`t2i`, `i2v`, ...) are the identifiers used in logs
//! and configuration; [`JobKind::endpoint`] maps each kind onto its
//! gateway route.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The remote operation that produced a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    TextToImage,
    ImageToImage,
    Upscale,
    Segment,
    ImageToVideo,
    LiveVideoToVideo,
    AudioToText,
    ImageToText,
    Llm,
    TextToSpeech,
}

/// Which kind of typed output a job's raw result converts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFamily {
    Image,
    Video,
    Text,
    Audio,
}

impl JobKind {
    pub const ALL: [JobKind; 10] = [
        JobKind::TextToImage,
        JobKind::ImageToImage,
        JobKind::Upscale,
        JobKind::Segment,
        JobKind::ImageToVideo,
        JobKind::LiveVideoToVideo,
        JobKind::AudioToText,
        JobKind::ImageToText,
        JobKind::Llm,
        JobKind::TextToSpeech,
    ];

    /// Short code used in logs and configuration keys.
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::TextToImage => "t2i",
            JobKind::ImageToImage => "i2i",
            JobKind::Upscale => "upscale",
            JobKind::Segment => "segment",
            JobKind::ImageToVideo => "i2v",
            JobKind::LiveVideoToVideo => "live2video",
            JobKind::AudioToText => "a2t",
            JobKind::ImageToText => "i2t",
            JobKind::Llm => "llm",
            JobKind::TextToSpeech => "t2s",
        }
    }

    /// Gateway route for this operation, relative to the base URL.
    pub fn endpoint(self) -> &'static str {
        match self {
            JobKind::TextToImage => "/text-to-image",
            JobKind::ImageToImage => "/image-to-image",
            JobKind::Upscale => "/upscale",
            JobKind::Segment => "/segment-anything-2",
            JobKind::ImageToVideo => "/image-to-video",
            JobKind::LiveVideoToVideo => "/live-video-to-video",
            JobKind::AudioToText => "/audio-to-text",
            JobKind::ImageToText => "/image-to-text",
            JobKind::Llm => "/llm",
            JobKind::TextToSpeech => "/text-to-speech",
        }
    }

    pub fn output_family(self) -> OutputFamily {
        match self {
            JobKind::TextToImage | JobKind::ImageToImage | JobKind::Upscale | JobKind::Segment => {
                OutputFamily::Image
            }
            JobKind::ImageToVideo | JobKind::LiveVideoToVideo => OutputFamily::Video,
            JobKind::AudioToText | JobKind::ImageToText | JobKind::Llm => OutputFamily::Text,
            JobKind::TextToSpeech => OutputFamily::Audio,
        }
    }

    /// Model used when a request does not name one.
    pub fn default_model(self) -> Option<&'static str> {
        match self {
            JobKind::TextToImage => Some("SG161222/RealVisXL_V4.0_Lightning"),
            JobKind::ImageToImage => Some("timbrooks/instruct-pix2pix"),
            JobKind::Upscale => Some("stabilityai/stable-diffusion-x4-upscaler"),
            JobKind::Segment => Some("facebook/sam2-hiera-large"),
            JobKind::ImageToVideo => Some("stabilityai/stable-video-diffusion-img2vid-xt-1-1"),
            JobKind::AudioToText => Some("openai/whisper-large-v3"),
            JobKind::ImageToText => Some("Salesforce/blip-image-captioning-large"),
            JobKind::TextToSpeech => Some("parler-tts/parler-tts-large-v1"),
            JobKind::LiveVideoToVideo | JobKind::Llm => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == needle)
            .ok_or_else(|| CoreError::UnknownKind(s.to_string()))
    }
}

impl OutputFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFamily::Image => "image",
            OutputFamily::Video => "video",
            OutputFamily::Text => "text",
            OutputFamily::Audio => "audio",
        }
    }

    /// Kinds whose results convert into this family.
    pub fn kinds(self) -> impl Iterator<Item = JobKind> {
        JobKind::ALL
            .into_iter()
            .filter(move |kind| kind.output_family() == self)
    }
}

impl fmt::Display for OutputFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn short_codes_parse_back() {
        for kind in JobKind::ALL {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("T2I".parse::<JobKind>().unwrap(), JobKind::TextToImage);
    }

    #[test]
    fn unknown_code_rejected() {
        assert_matches!("t2x".parse::<JobKind>(), Err(CoreError::UnknownKind(s)) if s == "t2x");
    }

    #[test]
    fn image_family_members() {
        let kinds: Vec<_> = OutputFamily::Image.kinds().collect();
        assert_eq!(
            kinds,
            vec![
                JobKind::TextToImage,
                JobKind::ImageToImage,
                JobKind::Upscale,
                JobKind::Segment
            ]
        );
    }

    #[test]
    fn every_kind_belongs_to_one_family() {
        let total: usize = [
            OutputFamily::Image,
            OutputFamily::Video,
            OutputFamily::Text,
            OutputFamily::Audio,
        ]
        .into_iter()
        .map(|family| family.kinds().count())
        .sum();
        assert_eq!(total, JobKind::ALL.len());
    }

    #[test]
    fn llm_has_no_default_model() {
        assert!(JobKind::Llm.default_model().is_none());
        assert!(JobKind::TextToImage.default_model().is_some());
    }
}

//! Command-line arguments.
//!
//! ```text
//! jobrelay [--kind <kind>] [--model <model_id>] <prompt>...
//! ```
//!
//! `kind` is one of the short codes (`t2i`, `llm`, `t2s`, ...) and
//! defaults to `t2i`. Remaining words are joined into the prompt.

use jobrelay_core::{CoreError, JobKind};
use jobrelay_livepeer::JobPayload;

#[derive(Debug, Clone, PartialEq)]
pub struct RunArgs {
    pub kind: JobKind,
    pub model: Option<String>,
    pub prompt: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error("usage: jobrelay [--kind <kind>] [--model <model_id>] <prompt>...")]
    Usage,

    #[error("Missing value for {0}")]
    MissingValue(&'static str),

    #[error(transparent)]
    Kind(#[from] CoreError),
}

impl RunArgs {
    /// Request body for the selected kind. LLM requests carry the prompt
    /// as a single user message; every other kind takes a `prompt` field.
    pub fn payload(&self) -> JobPayload {
        let payload = match self.kind {
            JobKind::Llm => JobPayload::new().with_param(
                "messages",
                serde_json::json!([{"role": "user", "content": self.prompt}]),
            ),
            JobKind::TextToSpeech => JobPayload::new().with_param("text", self.prompt.clone()),
            _ => JobPayload::new().with_param("prompt", self.prompt.clone()),
        };
        match &self.model {
            Some(model) => payload.with_param("model_id", model.clone()),
            None => payload,
        }
    }
}

pub fn parse<I>(args: I) -> Result<RunArgs, ArgsError>
where
    I: IntoIterator<Item = String>,
{
    let mut kind = JobKind::TextToImage;
    let mut model = None;
    let mut words = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(ArgsError::Usage),
            "--kind" => {
                kind = args.next().ok_or(ArgsError::MissingValue("--kind"))?.parse()?;
            }
            "--model" => {
                model = Some(args.next().ok_or(ArgsError::MissingValue("--model"))?);
            }
            _ => words.push(arg),
        }
    }

    let prompt = words.join(" ");
    if prompt.trim().is_empty() {
        return Err(ArgsError::Usage);
    }
    Ok(RunArgs {
        kind,
        model,
        prompt,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn prompt_defaults_to_text_to_image() {
        let parsed = parse(args(&["a", "lighthouse"])).unwrap();
        assert_eq!(parsed.kind, JobKind::TextToImage);
        assert_eq!(parsed.prompt, "a lighthouse");
        assert_eq!(parsed.payload().params["prompt"], "a lighthouse");
    }

    #[test]
    fn kind_and_model_flags() {
        let parsed = parse(args(&["--kind", "llm", "--model", "meta-llama/x", "hi"])).unwrap();
        assert_eq!(parsed.kind, JobKind::Llm);
        let payload = parsed.payload();
        assert_eq!(payload.params["model_id"], "meta-llama/x");
        assert_eq!(payload.params["messages"][0]["content"], "hi");
    }

    #[test]
    fn bad_input_is_rejected() {
        assert_matches!(parse(args(&[])), Err(ArgsError::Usage));
        assert_matches!(parse(args(&["--kind"])), Err(ArgsError::MissingValue("--kind")));
        assert_matches!(parse(args(&["--kind", "nope", "x"])), Err(ArgsError::Kind(_)));
    }
}

//! Command-line plumbing for the `zeniji-render` binary.
//!
//! ```text
//! zeniji-render [--out DIR] [--appearance TEXT] [--age N]
//!               [--background TEXT] [--emotion TEXT] [VISUAL PROMPT...]
//! ```
//!
//! Without any scene flag the positional words (or `ZENIJI_PROMPT`) are
//! sent as the prompt verbatim. With scene flags they become the visual
//! part of a [`ScenePrompt`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use clap::Parser;
use zeniji_core::prompt::ScenePrompt;

/// Output directory used when `--out` is not given.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Render one portrait through a ComfyUI server.
#[derive(Debug, Parser)]
#[command(name = "zeniji-render")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory the portrait is written to
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    pub out: PathBuf,

    /// Character appearance (switches to scene mode)
    #[arg(long)]
    pub appearance: Option<String>,

    /// Character age in years (switches to scene mode)
    #[arg(long)]
    pub age: Option<u32>,

    /// Scene background (switches to scene mode)
    #[arg(long)]
    pub background: Option<String>,

    /// Character emotion (switches to scene mode)
    #[arg(long)]
    pub emotion: Option<String>,

    /// Visual prompt
    #[arg(env = "ZENIJI_PROMPT")]
    pub words: Vec<String>,
}

impl Args {
    fn has_scene_flags(&self) -> bool {
        self.appearance.is_some()
            || self.age.is_some()
            || self.background.is_some()
            || self.emotion.is_some()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CliError {
    #[error("No prompt given")]
    EmptyPrompt,
}

/// What to render.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptSource {
    Raw(String),
    Scene(ScenePrompt),
}

impl PromptSource {
    pub fn text(&self) -> String {
        match self {
            PromptSource::Raw(prompt) => prompt.clone(),
            PromptSource::Scene(scene) => scene.assemble(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub prompt: PromptSource,
    pub output_dir: PathBuf,
}

impl TryFrom<Args> for RenderRequest {
    type Error = CliError;

    fn try_from(args: Args) -> Result<Self, CliError> {
        let scene_mode = args.has_scene_flags();
        let text = args.words.join(" ");

        let prompt = if scene_mode {
            PromptSource::Scene(ScenePrompt {
                appearance: args.appearance.unwrap_or_default(),
                age: args.age.unwrap_or_default(),
                visual_prompt: text,
                background: args.background.unwrap_or_default(),
                emotion: args.emotion.unwrap_or_default(),
            })
        } else if text.trim().is_empty() {
            return Err(CliError::EmptyPrompt);
        } else {
            PromptSource::Raw(text)
        };

        Ok(Self {
            prompt,
            output_dir: args.out,
        })
    }
}

/// Timestamped file name for a rendered portrait, e.g.
/// `portrait_20261018_142501.png`.
pub fn output_file_name(now: DateTime<Local>) -> String {
    format!("portrait_{}.png", now.format("%Y%m%d_%H%M%S"))
}

/// Write `bytes` below `dir`, creating the directory if needed.
pub fn save_artifact(dir: &Path, now: DateTime<Local>, bytes: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(output_file_name(now));
    std::fs::write(&path, bytes)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    fn request(list: &[&str]) -> Result<RenderRequest, CliError> {
        let argv = std::iter::once("zeniji-render").chain(list.iter().copied());
        RenderRequest::try_from(Args::try_parse_from(argv).unwrap())
    }

    #[test]
    fn positional_words_form_raw_prompt() {
        let request = request(&["a", "castle", "at", "dusk"]).unwrap();
        assert_eq!(request.prompt, PromptSource::Raw("a castle at dusk".into()));
        assert_eq!(request.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
    }

    #[test]
    fn scene_flags_build_scene_prompt() {
        let request = request(&[
            "--age", "24", "--appearance", "red hair", "--out", "shots", "waving",
        ])
        .unwrap();
        assert_eq!(request.output_dir, PathBuf::from("shots"));
        assert_matches!(
            request.prompt,
            PromptSource::Scene(ref scene)
                if scene.age == 24 && scene.appearance == "red hair" && scene.visual_prompt == "waving"
        );
    }

    #[test]
    fn empty_prompt_without_scene_is_rejected() {
        let args = Args {
            out: PathBuf::from(DEFAULT_OUTPUT_DIR),
            appearance: None,
            age: None,
            background: None,
            emotion: None,
            words: vec!["  ".into()],
        };
        assert_eq!(RenderRequest::try_from(args).unwrap_err(), CliError::EmptyPrompt);
    }

    #[test]
    fn malformed_flags_are_reported_by_clap() {
        let parse = |list: &[&str]| {
            Args::try_parse_from(std::iter::once("zeniji-render").chain(list.iter().copied()))
        };
        assert_matches!(
            parse(&["--age", "old"]),
            Err(e) if e.kind() == clap::error::ErrorKind::ValueValidation
        );
        assert!(parse(&["--out"]).is_err());
        assert_matches!(
            parse(&["--colour", "x"]),
            Err(e) if e.kind() == clap::error::ErrorKind::UnknownArgument
        );
    }

    #[test]
    fn saves_with_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2026, 10, 18, 14, 25, 1).unwrap();
        let path = save_artifact(&dir.path().join("nested"), now, b"png").unwrap();
        assert!(path.ends_with("portrait_20261018_142501.png"));
        assert_eq!(std::fs::read(path).unwrap(), b"png");
    }
}

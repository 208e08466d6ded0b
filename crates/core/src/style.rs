//! Rendering styles and their per-style defaults.
//!
//! Each style pairs a job template with the model, encoder, decoder,
//! style adapter and sampler settings it was authored for. Only the SDXL
//! style uses a quality tag and a negative prompt; the photoreal style's
//! text encoder ignores both.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::mutator::{GenerationParams, SamplerSettings, SeedPolicy, StyleAdapter};

/// Quality tag prefixed to SDXL prompts when none is configured.
pub const DEFAULT_QUALITY_TAG: &str = "masterpiece, best quality, very awa";

/// Negative prompt injected for SDXL when none is configured.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "(bad quality, worst quality, low quality), 3d, 3d rendering, manga, cartoon, 2d, fatty, thick body, big body, huge breasts, muscular, mole, watermark, text";

/// Upscaler model used when none is configured.
pub const DEFAULT_UPSCALE_MODEL: &str = "4x-UltraSharp.pth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderStyle {
    /// Photoreal Z-image pipeline.
    #[default]
    #[serde(rename = "QWEN/Z-image")]
    Qwen,
    /// 2D illustration pipeline.
    #[serde(rename = "SDXL")]
    Sdxl,
}

impl RenderStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderStyle::Qwen => "QWEN/Z-image",
            RenderStyle::Sdxl => "SDXL",
        }
    }

    /// Whether the quality tag and negative prompt are written for this style.
    pub fn injects_negative_prompt(self) -> bool {
        matches!(self, RenderStyle::Sdxl)
    }

    pub fn preset(self) -> StylePreset {
        match self {
            RenderStyle::Qwen => StylePreset {
                style: self,
                workflow_path: "workflows/comfyui_real.json".to_string(),
                model_name: "Zeniji_mix_ZiT_v1.safetensors".to_string(),
                decoder_name: Some("zImage_vae.safetensors".to_string()),
                text_encoder_name: Some("zImage_textEncoder.safetensors".to_string()),
                style_adapter: Some(StyleAdapter {
                    name: "ZiT_K_beauty_A.safetensors".to_string(),
                    strength: 1.0,
                }),
                sampler: SamplerSettings {
                    steps: 9,
                    cfg: 1.0,
                    sampler_name: "euler".to_string(),
                    scheduler: "simple".to_string(),
                },
            },
            RenderStyle::Sdxl => StylePreset {
                style: self,
                workflow_path: "workflows/comfyui_2d.json".to_string(),
                model_name: "Zeniji_Mix K-Webtoon.safetensors".to_string(),
                decoder_name: Some("sdxl_vae.safetensors".to_string()),
                // SDXL checkpoints bundle their own text encoder.
                text_encoder_name: None,
                style_adapter: None,
                sampler: SamplerSettings {
                    steps: 30,
                    cfg: 5.0,
                    sampler_name: "euler".to_string(),
                    scheduler: "simple".to_string(),
                },
            },
        }
    }
}

impl fmt::Display for RenderStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderStyle {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qwen/z-image" | "qwen" | "z-image" => Ok(RenderStyle::Qwen),
            "sdxl" => Ok(RenderStyle::Sdxl),
            other => Err(CoreError::InvalidConfig(format!(
                "unknown render style '{other}' (expected 'QWEN/Z-image' or 'SDXL')"
            ))),
        }
    }
}

/// Template path and generation defaults for one style.
#[derive(Debug, Clone, PartialEq)]
pub struct StylePreset {
    pub style: RenderStyle,
    pub workflow_path: String,
    pub model_name: String,
    pub decoder_name: Option<String>,
    pub text_encoder_name: Option<String>,
    /// Applied only when style adapters are enabled.
    pub style_adapter: Option<StyleAdapter>,
    pub sampler: SamplerSettings,
}

/// Per-render knobs layered on top of a [`StylePreset`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub use_style_adapter: bool,
    pub quality_tag: String,
    pub negative_prompt: String,
    pub upscaler_name: Option<String>,
    pub seed: SeedPolicy,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            use_style_adapter: false,
            quality_tag: DEFAULT_QUALITY_TAG.to_string(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            upscaler_name: Some(DEFAULT_UPSCALE_MODEL.to_string()),
            seed: SeedPolicy::Random,
        }
    }
}

impl StylePreset {
    /// Build the mutator parameter bundle for `prompt`.
    ///
    /// SDXL prompts get the quality tag prefix and the configured negative
    /// prompt; other styles leave the negative prompt empty.
    pub fn params_for(&self, prompt: &str, options: &RenderOptions) -> GenerationParams {
        let injects = self.style.injects_negative_prompt();

        let prompt = match (injects, options.quality_tag.trim()) {
            (true, tag) if !tag.is_empty() => format!("{tag}, {prompt}"),
            _ => prompt.to_string(),
        };

        let negative_prompt = (injects && !options.negative_prompt.trim().is_empty())
            .then(|| options.negative_prompt.clone());

        let style_adapter = if options.use_style_adapter {
            self.style_adapter.clone()
        } else {
            None
        };

        GenerationParams {
            prompt,
            negative_prompt,
            model_name: Some(self.model_name.clone()),
            text_encoder_name: self.text_encoder_name.clone(),
            decoder_name: self.decoder_name.clone(),
            style_adapter,
            upscaler_name: options.upscaler_name.clone(),
            sampler: self.sampler.clone(),
            seed: options.seed,
            ..Default::default()
        }
    }
}

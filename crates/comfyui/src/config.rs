use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use zeniji_core::error::CoreError;
use zeniji_core::style::{
    RenderOptions, RenderStyle, DEFAULT_NEGATIVE_PROMPT, DEFAULT_QUALITY_TAG,
    DEFAULT_UPSCALE_MODEL,
};

use crate::waiter::WaitConfig;

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a ComfyUI server running on the
/// same machine.
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    /// Server host (default: `127.0.0.1`).
    pub host: String,
    /// Server port (default: `8000`).
    pub port: u16,
    /// Use `https`/`wss` instead of `http`/`ws` (default: `false`).
    pub secure: bool,
    /// Rendering style (default: `QWEN/Z-image`).
    pub style: RenderStyle,
    /// Directory that holds the `workflows/` templates (default: `.`).
    pub workflow_root: PathBuf,
    /// Apply the style's LoRA adapter (default: `false`).
    pub use_style_adapter: bool,
    pub quality_tag: String,
    pub negative_prompt: String,
    /// Upscaler model; an empty value keeps the template's choice.
    pub upscaler_name: Option<String>,
    /// Timeout of the `/system_stats` probe (default: 3 s).
    pub probe_timeout: Duration,
    /// Timeout of the WebSocket handshake (default: 5 s).
    pub channel_open_timeout: Duration,
    pub wait: WaitConfig,
}

impl Default for ComfyUIConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            secure: false,
            style: RenderStyle::default(),
            workflow_root: PathBuf::from("."),
            use_style_adapter: false,
            quality_tag: DEFAULT_QUALITY_TAG.into(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.into(),
            upscaler_name: Some(DEFAULT_UPSCALE_MODEL.into()),
            probe_timeout: Duration::from_secs(3),
            channel_open_timeout: Duration::from_secs(5),
            wait: WaitConfig::default(),
        }
    }
}

impl ComfyUIConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default            |
    /// |----------------------------------|--------------------|
    /// | `COMFYUI_HOST`                   | `127.0.0.1`        |
    /// | `COMFYUI_PORT`                   | `8000`             |
    /// | `COMFYUI_SECURE`                 | `false`            |
    /// | `COMFYUI_STYLE`                  | `QWEN/Z-image`     |
    /// | `COMFYUI_WORKFLOW_ROOT`          | `.`                |
    /// | `COMFYUI_USE_LORA`               | `false`            |
    /// | `COMFYUI_QUALITY_TAG`            | built-in tag       |
    /// | `COMFYUI_NEGATIVE_PROMPT`        | built-in prompt    |
    /// | `COMFYUI_UPSCALE_MODEL`          | `4x-UltraSharp.pth`|
    /// | `COMFYUI_PROBE_TIMEOUT_SECS`     | `3`                |
    /// | `COMFYUI_CHANNEL_TIMEOUT_SECS`   | `5`                |
    /// | `COMFYUI_POLL_INTERVAL_MS`       | `500`              |
    /// | `COMFYUI_COMPLETION_GRACE_SECS`  | `10`               |
    /// | `COMFYUI_HARD_TIMEOUT_SECS`      | `180`              |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("COMFYUI_HOST").unwrap_or(defaults.host);
        let port = parse_or(&var, "COMFYUI_PORT", defaults.port)?;
        let secure = parse_flag(&var, "COMFYUI_SECURE", defaults.secure)?;
        let style = match var("COMFYUI_STYLE") {
            Some(raw) => RenderStyle::from_str(&raw)?,
            None => defaults.style,
        };
        let workflow_root = var("COMFYUI_WORKFLOW_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.workflow_root);
        let use_style_adapter = parse_flag(&var, "COMFYUI_USE_LORA", defaults.use_style_adapter)?;
        let quality_tag = var("COMFYUI_QUALITY_TAG").unwrap_or(defaults.quality_tag);
        let negative_prompt = var("COMFYUI_NEGATIVE_PROMPT").unwrap_or(defaults.negative_prompt);
        let upscaler_name = match lookup("COMFYUI_UPSCALE_MODEL") {
            Some(name) if name.trim().is_empty() => None,
            Some(name) => Some(name),
            None => defaults.upscaler_name,
        };

        let probe_timeout = Duration::from_secs(parse_or(
            &var,
            "COMFYUI_PROBE_TIMEOUT_SECS",
            defaults.probe_timeout.as_secs(),
        )?);
        let channel_open_timeout = Duration::from_secs(parse_or(
            &var,
            "COMFYUI_CHANNEL_TIMEOUT_SECS",
            defaults.channel_open_timeout.as_secs(),
        )?);
        let wait = WaitConfig {
            poll_interval: Duration::from_millis(parse_or(
                &var,
                "COMFYUI_POLL_INTERVAL_MS",
                defaults.wait.poll_interval.as_millis() as u64,
            )?),
            completion_grace: Duration::from_secs(parse_or(
                &var,
                "COMFYUI_COMPLETION_GRACE_SECS",
                defaults.wait.completion_grace.as_secs(),
            )?),
            hard_timeout: Duration::from_secs(parse_or(
                &var,
                "COMFYUI_HARD_TIMEOUT_SECS",
                defaults.wait.hard_timeout.as_secs(),
            )?),
        };
        if wait.poll_interval.is_zero() {
            return Err(CoreError::InvalidConfig(
                "COMFYUI_POLL_INTERVAL_MS must be greater than zero".into(),
            ));
        }

        Ok(Self {
            host,
            port,
            secure,
            style,
            workflow_root,
            use_style_adapter,
            quality_tag,
            negative_prompt,
            upscaler_name,
            probe_timeout,
            channel_open_timeout,
            wait,
        })
    }

    /// HTTP base URL, e.g. `http://127.0.0.1:8000`.
    pub fn api_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// WebSocket base URL, e.g. `ws://127.0.0.1:8000`.
    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Per-render options derived from this configuration.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            use_style_adapter: self.use_style_adapter,
            quality_tag: self.quality_tag.clone(),
            negative_prompt: self.negative_prompt.clone(),
            upscaler_name: self.upscaler_name.clone(),
            ..Default::default()
        }
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::InvalidConfig(format!("{key}='{raw}': {e}"))),
        None => Ok(default),
    }
}

fn parse_flag<F>(var: &F, key: &str, default: bool) -> Result<bool, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(CoreError::InvalidConfig(format!(
            "{key}='{v}' is not a boolean"
        ))),
        None => Ok(default),
    }
}

//! Configuration for stage programs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::template::TemplateVars;

/// Command line of one stage program.
///
/// Arguments may reference `{id}`, `{id_model}`, `{workspace}`, `{request}`,
/// `{asset}`, `{frames}`, `{output}`, `{kind}`, `{flyby}`, `{scene_effect}`,
/// `{post_effect}`, `{duration}` and `{start_frame}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl StageCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments with placeholders substituted.
    pub fn expand_args(&self, vars: &TemplateVars) -> Vec<String> {
        self.args.iter().map(|arg| vars.expand(arg)).collect()
    }
}

/// Configuration for all stage programs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    /// Per-stage timeout in seconds; unset means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default = "default_render")]
    pub render: StageCommand,

    #[serde(default = "default_upscale")]
    pub upscale: StageCommand,

    #[serde(default = "default_compose")]
    pub compose: StageCommand,
}

fn default_render() -> StageCommand {
    StageCommand::new(
        "python",
        [
            "../PixelRendererBlender/blender_rendering.py",
            "--input={asset}",
            "--output={frames}",
            "--config={request}",
        ],
    )
}

fn default_upscale() -> StageCommand {
    StageCommand::new(
        "python",
        [
            "../PixelRendererPost/upscale.py",
            "--input={frames}",
            "--output={output}",
            "--effect={post_effect}",
        ],
    )
}

fn default_compose() -> StageCommand {
    StageCommand::new(
        "ffmpeg",
        [
            "-y",
            "-loglevel",
            "warning",
            "-framerate",
            "24",
            "-start_number",
            "{start_frame}",
            "-i",
            "{frames}/%04d.png",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "{output}",
        ],
    )
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            render: default_render(),
            upscale: default_upscale(),
            compose: default_compose(),
        }
    }
}

impl StagesConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// All stage commands with their config key.
    pub fn commands(&self) -> [(&'static str, &StageCommand); 3] {
        [
            ("render", &self.render),
            ("upscale", &self.upscale),
            ("compose", &self.compose),
        ]
    }
}

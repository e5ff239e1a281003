//! Types for render jobs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a job or model identifier, in bytes.
const MAX_ID_LEN: usize = 128;

/// Errors produced while decoding or validating a request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Message body is not a valid request document.
    #[error("invalid request document: {0}")]
    Json(#[from] serde_json::Error),

    /// An identifier cannot be used as a path component.
    #[error("invalid {field} {value:?}: {reason}")]
    InvalidId {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// What a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "KindRepr", into = "u8")]
pub enum RenderKind {
    /// Single still image, upscaled.
    Image,
    /// Flyby video composed from rendered frames.
    Video,
}

impl RenderKind {
    /// Wire code used by the queue producers.
    pub fn code(self) -> u8 {
        match self {
            Self::Image => 0,
            Self::Video => 1,
        }
    }

    /// Extension of the final artifact.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Image => "png",
            Self::Video => "mp4",
        }
    }

    /// Remote folder under `renders/` for the final artifact.
    pub fn remote_folder(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl From<RenderKind> for u8 {
    fn from(kind: RenderKind) -> Self {
        kind.code()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KindRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<KindRepr> for RenderKind {
    type Error = String;

    fn try_from(repr: KindRepr) -> Result<Self, Self::Error> {
        match repr {
            KindRepr::Code(0) => Ok(Self::Image),
            KindRepr::Code(1) => Ok(Self::Video),
            KindRepr::Code(other) => Err(format!("unknown render type code: {}", other)),
            KindRepr::Name(name) => match name.to_ascii_lowercase().as_str() {
                "image" => Ok(Self::Image),
                "video" | "flyby" => Ok(Self::Video),
                _ => Err(format!("unknown render type: {}", name)),
            },
        }
    }
}

/// How a job should be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderingSettings {
    #[serde(rename = "type", alias = "kind")]
    pub kind: RenderKind,
    #[serde(default)]
    pub flyby: u32,
    #[serde(default, alias = "sceneEffect")]
    pub scene_effect: u32,
    #[serde(default, alias = "postEffect")]
    pub post_effect: u32,
    #[serde(default)]
    pub duration: u32,
    #[serde(default, alias = "startFrame")]
    pub start_frame: u32,
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Fetching,
    Rendering,
    Upscaling,
    Composing,
    Publishing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Rendering => "rendering",
            Self::Upscaling => "upscaling",
            Self::Composing => "composing",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller credential scoped to one job's storage operations.
///
/// The value is only reachable through [`IdToken::expose`]; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdToken(String);

impl IdToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for IdToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdToken(***)")
    }
}

/// A render job as carried by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderingRequest {
    pub id: String,
    #[serde(alias = "idToken")]
    pub id_token: IdToken,
    #[serde(alias = "idModel")]
    pub id_model: String,
    #[serde(default)]
    pub status: JobStatus,
    pub settings: RenderingSettings,
}

/// Token-free view of a request, safe to mirror outside the workspace.
#[derive(Debug, Serialize)]
pub struct StatusSnapshot<'a> {
    pub id: &'a str,
    pub id_model: &'a str,
    pub status: JobStatus,
    pub settings: &'a RenderingSettings,
}

impl RenderingRequest {
    /// Decodes and validates a queue message body.
    pub fn from_json(body: &str) -> Result<Self, RequestError> {
        let request: Self = serde_json::from_str(body)?;
        request.validate()?;
        Ok(request)
    }

    /// Checks that identifiers are safe to use in local and remote paths.
    pub fn validate(&self) -> Result<(), RequestError> {
        validate_job_id("id", &self.id)?;
        validate_job_id("id_model", &self.id_model)
    }

    pub fn status_snapshot(&self) -> StatusSnapshot<'_> {
        StatusSnapshot {
            id: &self.id,
            id_model: &self.id_model,
            status: self.status,
            settings: &self.settings,
        }
    }

    /// Remote path the request snapshot is mirrored to.
    pub fn snapshot_remote_path(&self) -> String {
        format!("configs/requests/{}.json", self.id)
    }

    /// File name of the final artifact inside the workspace.
    pub fn result_file_name(&self) -> String {
        format!("{}.{}", self.id, self.settings.kind.extension())
    }

    /// Remote path the final artifact is published to.
    pub fn result_remote_path(&self) -> String {
        format!(
            "renders/{}/{}/{}",
            self.settings.kind.remote_folder(),
            self.id_model,
            self.result_file_name()
        )
    }
}

/// Validates that `value` is a single safe path component.
pub fn validate_job_id(field: &'static str, value: &str) -> Result<(), RequestError> {
    let invalid = |reason| RequestError::InvalidId {
        field,
        value: value.to_string(),
        reason,
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(invalid("too long"));
    }
    if value == "." || value == ".." {
        return Err(invalid("reserved name"));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        return Err(invalid("contains characters outside [A-Za-z0-9._-]"));
    }
    Ok(())
}

//! The boundary between the pilot and the browser tab it drives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SurfaceError;
use crate::types::{NavDirection, Profile, ScrollDirection};

/// Opaque handle for a browsable context (a tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub String);

/// Messages understood by the content handler running inside the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SurfaceRequest {
    Scroll { direction: ScrollDirection },
    GetText,
    Click { target: String },
    Type { target: String, text: String },
    FillForm { profile: Profile },
    GetPageInfo,
}

/// Reply from the content handler. Which fields are set depends on the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceReply {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_text: Option<String>,
}

impl SurfaceReply {
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

/// Tab controller plus the message channel to its content handler.
#[async_trait]
pub trait Surface: Send + Sync {
    /// The tab commands act on.
    async fn active(&self) -> Result<SurfaceId, SurfaceError>;

    /// Relay a request to the content handler of `id`.
    async fn send(&self, id: &SurfaceId, request: SurfaceRequest) -> Result<SurfaceReply, SurfaceError>;

    async fn navigate(&self, id: &SurfaceId, direction: NavDirection) -> Result<(), SurfaceError>;

    /// Point `id` at a new location.
    async fn set_location(&self, id: &SurfaceId, url: &str) -> Result<(), SurfaceError>;

    /// Open a new tab, optionally at `url`. The new tab becomes active.
    async fn open(&self, url: Option<&str>) -> Result<SurfaceId, SurfaceError>;

    async fn close(&self, id: &SurfaceId) -> Result<(), SurfaceError>;
}

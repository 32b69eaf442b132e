//! Host-side actions behind the declared tools.

use crate::session::{ToolDispatcher, ToolHandler};
use anyhow::{Context, Result};
use async_trait::async_trait;
use jarvis_core::tools::{PlayYoutubeArgs, ToolName};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tracing::info;

const YOUTUBE_SEARCH: &str = "https://www.youtube.com/results?search_query=";

pub fn youtube_search_url(query: &str) -> String {
    format!("{YOUTUBE_SEARCH}{}", urlencoding::encode(query.trim()))
}

/// Opens a URL outside the process.
#[cfg_attr(test, mockall::automock)]
pub trait LinkOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Opens links with the desktop's default handler.
#[derive(Debug, Default, Clone)]
pub struct XdgOpener;

impl LinkOpener for XdgOpener {
    fn open(&self, url: &str) -> Result<()> {
        std::process::Command::new("xdg-open")
            .arg(url)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to launch xdg-open for {url}"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraFacing {
    #[default]
    User,
    Environment,
}

impl CameraFacing {
    fn flipped(self) -> Self {
        match self {
            CameraFacing::User => CameraFacing::Environment,
            CameraFacing::Environment => CameraFacing::User,
        }
    }
}

/// Which camera feeds the video input.
#[derive(Debug, Default, Clone)]
pub struct CameraSelector {
    facing: Arc<Mutex<CameraFacing>>,
}

impl CameraSelector {
    pub fn facing(&self) -> CameraFacing {
        *self.lock()
    }

    fn switch(&self) -> CameraFacing {
        let mut facing = self.lock();
        *facing = facing.flipped();
        *facing
    }

    fn reset(&self) {
        *self.lock() = CameraFacing::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CameraFacing> {
        match self.facing.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct SwitchCamera(pub CameraSelector);

#[async_trait]
impl ToolHandler for SwitchCamera {
    async fn call(&self, _args: Value) -> Result<Value> {
        let facing = self.0.switch();
        info!(?facing, "Switching optical sensors.");
        Ok(json!("Camera switched"))
    }
}

pub struct PlayYoutube(pub Arc<dyn LinkOpener>);

#[async_trait]
impl ToolHandler for PlayYoutube {
    async fn call(&self, args: Value) -> Result<Value> {
        let args: PlayYoutubeArgs =
            serde_json::from_value(args).context("play_youtube needs a string `query`")?;
        let url = youtube_search_url(&args.query);
        info!(%url, "Opening YouTube search.");
        self.0.open(&url)?;
        Ok(json!("Opened YouTube"))
    }
}

/// Restores the default display: front camera.
pub struct ResetMirror(pub CameraSelector);

#[async_trait]
impl ToolHandler for ResetMirror {
    async fn call(&self, _args: Value) -> Result<Value> {
        self.0.reset();
        info!("Display reset to defaults.");
        Ok(Value::Null)
    }
}

/// A dispatcher with every declared tool wired to a host action.
pub fn host_dispatcher(camera: CameraSelector, opener: Arc<dyn LinkOpener>) -> ToolDispatcher {
    ToolDispatcher::new()
        .register(ToolName::SwitchCamera, SwitchCamera(camera.clone()))
        .register(ToolName::PlayYoutube, PlayYoutube(opener))
        .register(ToolName::ResetMirror, ResetMirror(camera))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarvis_core::tools::ToolCall;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "call-7".into(),
            name: name.into(),
            args,
        }
    }

    #[test]
    fn test_youtube_search_url_is_encoded() {
        assert_eq!(
            youtube_search_url(" lofi hip hop & chill "),
            "https://www.youtube.com/results?search_query=lofi%20hip%20hop%20%26%20chill"
        );
    }

    #[tokio::test]
    async fn test_play_youtube_opens_search() {
        let mut opener = MockLinkOpener::new();
        opener
            .expect_open()
            .withf(|url| url.ends_with("search_query=iron%20man%20suit"))
            .times(1)
            .returning(|_| Ok(()));
        let dispatcher = host_dispatcher(CameraSelector::default(), Arc::new(opener));

        let response = dispatcher
            .dispatch(call("play_youtube", json!({ "query": "iron man suit" })))
            .await;
        assert_eq!(response.response, json!({ "result": "Opened YouTube" }));
    }

    #[tokio::test]
    async fn test_play_youtube_without_query_fails_cleanly() {
        let mut opener = MockLinkOpener::new();
        opener.expect_open().never();
        let dispatcher = host_dispatcher(CameraSelector::default(), Arc::new(opener));

        let response = dispatcher.dispatch(call("play_youtube", json!({}))).await;
        assert!(response.is_error());
        assert!(response.response["error"]
            .as_str()
            .unwrap()
            .starts_with("Tool execution failed: play_youtube needs a string `query`"));
    }

    #[tokio::test]
    async fn test_opener_failure_becomes_error_response() {
        let mut opener = MockLinkOpener::new();
        opener
            .expect_open()
            .returning(|_| Err(anyhow::anyhow!("no browser")));
        let dispatcher = host_dispatcher(CameraSelector::default(), Arc::new(opener));

        let response = dispatcher
            .dispatch(call("play_youtube", json!({ "query": "x" })))
            .await;
        assert_eq!(response.response, json!({ "error": "Tool execution failed: no browser" }));
    }

    #[tokio::test]
    async fn test_switch_and_reset_camera() {
        let camera = CameraSelector::default();
        let dispatcher = host_dispatcher(camera.clone(), Arc::new(MockLinkOpener::new()));

        let switched = dispatcher.dispatch(call("switch_camera", json!({}))).await;
        assert_eq!(switched.response, json!({ "result": "Camera switched" }));
        assert_eq!(camera.facing(), CameraFacing::Environment);

        let reset = dispatcher.dispatch(call("reset_mirror", json!({}))).await;
        assert_eq!(reset.response, json!({ "result": "ok" }));
        assert_eq!(camera.facing(), CameraFacing::User);
    }
}

//! [`Surface`] on top of a Chrome instance driven over DevTools.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::dom;
use crate::error::SurfaceError;
use crate::surface::{Surface, SurfaceId, SurfaceReply, SurfaceRequest};
use crate::types::NavDirection;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Browser plus the tab commands act on. Created once, reused for all commands.
pub struct BrowserSession {
    browser: Browser,
    active: Arc<Tab>,
}

impl BrowserSession {
    /// Attach to a running Chrome through its DevTools websocket.
    pub fn connect(ws_url: &str) -> Result<Self> {
        let browser = Browser::connect(ws_url.to_string())?;
        let existing = browser
            .get_tabs()
            .lock()
            .map_err(|_| anyhow!("tab list poisoned"))?
            .first()
            .cloned();
        let active = match existing {
            Some(tab) => {
                info!("using existing tab");
                tab
            }
            None => {
                info!("no tabs found, creating one");
                browser.new_tab()?
            }
        };
        Ok(Self { browser, active })
    }

    /// Start a dedicated Chrome with its own profile directory.
    pub fn launch(chrome_path: Option<PathBuf>, profile_dir: PathBuf, headless: bool) -> Result<Self> {
        std::fs::create_dir_all(&profile_dir)
            .with_context(|| format!("creating browser profile at {}", profile_dir.display()))?;

        let options = LaunchOptions {
            headless,
            path: chrome_path,
            user_data_dir: Some(profile_dir),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(60 * 60),
            ..Default::default()
        };

        let browser = Browser::new(options).map_err(|e| anyhow!("browser launch failed: {e}"))?;
        let active = browser.new_tab()?;
        active.navigate_to("about:blank")?;
        Ok(Self { browser, active })
    }

    fn tabs(&self) -> Result<Vec<Arc<Tab>>> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| anyhow!("tab list poisoned"))?;
        Ok(tabs.clone())
    }

    fn tab(&self, id: &SurfaceId) -> Result<Arc<Tab>> {
        if self.active.get_target_id() == &id.0 {
            return Ok(self.active.clone());
        }
        self.tabs()?
            .into_iter()
            .find(|tab| tab.get_target_id() == &id.0)
            .ok_or_else(|| anyhow!("tab {} is gone", id.0))
    }

    /// The active tab, falling back to any open tab if it went away.
    fn active_tab(&mut self) -> Result<Option<Arc<Tab>>> {
        let tabs = self.tabs()?;
        let id = self.active.get_target_id();
        if tabs.iter().any(|tab| tab.get_target_id() == id) {
            return Ok(Some(self.active.clone()));
        }
        let Some(first) = tabs.into_iter().next() else {
            return Ok(None);
        };
        self.active = first.clone();
        Ok(Some(first))
    }

    fn open(&mut self, url: Option<&str>) -> Result<Arc<Tab>> {
        let tab = self.browser.new_tab()?;
        if let Some(url) = url {
            tab.navigate_to(url)?;
        }
        tab.activate()?;
        self.active = tab.clone();
        Ok(tab)
    }

    fn close(&mut self, id: &SurfaceId) -> Result<()> {
        let tab = self.tab(id)?;
        tab.close(true)?;
        if self.active.get_target_id() != &id.0 {
            return Ok(());
        }
        let next = self
            .tabs()?
            .into_iter()
            .find(|tab| tab.get_target_id() != &id.0);
        self.active = match next {
            Some(tab) => tab,
            None => self.browser.new_tab()?,
        };
        Ok(())
    }
}

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Ask a DevTools endpoint (`http://host:port`) for its browser websocket URL.
pub async fn discover_ws_url(base: &str) -> Result<String> {
    let info: VersionInfo = reqwest::Client::new()
        .get(format!("{}/json/version", base.trim_end_matches('/')))
        .timeout(DISCOVERY_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(info.web_socket_debugger_url)
}

pub struct ChromeSurface {
    session: Arc<Mutex<BrowserSession>>,
}

impl ChromeSurface {
    pub fn new(session: BrowserSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Attach to Chrome on the configured debug port, or launch one.
    pub async fn start(config: &Config) -> Result<Self> {
        let base = format!("http://127.0.0.1:{}", config.debug_port);
        let session = match discover_ws_url(&base).await {
            Ok(ws_url) => {
                info!(%ws_url, "attaching to running Chrome");
                tokio::task::spawn_blocking(move || BrowserSession::connect(&ws_url)).await??
            }
            Err(e) => {
                info!(port = config.debug_port, error = %e, "no Chrome to attach to, launching one");
                let profile_dir = config.data_dir()?.join("chrome-profile");
                let chrome_path = config.chrome_path.clone();
                let headless = config.headless;
                tokio::task::spawn_blocking(move || {
                    BrowserSession::launch(chrome_path, profile_dir, headless)
                })
                .await??
            }
        };
        info!("Chrome ready");
        Ok(Self::new(session))
    }

    /// Run `op` against the session on the blocking pool.
    async fn with_session<T, F>(&self, op: F) -> Result<T, SurfaceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut BrowserSession) -> Result<T> + Send + 'static,
    {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = session
                .lock()
                .map_err(|_| SurfaceError::NotReady("browser session poisoned".into()))?;
            op(&mut session).map_err(|e| SurfaceError::NotReady(format!("{e:#}")))
        })
        .await
        .map_err(|e| SurfaceError::NotReady(e.to_string()))?
    }
}

#[async_trait]
impl Surface for ChromeSurface {
    async fn active(&self) -> Result<SurfaceId, SurfaceError> {
        let tab = self.with_session(|session| session.active_tab()).await?;
        tab.map(|tab| SurfaceId(tab.get_target_id().clone()))
            .ok_or(SurfaceError::NoActiveSurface)
    }

    async fn send(&self, id: &SurfaceId, request: SurfaceRequest) -> Result<SurfaceReply, SurfaceError> {
        let id = id.clone();
        self.with_session(move |session| {
            let tab = session.tab(&id)?;
            let result = tab.evaluate(&dom::handler_call(&request)?, false)?;
            let raw = result
                .value
                .and_then(|value| value.as_str().map(String::from))
                .ok_or_else(|| anyhow!("content handler returned nothing"))?;
            Ok(dom::parse_reply(&raw)?)
        })
        .await
    }

    async fn navigate(&self, id: &SurfaceId, direction: NavDirection) -> Result<(), SurfaceError> {
        let id = id.clone();
        self.with_session(move |session| {
            let tab = session.tab(&id)?;
            match direction {
                NavDirection::Back => {
                    tab.evaluate("history.back()", false)?;
                }
                NavDirection::Forward => {
                    tab.evaluate("history.forward()", false)?;
                }
                NavDirection::Reload => {
                    tab.reload(false, None)?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn set_location(&self, id: &SurfaceId, url: &str) -> Result<(), SurfaceError> {
        let id = id.clone();
        let url = url.to_string();
        self.with_session(move |session| {
            session.tab(&id)?.navigate_to(&url)?;
            Ok(())
        })
        .await
    }

    async fn open(&self, url: Option<&str>) -> Result<SurfaceId, SurfaceError> {
        let url = url.map(String::from);
        let tab = self
            .with_session(move |session| session.open(url.as_deref()))
            .await?;
        Ok(SurfaceId(tab.get_target_id().clone()))
    }

    async fn close(&self, id: &SurfaceId) -> Result<(), SurfaceError> {
        let id = id.clone();
        self.with_session(move |session| session.close(&id))
            .await
            .inspect_err(|e| warn!(error = %e, "closing tab failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    #[tokio::test]
    async fn websocket_url_is_discovered() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/json/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Browser": "Chrome/126.0",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc"
            })))
            .mount(&server)
            .await;

        let url = discover_ws_url(&format!("{}/", server.uri())).await.unwrap();
        assert_eq!(url, "ws://127.0.0.1:9222/devtools/browser/abc");
    }

    #[tokio::test]
    async fn discovery_fails_without_devtools() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(discover_ws_url(&server.uri()).await.is_err());
    }
}

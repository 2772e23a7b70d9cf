use reqwest::Url;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::CommandContext;
use crate::error::SurfaceError;
use crate::store::Store;
use crate::surface::{Surface, SurfaceId, SurfaceReply, SurfaceRequest};
use crate::types::{Action, CommandResult, TabOp};

const SEARCH_URL: &str = "https://www.google.com/search";
const NOT_READY: &str = "Page not ready. Refresh the tab.";

/// Performs one action against the active tab.
pub struct Hands {
    surface: Arc<dyn Surface>,
    store: Arc<Store>,
    surface_timeout: Duration,
}

impl Hands {
    pub fn new(surface: Arc<dyn Surface>, store: Arc<Store>, surface_timeout: Duration) -> Self {
        Self {
            surface,
            store,
            surface_timeout,
        }
    }

    pub async fn apply(&self, action: &Action, ctx: &CommandContext) -> CommandResult {
        debug!(?action, "applying action");

        // Waiting never touches the page.
        if let Action::Wait { ms } = action {
            return wait(*ms, ctx).await;
        }

        let id = match self.within(self.surface.active()).await {
            Ok(id) => id,
            Err(SurfaceError::NoActiveSurface) => return CommandResult::error("No active tab"),
            Err(e) => return not_ready(e),
        };

        match action {
            Action::Scroll { direction } => {
                let request = SurfaceRequest::Scroll {
                    direction: *direction,
                };
                match self.relay(&id, request).await {
                    Ok(_) => CommandResult::success(format!("Scrolled {direction}")),
                    Err(e) => not_ready(e),
                }
            }

            Action::Navigate { direction } => {
                if let Err(e) = self.within(self.surface.navigate(&id, *direction)).await {
                    warn!(error = %e, ?direction, "navigation failed, reporting success anyway");
                }
                CommandResult::success("Navigated")
            }

            Action::Tab { op } => {
                let outcome = match op {
                    TabOp::New => self.within(self.surface.open(None)).await.map(|_| ()),
                    TabOp::Close => self.within(self.surface.close(&id)).await,
                };
                if let Err(e) = outcome {
                    warn!(error = %e, ?op, "tab action failed, reporting success anyway");
                }
                CommandResult::success("Tab action executed")
            }

            Action::Search { query } => {
                let Some(url) = search_url(query) else {
                    return CommandResult::error("Could not build search URL");
                };
                if let Err(e) = self.within(self.surface.set_location(&id, url.as_str())).await {
                    warn!(error = %e, "search navigation failed, reporting success anyway");
                }
                CommandResult::success(format!("Searching for {query}"))
            }

            Action::OpenUrl { url } => {
                if let Err(e) = self.within(self.surface.open(Some(url))).await {
                    warn!(error = %e, %url, "opening tab failed, reporting success anyway");
                }
                CommandResult::success(format!("Opening {url}"))
            }

            Action::FillForm => self.fill_form(&id).await,

            Action::Click { target } => {
                let request = SurfaceRequest::Click {
                    target: target.clone(),
                };
                match self.relay(&id, request).await {
                    Ok(reply) if reply.is_error() => {
                        CommandResult::error(format!("Could not find \"{target}\"."))
                    }
                    Ok(_) => CommandResult::success(format!("Clicked \"{target}\".")),
                    Err(e) => not_ready(e),
                }
            }

            Action::Read => match self.relay(&id, SurfaceRequest::GetText).await {
                Ok(reply) => {
                    let text = reply.text.unwrap_or_default();
                    CommandResult::success(format!("Read {} characters.", text.chars().count()))
                        .with_text(text)
                }
                Err(e) => not_ready(e),
            },

            Action::Type { target, text } => {
                let request = SurfaceRequest::Type {
                    target: target.clone(),
                    text: text.clone(),
                };
                match self.relay(&id, request).await {
                    Ok(reply) if reply.is_error() => CommandResult::warning(
                        reply
                            .message
                            .unwrap_or_else(|| format!("Input \"{target}\" not found")),
                    ),
                    Ok(_) => CommandResult::success(format!("Typed \"{text}\"")),
                    Err(e) => not_ready(e),
                }
            }

            Action::Wait { ms } => wait(*ms, ctx).await,
        }
    }

    /// Title, URL and a text snapshot of the active tab.
    pub async fn page_info(&self) -> Result<SurfaceReply, SurfaceError> {
        let id = self.within(self.surface.active()).await?;
        self.relay(&id, SurfaceRequest::GetPageInfo).await
    }

    async fn fill_form(&self, id: &SurfaceId) -> CommandResult {
        let profile = match self.store.load_profile() {
            Ok(profile) => profile,
            Err(e) => return CommandResult::error(format!("Could not load profile: {e}")),
        };
        if profile.is_empty() {
            return CommandResult::warning("No profile found. Please save one in settings.");
        }
        match self.relay(id, SurfaceRequest::FillForm { profile }).await {
            Ok(reply) => CommandResult::success(format!("Filled {} fields.", reply.filled.unwrap_or(0))),
            Err(e) => not_ready(e),
        }
    }

    async fn relay(&self, id: &SurfaceId, request: SurfaceRequest) -> Result<SurfaceReply, SurfaceError> {
        self.within(self.surface.send(id, request)).await
    }

    async fn within<T>(&self, call: impl Future<Output = Result<T, SurfaceError>>) -> Result<T, SurfaceError> {
        tokio::time::timeout(self.surface_timeout, call)
            .await
            .unwrap_or_else(|_| Err(SurfaceError::Timeout(self.surface_timeout)))
    }
}

fn search_url(query: &str) -> Option<Url> {
    let mut url = Url::parse(SEARCH_URL).ok()?;
    url.query_pairs_mut().append_pair("q", query);
    Some(url)
}

async fn wait(ms: u64, ctx: &CommandContext) -> CommandResult {
    match ctx.sleep(Duration::from_millis(ms)).await {
        Ok(()) => CommandResult::success("Waited."),
        Err(_) => CommandResult::warning("Command cancelled."),
    }
}

fn not_ready(error: SurfaceError) -> CommandResult {
    warn!(%error, "surface unreachable");
    CommandResult::error(NOT_READY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::testing::{Call, FakeSurface};
    use crate::types::{NavDirection, Profile, ScrollDirection, Settings, Status};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Rig {
        _dir: TempDir,
        store: Arc<Store>,
        surface: Arc<FakeSurface>,
        hands: Hands,
    }

    fn rig(surface: FakeSurface) -> Rig {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let surface = Arc::new(surface);
        let hands = Hands::new(surface.clone(), store.clone(), Duration::from_secs(10));
        Rig {
            _dir: dir,
            store,
            surface,
            hands,
        }
    }

    fn ctx() -> CommandContext {
        CommandContext::detached(Settings::default())
    }

    #[tokio::test]
    async fn scroll_relays_direction() {
        let rig = rig(FakeSurface::new());
        let result = rig
            .hands
            .apply(
                &Action::Scroll {
                    direction: ScrollDirection::Down,
                },
                &ctx(),
            )
            .await;
        assert_eq!(result, CommandResult::success("Scrolled down"));
        assert_eq!(
            rig.surface.calls(),
            vec![Call::Send(SurfaceRequest::Scroll {
                direction: ScrollDirection::Down
            })]
        );
    }

    #[tokio::test]
    async fn unreachable_page_is_an_error_result() {
        let rig = rig(FakeSurface::new());
        rig.surface.unreachable.store(true, Ordering::SeqCst);
        let result = rig.hands.apply(&Action::Read, &ctx()).await;
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.message, NOT_READY);
    }

    #[tokio::test]
    async fn missing_tab_is_reported() {
        let rig = rig(FakeSurface::new());
        rig.surface.no_tab.store(true, Ordering::SeqCst);
        let result = rig
            .hands
            .apply(
                &Action::Click {
                    target: "ok".into(),
                },
                &ctx(),
            )
            .await;
        assert_eq!(result, CommandResult::error("No active tab"));
        assert!(rig.surface.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_page_times_out_as_not_ready() {
        let rig = rig(FakeSurface::new());
        rig.surface.hang.store(true, Ordering::SeqCst);
        let result = rig.hands.apply(&Action::Read, &ctx()).await;
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.message, NOT_READY);
    }

    #[tokio::test]
    async fn navigation_reports_success_even_when_it_fails() {
        let rig = rig(FakeSurface::new());
        rig.surface.unreachable.store(true, Ordering::SeqCst);
        let result = rig
            .hands
            .apply(
                &Action::Navigate {
                    direction: NavDirection::Back,
                },
                &ctx(),
            )
            .await;
        assert_eq!(result, CommandResult::success("Navigated"));
        assert_eq!(rig.surface.calls(), vec![Call::Navigate(NavDirection::Back)]);
    }

    #[tokio::test]
    async fn tabs_open_and_close() {
        let rig = rig(FakeSurface::new());
        rig.hands.apply(&Action::Tab { op: TabOp::New }, &ctx()).await;
        rig.hands.apply(&Action::Tab { op: TabOp::Close }, &ctx()).await;
        assert_eq!(rig.surface.calls(), vec![Call::Open(None), Call::Close]);
    }

    #[tokio::test]
    async fn search_rewrites_location_with_encoded_query() {
        let rig = rig(FakeSurface::new());
        let result = rig
            .hands
            .apply(
                &Action::Search {
                    query: "rust & cats".into(),
                },
                &ctx(),
            )
            .await;
        assert_eq!(result, CommandResult::success("Searching for rust & cats"));
        assert_eq!(
            rig.surface.calls(),
            vec![Call::SetLocation(
                "https://www.google.com/search?q=rust+%26+cats".into()
            )]
        );
    }

    #[tokio::test]
    async fn open_url_opens_new_tab() {
        let rig = rig(FakeSurface::new());
        let result = rig
            .hands
            .apply(
                &Action::OpenUrl {
                    url: "https://example.com".into(),
                },
                &ctx(),
            )
            .await;
        assert!(result.is_success());
        assert_eq!(
            rig.surface.calls(),
            vec![Call::Open(Some("https://example.com".into()))]
        );
    }

    #[tokio::test]
    async fn click_miss_names_the_target() {
        let rig = rig(FakeSurface::with_responder(|_| SurfaceReply {
            status: "error".into(),
            ..SurfaceReply::default()
        }));
        let result = rig
            .hands
            .apply(
                &Action::Click {
                    target: "subscribe".into(),
                },
                &ctx(),
            )
            .await;
        assert_eq!(result, CommandResult::error("Could not find \"subscribe\"."));
    }

    #[tokio::test]
    async fn type_miss_is_only_a_warning() {
        let rig = rig(FakeSurface::with_responder(|_| SurfaceReply {
            status: "error".into(),
            message: Some("Input \"email\" not found".into()),
            ..SurfaceReply::default()
        }));
        let result = rig
            .hands
            .apply(
                &Action::Type {
                    target: "email".into(),
                    text: "a@b.c".into(),
                },
                &ctx(),
            )
            .await;
        assert_eq!(result, CommandResult::warning("Input \"email\" not found"));
    }

    #[tokio::test]
    async fn read_returns_page_text() {
        let rig = rig(FakeSurface::with_page_text("hello page"));
        let result = rig.hands.apply(&Action::Read, &ctx()).await;
        assert!(result.is_success());
        assert_eq!(result.text.as_deref(), Some("hello page"));
    }

    #[tokio::test]
    async fn fill_form_without_profile_warns() {
        let rig = rig(FakeSurface::new());
        let result = rig.hands.apply(&Action::FillForm, &ctx()).await;
        assert_eq!(result.status, Status::Warning);
        assert!(rig.surface.calls().is_empty());
    }

    #[tokio::test]
    async fn fill_form_reports_filled_count() {
        let rig = rig(FakeSurface::with_responder(|_| SurfaceReply {
            status: "success".into(),
            filled: Some(2),
            ..SurfaceReply::default()
        }));
        let profile = Profile {
            name: Some("Ada".into()),
            phone: Some("555".into()),
            ..Profile::default()
        };
        rig.store.save_profile(&profile).unwrap();

        let result = rig.hands.apply(&Action::FillForm, &ctx()).await;
        assert_eq!(result, CommandResult::success("Filled 2 fields."));
        assert_eq!(
            rig.surface.calls(),
            vec![Call::Send(SurfaceRequest::FillForm { profile })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_does_not_touch_the_page() {
        let rig = rig(FakeSurface::new());
        rig.surface.no_tab.store(true, Ordering::SeqCst);
        let start = tokio::time::Instant::now();
        let result = rig.hands.apply(&Action::Wait { ms: 2000 }, &ctx()).await;
        assert_eq!(result, CommandResult::success("Waited."));
        assert!(start.elapsed() >= Duration::from_millis(2000));
        assert!(rig.surface.calls().is_empty());
    }
}

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::brain::Brain;
use crate::context::CommandContext;
use crate::hands::Hands;
use crate::types::{
    Action, CommandResult, DEFAULT_WAIT_MS, Intent, MAX_WAIT_MS, MIN_READABLE_CHARS, Plan,
    RAW_EXCERPT_CHARS, STEP_PACING_MS, Step,
};

/// How the interpreter proceeds after a step.
enum Flow {
    Continue,
    Finish(CommandResult),
}

/// Executes a model plan one step at a time.
pub struct Interpreter<'a> {
    hands: &'a Hands,
    brain: &'a Brain,
}

impl<'a> Interpreter<'a> {
    pub fn new(hands: &'a Hands, brain: &'a Brain) -> Self {
        Self { hands, brain }
    }

    pub async fn run(&self, plan: Plan, ctx: &CommandContext) -> CommandResult {
        if plan.intent == Intent::Chat {
            let reply = plan
                .response
                .filter(|reply| !reply.trim().is_empty())
                .unwrap_or_else(|| "I heard you.".to_string());
            return CommandResult::success(reply);
        }
        if plan.intent == Intent::Unknown || plan.steps.is_empty() {
            return CommandResult::unknown_intent("I'm not sure how to do that yet.");
        }

        info!(intent = ?plan.intent, steps = plan.steps.len(), "executing plan");
        for (index, step) in plan.steps.iter().enumerate() {
            debug!(index, ?step, "plan step");
            if let Flow::Finish(result) = self.step(step, ctx).await {
                return result;
            }
            if ctx.sleep(Duration::from_millis(STEP_PACING_MS)).await.is_err() {
                return cancelled();
            }
        }

        CommandResult::success("I've completed the task.").with_plan(plan)
    }

    async fn step(&self, step: &Step, ctx: &CommandContext) -> Flow {
        let action = match step {
            Step::Search { query, text } => Action::Search {
                query: present(query).or(present(text)).unwrap_or_default(),
            },
            Step::OpenUrl { url } => match present(url) {
                Some(url) => Action::OpenUrl { url: with_scheme(url) },
                None => {
                    debug!("OPEN_URL without url, skipping");
                    return Flow::Continue;
                }
            },
            Step::Click { selector, text } => match present(selector).or(present(text)) {
                Some(target) => Action::Click { target },
                None => {
                    debug!("CLICK without target, skipping");
                    return Flow::Continue;
                }
            },
            Step::Type { selector, text } => Action::Type {
                target: present(selector).unwrap_or_else(|| "input".to_string()),
                text: text.clone().unwrap_or_default(),
            },
            Step::Wait { ms } => {
                let ms = ms
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_WAIT_MS)
                    .min(MAX_WAIT_MS);
                return match ctx.sleep(Duration::from_millis(ms)).await {
                    Ok(()) => Flow::Continue,
                    Err(_) => Flow::Finish(cancelled()),
                };
            }
            Step::Read => return Flow::Finish(self.read_and_summarize(ctx).await),
            Step::FillForm => Action::FillForm,
            Step::Unrecognized { action } => {
                warn!(%action, "ignoring unrecognized plan step");
                return Flow::Continue;
            }
        };

        let result = self.hands.apply(&action, ctx).await;
        if result.is_success() {
            debug!(message = %result.message, "step done");
        } else {
            warn!(status = ?result.status, message = %result.message, "step did not succeed");
        }
        Flow::Continue
    }

    /// READ always ends the plan: with a summary, or a warning explaining why not.
    async fn read_and_summarize(&self, ctx: &CommandContext) -> CommandResult {
        let read = self.hands.apply(&Action::Read, ctx).await;
        let page_text = read.text.unwrap_or_default();

        if page_text.chars().count() < MIN_READABLE_CHARS {
            return CommandResult::warning(
                "Page content seems empty. Reload the tab so the page helper is attached, then try again.",
            );
        }

        info!(chars = page_text.chars().count(), "read page, summarizing");
        match self
            .brain
            .summarize(&page_text, &ctx.settings.model_endpoint)
            .await
        {
            Ok(summary) => CommandResult::success(format!("Summary: {summary}")).with_text(page_text),
            Err(e) => {
                warn!(error = %e, "summary request failed");
                let excerpt: String = page_text.chars().take(RAW_EXCERPT_CHARS).collect();
                CommandResult::warning(format!(
                    "I read the page but couldn't get a summary from the model.\nRaw text: {excerpt}..."
                ))
                .with_text(page_text)
            }
        }
    }
}

/// Some(trimmed) for a non-blank field.
fn present(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn with_scheme(url: String) -> String {
    if url.starts_with("http") {
        url
    } else {
        format!("https://{url}")
    }
}

fn cancelled() -> CommandResult {
    CommandResult::warning("Command cancelled.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::DEFAULT_MODEL;
    use crate::store::Store;
    use crate::surface::SurfaceRequest;
    use crate::surface::testing::{Call, FakeSurface};
    use crate::types::{Settings, Status};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::watch;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    struct Rig {
        _dir: TempDir,
        surface: Arc<FakeSurface>,
        hands: Hands,
        brain: Brain,
    }

    fn rig(surface: FakeSurface) -> Rig {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let surface = Arc::new(surface);
        let hands = Hands::new(surface.clone(), store, Duration::from_secs(10));
        Rig {
            _dir: dir,
            surface,
            hands,
            brain: Brain::new(DEFAULT_MODEL, Duration::from_secs(5)),
        }
    }

    fn ctx_for(endpoint: &str) -> CommandContext {
        CommandContext::detached(Settings {
            use_language_model: true,
            model_endpoint: endpoint.to_string(),
        })
    }

    fn plan(value: serde_json::Value) -> Plan {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn chat_plan_answers_without_steps() {
        let rig = rig(FakeSurface::new());
        let interpreter = Interpreter::new(&rig.hands, &rig.brain);

        let result = interpreter
            .run(Plan::chat("Hello there!"), &ctx_for("http://127.0.0.1:1"))
            .await;
        assert_eq!(result, CommandResult::success("Hello there!"));

        let result = interpreter
            .run(plan(json!({"intent": "CHAT"})), &ctx_for("http://127.0.0.1:1"))
            .await;
        assert_eq!(result, CommandResult::success("I heard you."));
        assert!(rig.surface.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_or_empty_plans_are_unknown_intent() {
        let rig = rig(FakeSurface::new());
        let interpreter = Interpreter::new(&rig.hands, &rig.brain);
        let ctx = ctx_for("http://127.0.0.1:1");

        let unknown = plan(json!({"intent": "UNKNOWN", "steps": [{"action": "READ"}]}));
        assert_eq!(interpreter.run(unknown, &ctx).await.status, Status::UnknownIntent);

        let empty = plan(json!({"intent": "CLICK", "steps": []}));
        assert_eq!(interpreter.run(empty, &ctx).await.status, Status::UnknownIntent);
        assert!(rig.surface.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn open_wait_click_runs_in_order() {
        let rig = rig(FakeSurface::new());
        let interpreter = Interpreter::new(&rig.hands, &rig.brain);
        let plan = plan(json!({
            "intent": "CLICK",
            "steps": [
                {"action": "OPEN_URL", "url": "youtube.com"},
                {"action": "WAIT", "ms": 500},
                {"action": "CLICK", "selector": "search"}
            ]
        }));

        let result = interpreter.run(plan.clone(), &ctx_for("http://127.0.0.1:1")).await;
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.plan, Some(plan));

        let calls = rig.surface.timed_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, Call::Open(Some("https://youtube.com".into())));
        assert_eq!(
            calls[1].1,
            Call::Send(SurfaceRequest::Click {
                target: "search".into()
            })
        );
        // pacing after OPEN_URL, the WAIT itself, pacing after WAIT
        let gap = calls[1].0 - calls[0].0;
        assert_eq!(gap, Duration::from_millis(STEP_PACING_MS * 2 + 500));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_wait_is_capped() {
        let rig = rig(FakeSurface::new());
        let interpreter = Interpreter::new(&rig.hands, &rig.brain);
        let plan = plan(json!({
            "intent": "CLICK",
            "steps": [
                {"action": "OPEN_URL", "url": "example.com"},
                {"action": "WAIT", "ms": 1e30},
                {"action": "CLICK", "selector": "more"}
            ]
        }));

        let result = interpreter.run(plan, &ctx_for("http://127.0.0.1:1")).await;
        assert!(result.is_success());
        let calls = rig.surface.timed_calls();
        assert_eq!(calls.len(), 2);
        let gap = calls[1].0 - calls[0].0;
        assert_eq!(gap, Duration::from_millis(STEP_PACING_MS * 2 + MAX_WAIT_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn blank_fields_degrade_gracefully() {
        let rig = rig(FakeSurface::new());
        let interpreter = Interpreter::new(&rig.hands, &rig.brain);
        let plan = plan(json!({
            "intent": "CLICK",
            "steps": [
                {"action": "OPEN_URL", "url": ""},
                {"action": "CLICK"},
                {"action": "SEARCH", "text": "otters"},
                {"action": "TYPE", "text": "hi"},
                {"action": "TELEPORT"},
                {"action": "OPEN_URL", "url": "http://example.com"}
            ]
        }));

        let result = interpreter.run(plan, &ctx_for("http://127.0.0.1:1")).await;
        assert!(result.is_success());
        assert_eq!(
            rig.surface.calls(),
            vec![
                Call::SetLocation("https://www.google.com/search?q=otters".into()),
                Call::Send(SurfaceRequest::Type {
                    target: "input".into(),
                    text: "hi".into()
                }),
                Call::Open(Some("http://example.com".into())),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_step_does_not_abort_plan() {
        let rig = rig(FakeSurface::with_responder(|_| crate::surface::SurfaceReply {
            status: "error".into(),
            ..Default::default()
        }));
        let interpreter = Interpreter::new(&rig.hands, &rig.brain);
        let plan = plan(json!({
            "intent": "CLICK",
            "steps": [
                {"action": "CLICK", "selector": "missing"},
                {"action": "CLICK", "selector": "also missing"}
            ]
        }));

        let result = interpreter.run(plan, &ctx_for("http://127.0.0.1:1")).await;
        assert!(result.is_success());
        assert_eq!(rig.surface.calls().len(), 2);
    }

    #[tokio::test]
    async fn short_page_text_stops_before_summarizing() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let rig = rig(FakeSurface::with_page_text(&"x".repeat(30)));
        let interpreter = Interpreter::new(&rig.hands, &rig.brain);
        let plan = plan(json!({
            "intent": "READ",
            "steps": [{"action": "READ"}, {"action": "CLICK", "selector": "never"}]
        }));

        let result = interpreter.run(plan, &ctx_for(&server.uri())).await;
        assert_eq!(result.status, Status::Warning);
        assert_eq!(rig.surface.calls(), vec![Call::Send(SurfaceRequest::GetText)]);
    }

    #[tokio::test]
    async fn read_ends_plan_with_summary() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/generate"))
            .and(matchers::body_string_contains("3 concise sentences"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": r#"{"response":"A page about otters."}"#})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let page = "Otters are semiaquatic mammals. ".repeat(10);
        let rig = rig(FakeSurface::with_page_text(&page));
        let interpreter = Interpreter::new(&rig.hands, &rig.brain);
        let plan = plan(json!({
            "intent": "READ",
            "steps": [{"action": "READ"}, {"action": "CLICK", "selector": "never"}]
        }));

        let result = interpreter.run(plan, &ctx_for(&server.uri())).await;
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.message, "Summary: A page about otters.");
        assert_eq!(result.text.as_deref(), Some(page.as_str()));
        assert_eq!(rig.surface.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_summary_warns_with_excerpt() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let page = "y".repeat(400);
        let rig = rig(FakeSurface::with_page_text(&page));
        let interpreter = Interpreter::new(&rig.hands, &rig.brain);
        let plan = plan(json!({"intent": "READ", "steps": [{"action": "READ"}]}));

        let result = interpreter.run(plan, &ctx_for(&server.uri())).await;
        assert_eq!(result.status, Status::Warning);
        assert!(result.message.contains(&"y".repeat(RAW_EXCERPT_CHARS)));
        assert!(!result.message.contains(&"y".repeat(RAW_EXCERPT_CHARS + 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_steps() {
        let rig = rig(FakeSurface::new());
        let (cancel, rx) = watch::channel(false);
        let ctx = CommandContext::new(Settings::default(), rx);
        let plan = plan(json!({
            "intent": "CLICK",
            "steps": [
                {"action": "CLICK", "selector": "first"},
                {"action": "WAIT", "ms": 60000},
                {"action": "CLICK", "selector": "second"}
            ]
        }));

        let run = async {
            let interpreter = Interpreter::new(&rig.hands, &rig.brain);
            interpreter.run(plan, &ctx).await
        };
        let trigger = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.send_replace(true);
        };
        let (result, ()) = tokio::join!(run, trigger);

        assert_eq!(result, CommandResult::warning("Command cancelled."));
        assert_eq!(
            rig.surface.calls(),
            vec![Call::Send(SurfaceRequest::Click {
                target: "first".into()
            })]
        );
    }

    #[test]
    fn scheme_is_added_only_when_missing() {
        assert_eq!(with_scheme("youtube.com".into()), "https://youtube.com");
        assert_eq!(with_scheme("http://a.b".into()), "http://a.b");
        assert_eq!(with_scheme("https://a.b".into()), "https://a.b");
    }
}

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::LanguageModelError;
use crate::types::{DEFAULT_MODEL_ENDPOINT, Plan, SUMMARY_INPUT_CHARS};

pub const DEFAULT_MODEL: &str = "mistral";

const GENERATE_PATH: &str = "/api/generate";
const CHAT_PATH: &str = "/api/chat";

const PLAN_SCHEMA: &str = r#"{
  "intent": "SEARCH | CLICK | SCROLL | READ | CHAT | UNKNOWN",
  "response": "string (CHAT only)",
  "steps": [
    {"action": "OPEN_URL", "url": "string"},
    {"action": "WAIT", "ms": number},
    {"action": "CLICK", "selector": "string"},
    {"action": "SEARCH", "query": "string"},
    {"action": "READ"},
    {"action": "TYPE", "selector": "string", "text": "string"}
  ]
}"#;

const PLAN_RULES: &str = r#"Pick exactly one of these shapes:
1. Small talk or a question you can answer yourself:
   {"intent": "CHAT", "response": "..."}
2. A web search ("Search for X", "Who is X"):
   {"intent": "SEARCH", "steps": [{"action": "SEARCH", "query": "X"}]}
3. Opening a site ("Open YouTube", "Go to Wikipedia"):
   {"intent": "CLICK", "steps": [{"action": "OPEN_URL", "url": "youtube.com"}]}
4. Acting on the page that is already open ("Click X", "Play X", "Next page"):
   {"intent": "CLICK", "steps": [{"action": "CLICK", "selector": "X"}]}
5. Doing something on another site ("Search for X on YouTube", "Find X on Amazon").
   Follow the pattern OPEN_URL -> WAIT -> TYPE -> CLICK. Example for "Play Shape of You on YouTube":
   {
     "intent": "CLICK",
     "steps": [
       {"action": "OPEN_URL", "url": "youtube.com"},
       {"action": "WAIT", "ms": 5000},
       {"action": "TYPE", "selector": "Search", "text": "Shape of You"},
       {"action": "WAIT", "ms": 500},
       {"action": "CLICK", "selector": "Search"},
       {"action": "WAIT", "ms": 3000},
       {"action": "CLICK", "selector": "Shape of You"}
     ]
   }
6. Reading or summarizing the current page:
   {"intent": "READ", "steps": [{"action": "READ"}]}

Notes:
- For TYPE and CLICK, "selector" is the visible text, placeholder or aria-label of the element, not a CSS selector.
- Start with OPEN_URL whenever the user is not already on the site.
- Reply with JSON only. No markdown, no explanation."#;

/// Build the planning prompt for one user command.
pub fn plan_prompt(command: &str) -> String {
    format!(
        "You are Page Pilot, an assistant that drives a web browser. The user said: \"{command}\".\n\n\
         {PLAN_RULES}\n\n\
         Answer with a single JSON object following this schema:\n{PLAN_SCHEMA}"
    )
}

/// Build the summarization prompt for text read from the page.
pub fn summary_prompt(page_text: &str) -> String {
    let excerpt: String = page_text.chars().take(SUMMARY_INPUT_CHARS).collect();
    format!(
        "Task: summarize the following text for the user in 3 concise sentences.\n\n\
         TEXT: \"{excerpt}\"\n\n\
         Reply with JSON only: {{\"response\": \"YOUR_SUMMARY_HERE\"}}"
    )
}

/// Point a configured endpoint at the generate API unless it already names one.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    let endpoint = if endpoint.is_empty() {
        DEFAULT_MODEL_ENDPOINT
    } else {
        endpoint
    };
    if endpoint.ends_with(GENERATE_PATH) || endpoint.ends_with(CHAT_PATH) {
        return endpoint.to_string();
    }
    let base = endpoint.strip_suffix('/').unwrap_or(endpoint);
    format!("{base}{GENERATE_PATH}")
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct GenerateEnvelope {
    #[serde(default)]
    response: String,
}

/// Strip markdown fences some models wrap around JSON despite instructions.
fn strip_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Decode a generate response whose `response` field should hold a JSON plan.
///
/// Only an unreadable envelope is an error. If the inner text is not a plan
/// the reply degrades to chat so the user still gets an answer.
pub fn decode_plan(body: &str) -> Result<Plan, LanguageModelError> {
    let envelope: GenerateEnvelope = serde_json::from_str(body)?;
    match parse_inner_plan(&envelope.response) {
        Some(plan) => Ok(plan),
        None => Ok(degrade_to_chat(envelope.response)),
    }
}

fn parse_inner_plan(inner: &str) -> Option<Plan> {
    match serde_json::from_str::<Value>(strip_fences(inner)) {
        Ok(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
        _ => None,
    }
}

fn degrade_to_chat(inner: String) -> Plan {
    warn!(raw = %inner, "model reply is not a plan, answering as chat");
    Plan::chat(inner)
}

/// Decode a summarization reply: `{"response": "..."}` inside the envelope,
/// or the raw inner text when the model ignored the format.
pub fn decode_summary(body: &str) -> Result<String, LanguageModelError> {
    let envelope: GenerateEnvelope = serde_json::from_str(body)?;
    let summary = serde_json::from_str::<Value>(strip_fences(&envelope.response))
        .ok()
        .and_then(|value| value.get("response").and_then(Value::as_str).map(str::to_owned))
        .filter(|summary| !summary.trim().is_empty())
        .unwrap_or(envelope.response);
    Ok(summary)
}

/// Client for the local generate endpoint.
pub struct Brain {
    client: Client,
    model: String,
    timeout: Duration,
}

impl Brain {
    pub fn new(model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the model to turn a command into a plan.
    pub async fn get_plan(&self, command: &str, endpoint: &str) -> Result<Plan, LanguageModelError> {
        let body = self.generate(endpoint, &plan_prompt(command)).await?;
        let plan = decode_plan(&body)?;
        info!(intent = ?plan.intent, steps = plan.steps.len(), "model returned plan");
        Ok(plan)
    }

    /// Ask the model for a short summary of page text.
    pub async fn summarize(&self, page_text: &str, endpoint: &str) -> Result<String, LanguageModelError> {
        let body = self.generate(endpoint, &summary_prompt(page_text)).await?;
        decode_summary(&body)
    }

    async fn generate(&self, endpoint: &str, prompt: &str) -> Result<String, LanguageModelError> {
        let url = normalize_endpoint(endpoint);
        debug!(%url, model = %self.model, "calling model");
        tokio::time::timeout(self.timeout, self.exchange(&url, prompt))
            .await
            .map_err(|_| LanguageModelError::Timeout(self.timeout))?
    }

    async fn exchange(&self, url: &str, prompt: &str) -> Result<String, LanguageModelError> {
        let response = self
            .client
            .post(url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                format: "json",
            })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(LanguageModelError::Blocked);
        }
        if !status.is_success() {
            return Err(LanguageModelError::Http {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        debug!(%body, "model raw response");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Intent, Step};
    use serde_json::json;

    #[test]
    fn endpoint_gets_generate_path() {
        assert_eq!(
            normalize_endpoint("http://localhost:11434"),
            "http://localhost:11434/api/generate"
        );
        assert_eq!(
            normalize_endpoint("http://localhost:11434/"),
            "http://localhost:11434/api/generate"
        );
        assert_eq!(
            normalize_endpoint("http://box:1/api/chat"),
            "http://box:1/api/chat"
        );
        assert_eq!(
            normalize_endpoint("http://box:1/api/generate"),
            "http://box:1/api/generate"
        );
        assert_eq!(normalize_endpoint(""), "http://localhost:11434/api/generate");
    }

    #[test]
    fn plan_prompt_embeds_command_and_schema() {
        let prompt = plan_prompt("open youtube");
        assert!(prompt.contains("\"open youtube\""));
        assert!(prompt.contains("\"steps\""));
        assert!(prompt.contains("JSON only"));
        assert!(prompt.contains("OPEN_URL -> WAIT -> TYPE -> CLICK"));
    }

    #[test]
    fn summary_prompt_truncates_page_text() {
        let text = "a".repeat(SUMMARY_INPUT_CHARS + 500);
        let prompt = summary_prompt(&text);
        assert!(prompt.contains(&"a".repeat(SUMMARY_INPUT_CHARS)));
        assert!(!prompt.contains(&"a".repeat(SUMMARY_INPUT_CHARS + 1)));
    }

    #[test]
    fn decode_inner_json_plan() {
        let body = json!({
            "response": r#"{"intent":"SEARCH","steps":[{"action":"SEARCH","query":"rust"}]}"#
        })
        .to_string();
        let plan = decode_plan(&body).unwrap();
        assert_eq!(plan.intent, Intent::Search);
        assert_eq!(
            plan.steps,
            vec![Step::Search {
                query: Some("rust".into()),
                text: None
            }]
        );
    }

    #[test]
    fn mistyped_step_keeps_the_rest_of_the_plan() {
        let body = json!({
            "response": r#"{"intent":"CLICK","steps":[{"action":"OPEN_URL","url":"youtube.com"},{"action":"CLICK","selector":["Search"]}]}"#
        })
        .to_string();
        let plan = decode_plan(&body).unwrap();
        assert_eq!(plan.intent, Intent::Click);
        assert_eq!(
            plan.steps,
            vec![
                Step::OpenUrl {
                    url: Some("youtube.com".into())
                },
                Step::Click {
                    selector: None,
                    text: None
                },
            ]
        );

        let body = json!({
            "response": r#"{"intent":"SEARCH","steps":[{"action":"SEARCH","query":2024}]}"#
        })
        .to_string();
        let plan = decode_plan(&body).unwrap();
        assert_eq!(
            plan.steps,
            vec![Step::Search {
                query: Some("2024".into()),
                text: None
            }]
        );
    }

    #[test]
    fn plain_text_reply_degrades_to_chat() {
        let body = json!({"response": "Hello there!"}).to_string();
        let plan = decode_plan(&body).unwrap();
        assert_eq!(plan, Plan::chat("Hello there!"));
    }

    #[test]
    fn non_object_reply_degrades_to_chat() {
        let body = json!({"response": "42"}).to_string();
        assert_eq!(decode_plan(&body).unwrap(), Plan::chat("42"));
    }

    #[test]
    fn fenced_json_is_accepted() {
        let body = json!({"response": "```json\n{\"intent\":\"CHAT\",\"response\":\"hi\"}\n```"})
            .to_string();
        let plan = decode_plan(&body).unwrap();
        assert_eq!(plan.intent, Intent::Chat);
        assert_eq!(plan.response.as_deref(), Some("hi"));
    }

    #[test]
    fn broken_envelope_is_an_error() {
        assert!(matches!(
            decode_plan("<html>nope</html>"),
            Err(LanguageModelError::Envelope(_))
        ));
    }

    #[test]
    fn summary_prefers_inner_response_field() {
        let body = json!({"response": r#"{"response":"Short summary."}"#}).to_string();
        assert_eq!(decode_summary(&body).unwrap(), "Short summary.");

        let body = json!({"response": "Just prose."}).to_string();
        assert_eq!(decode_summary(&body).unwrap(), "Just prose.");

        let body = json!({"response": r#"{"summary":"elsewhere"}"#}).to_string();
        assert_eq!(decode_summary(&body).unwrap(), r#"{"summary":"elsewhere"}"#);
    }

    mod http_tests {
        use super::*;
        use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

        fn brain() -> Brain {
            Brain::new(DEFAULT_MODEL, Duration::from_secs(5))
        }

        #[tokio::test]
        async fn posts_non_streaming_json_request() {
            let server = MockServer::start().await;
            let reply = json!({"response": r#"{"intent":"CHAT","response":"Hi!"}"#});

            Mock::given(matchers::method("POST"))
                .and(matchers::path("/api/generate"))
                .and(matchers::body_partial_json(json!({
                    "model": "mistral",
                    "stream": false,
                    "format": "json"
                })))
                .respond_with(ResponseTemplate::new(200).set_body_json(reply))
                .expect(1)
                .mount(&server)
                .await;

            let plan = brain().get_plan("hello", &server.uri()).await.unwrap();
            assert_eq!(plan, Plan::chat("Hi!"));
        }

        #[tokio::test]
        async fn forbidden_maps_to_blocked() {
            let server = MockServer::start().await;
            Mock::given(matchers::method("POST"))
                .respond_with(ResponseTemplate::new(403))
                .mount(&server)
                .await;

            let err = brain().get_plan("hello", &server.uri()).await.unwrap_err();
            assert!(matches!(err, LanguageModelError::Blocked));
            assert!(err.to_string().contains("OLLAMA_ORIGINS"));
        }

        #[tokio::test]
        async fn other_statuses_carry_code() {
            let server = MockServer::start().await;
            Mock::given(matchers::method("POST"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;

            let err = brain().get_plan("hello", &server.uri()).await.unwrap_err();
            assert!(matches!(err, LanguageModelError::Http { status: 500 }));
        }

        #[tokio::test]
        async fn unreachable_endpoint_is_transport_error() {
            let err = brain()
                .get_plan("hello", "http://127.0.0.1:1")
                .await
                .unwrap_err();
            assert!(matches!(err, LanguageModelError::Transport(_)));
        }

        #[tokio::test]
        async fn slow_endpoint_times_out() {
            let server = MockServer::start().await;
            Mock::given(matchers::method("POST"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"response": "late"}))
                        .set_delay(Duration::from_millis(500)),
                )
                .mount(&server)
                .await;

            let brain = Brain::new(DEFAULT_MODEL, Duration::from_millis(50));
            let err = brain.get_plan("hello", &server.uri()).await.unwrap_err();
            assert!(matches!(err, LanguageModelError::Timeout(_)));
        }

        #[tokio::test]
        async fn summarize_reads_inner_response() {
            let server = MockServer::start().await;
            Mock::given(matchers::method("POST"))
                .and(matchers::path("/api/generate"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"response": r#"{"response":"It is a page."}"#})),
                )
                .mount(&server)
                .await;

            let summary = brain()
                .summarize("some long page text", &format!("{}/", server.uri()))
                .await
                .unwrap();
            assert_eq!(summary, "It is a page.");
        }
    }
}

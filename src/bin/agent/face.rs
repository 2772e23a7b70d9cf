use anyhow::{Result, bail};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use page_pilot::error::{StoreError, SurfaceError};
use page_pilot::surface::SurfaceReply;
use page_pilot::types::HistoryEntry;
use page_pilot::{Agent, CommandResult, Profile, Settings, Store};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

/// How many ports after the configured one are tried.
const PORT_ATTEMPTS: u16 = 10;

/// Events streamed to every open page via SSE.
#[derive(Clone, Debug)]
pub enum AgentEvent {
    Thinking { command: String },
    Result(CommandResult),
    Ready,
}

impl AgentEvent {
    fn to_sse_event(&self) -> Event {
        match self {
            AgentEvent::Thinking { command } => Event::default()
                .event("thinking")
                .data(json!({ "command": command }).to_string()),
            AgentEvent::Result(result) => Event::default()
                .event("result")
                .data(serde_json::to_string(result).unwrap_or_else(|_| "{}".into())),
            AgentEvent::Ready => Event::default().event("ready").data("{}"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    pub store: Arc<Store>,
    pub events: broadcast::Sender<AgentEvent>,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        }
    }
}

impl From<SurfaceError> for ApiError {
    fn from(e: SurfaceError) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/cancel", post(cancel_handler))
        .route("/events", get(sse_handler))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/profile", get(get_profile).put(put_profile))
        .route("/history", get(history_handler))
        .route("/page", get(page_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(Arc::new(state))
}

/// Bind the first free port in `first..first + PORT_ATTEMPTS`.
pub async fn bind(first: u16) -> Result<(TcpListener, u16)> {
    for port in first..first.saturating_add(PORT_ATTEMPTS) {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return Ok((listener, port)),
            Err(e) => warn!(port, error = %e, "port unavailable"),
        }
    }
    bail!(
        "could not bind any port in {first}..{}, is another agent running?",
        first.saturating_add(PORT_ATTEMPTS)
    )
}

/// Serve the UI until the process stops.
pub async fn serve(port: u16, agent: Arc<Agent>, store: Arc<Store>) -> Result<()> {
    let (events, _) = broadcast::channel::<AgentEvent>(64);
    let app = router(AppState {
        agent,
        store,
        events,
    });

    let (listener, port) = bind(port).await?;
    info!("web UI running at http://localhost:{port}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> Json<CommandResult> {
    info!(command = %payload.command, "POST /command");
    let settings = state.store.load_settings().unwrap_or_else(|e| {
        warn!(error = %e, "falling back to default settings");
        Settings::default()
    });

    // A rejected command must not flip other pages back to ready.
    let announce = !state.agent.is_busy();
    if announce {
        let _ = state.events.send(AgentEvent::Thinking {
            command: payload.command.clone(),
        });
    }
    let result = state.agent.process(&payload.command, settings).await;
    if announce {
        let _ = state.events.send(AgentEvent::Result(result.clone()));
        let _ = state.events.send(AgentEvent::Ready);
    }
    Json(result)
}

async fn cancel_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let cancelled = state.agent.cancel();
    Json(json!({ "cancelled": cancelled }))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|event| match event {
        Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
        Err(_) => None,
    });
    Sse::new(stream)
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Result<Json<Settings>, ApiError> {
    Ok(Json(state.store.load_settings()?))
}

async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    state.store.save_settings(&settings)?;
    info!(use_model = settings.use_language_model, endpoint = %settings.model_endpoint, "settings saved");
    Ok(Json(settings))
}

async fn get_profile(State(state): State<Arc<AppState>>) -> Result<Json<Profile>, ApiError> {
    Ok(Json(state.store.load_profile()?))
}

async fn put_profile(
    State(state): State<Arc<AppState>>,
    Json(profile): Json<Profile>,
) -> Result<Json<Profile>, ApiError> {
    state.store.save_profile(&profile)?;
    info!("profile saved");
    Ok(Json(profile))
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    Ok(Json(state.store.history()?))
}

async fn page_handler(State(state): State<Arc<AppState>>) -> Result<Json<SurfaceReply>, ApiError> {
    Ok(Json(state.agent.page_info().await?))
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Page Pilot</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    min-height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 20px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; flex: 1; }
  header .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  header .dot.busy { background: #f59e0b; animation: pulse 1s infinite; }
  @keyframes pulse { 0%, 100% { opacity: 1; } 50% { opacity: 0.4; } }
  .main {
    flex: 1;
    max-width: 800px;
    width: 100%;
    margin: 0 auto;
    padding: 24px 32px;
    display: flex;
    flex-direction: column;
    gap: 16px;
  }
  #log { display: flex; flex-direction: column; gap: 8px; }
  .entry { padding: 10px 14px; border-radius: 8px; font-size: 14px; line-height: 1.5; white-space: pre-wrap; }
  .entry.user { background: #1a1a2e; border-left: 3px solid #6366f1; }
  .entry.success { background: #0a1a0a; border-left: 3px solid #22c55e; color: #86efac; }
  .entry.warning { background: #1a150a; border-left: 3px solid #f59e0b; color: #fcd34d; }
  .entry.error { background: #1a0a0a; border-left: 3px solid #ef4444; color: #fca5a5; }
  .entry.unknown_intent { background: #111118; border-left: 3px solid #64748b; color: #cbd5e1; }
  .entry details { margin-top: 6px; color: #94a3b8; font-size: 12px; }
  .entry pre { font-family: 'Cascadia Code', 'Fira Code', monospace; overflow-x: auto; }
  .input-area { display: flex; gap: 8px; }
  input[type=text], input[type=email], input[type=tel] {
    flex: 1;
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 10px 14px;
    color: #fff;
    font-size: 15px;
    outline: none;
  }
  input:focus { border-color: #6366f1; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 10px 20px;
    font-size: 14px;
    font-weight: 600;
    cursor: pointer;
  }
  button:hover { background: #4f46e5; }
  button.secondary { background: #1f2937; }
  fieldset { border: 1px solid #1a1a2e; border-radius: 8px; padding: 12px; display: grid; gap: 8px; }
  legend { padding: 0 6px; color: #94a3b8; font-size: 13px; }
  label { font-size: 13px; display: flex; gap: 8px; align-items: center; }
  #history li { font-size: 13px; color: #94a3b8; list-style: none; cursor: pointer; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>Page Pilot</h1>
    <button class="secondary" onclick="cancelCommand()">Stop</button>
  </header>
  <div class="main">
    <div class="input-area">
      <input type="text" id="cmd" placeholder="scroll down, search for otters, click sign in..." autofocus />
      <button onclick="send()">Send</button>
    </div>
    <div id="log"></div>
    <fieldset>
      <legend>Language model</legend>
      <label><input type="checkbox" id="use-model" /> Use the local model for commands the rules miss</label>
      <input type="text" id="endpoint" placeholder="http://localhost:11434" />
      <button onclick="saveSettings()">Save settings</button>
    </fieldset>
    <fieldset>
      <legend>Autofill profile</legend>
      <input type="text" id="p-name" placeholder="Name" />
      <input type="email" id="p-email" placeholder="Email" />
      <input type="tel" id="p-phone" placeholder="Phone" />
      <input type="text" id="p-address" placeholder="Address" />
      <button onclick="saveProfile()">Save profile</button>
    </fieldset>
    <fieldset>
      <legend>Recent commands</legend>
      <ul id="history"></ul>
    </fieldset>
  </div>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const dot = document.getElementById('status-dot');
  const esc = (s) => String(s).replace(/&/g, '&amp;').replace(/</g, '&lt;');

  function addEntry(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.prepend(div);
  }

  function showResult(result) {
    let html = esc(result.message);
    if (result.text) {
      html += '<details><summary>Page text</summary><pre>' + esc(result.text) + '</pre></details>';
    }
    if (result.plan) {
      html += '<details><summary>Plan</summary><pre>' + esc(JSON.stringify(result.plan, null, 2)) + '</pre></details>';
    }
    addEntry(result.status, html);
  }

  async function send() {
    const text = cmd.value.trim();
    if (!text) return;
    cmd.value = '';
    addEntry('user', '<strong>You:</strong> ' + esc(text));
    const res = await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({command: text}),
    });
    showResult(await res.json());
    loadHistory();
  }

  async function cancelCommand() {
    await fetch('/cancel', { method: 'POST' });
  }

  async function loadSettings() {
    const s = await (await fetch('/settings')).json();
    document.getElementById('use-model').checked = !!s.useLanguageModel;
    document.getElementById('endpoint').value = s.modelEndpoint || '';
  }

  async function saveSettings() {
    await fetch('/settings', {
      method: 'PUT',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({
        useLanguageModel: document.getElementById('use-model').checked,
        modelEndpoint: document.getElementById('endpoint').value.trim() || 'http://localhost:11434',
      }),
    });
  }

  const PROFILE_FIELDS = ['name', 'email', 'phone', 'address'];

  async function loadProfile() {
    const p = await (await fetch('/profile')).json();
    for (const f of PROFILE_FIELDS) document.getElementById('p-' + f).value = p[f] || '';
  }

  async function saveProfile() {
    const body = {};
    for (const f of PROFILE_FIELDS) {
      const v = document.getElementById('p-' + f).value.trim();
      if (v) body[f] = v;
    }
    await fetch('/profile', {
      method: 'PUT',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify(body),
    });
  }

  async function loadHistory() {
    const entries = await (await fetch('/history')).json();
    const list = document.getElementById('history');
    list.innerHTML = '';
    for (const e of entries.slice(-10).reverse()) {
      const li = document.createElement('li');
      li.textContent = e.command;
      li.onclick = () => { cmd.value = e.command; cmd.focus(); };
      list.appendChild(li);
    }
  }

  cmd.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  const es = new EventSource('/events');
  es.addEventListener('thinking', () => { dot.className = 'dot busy'; });
  es.addEventListener('ready', () => { dot.className = 'dot'; });

  loadSettings();
  loadProfile();
  loadHistory();
</script>
</body>
</html>
"##;

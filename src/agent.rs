use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::brain::Brain;
use crate::config::Config;
use crate::context::CommandContext;
use crate::error::SurfaceError;
use crate::hands::Hands;
use crate::interpreter::Interpreter;
use crate::rules;
use crate::store::Store;
use crate::surface::{Surface, SurfaceReply};
use crate::types::{CommandResult, Settings};

const BUSY: &str = "Still working on the previous command.";

/// Cancel handle of the command in flight, if any.
type FlightSlot = Mutex<Option<watch::Sender<bool>>>;

fn lock(slot: &FlightSlot) -> MutexGuard<'_, Option<watch::Sender<bool>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Occupies the flight slot for one command and frees it on drop.
struct Flight<'a> {
    slot: &'a FlightSlot,
}

impl<'a> Flight<'a> {
    /// Claim the slot, handing back the receiving end of a fresh cancel flag.
    fn claim(slot: &'a FlightSlot) -> Option<(Self, watch::Receiver<bool>)> {
        let mut current = lock(slot);
        if current.is_some() {
            return None;
        }
        let (tx, rx) = watch::channel(false);
        *current = Some(tx);
        Some((Self { slot }, rx))
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

/// Turns user commands into results: rules first, then the model.
///
/// Only one command runs at a time; a command submitted while another is in
/// flight is rejected rather than queued.
pub struct Agent {
    hands: Hands,
    brain: Brain,
    store: Arc<Store>,
    flight: FlightSlot,
}

impl Agent {
    pub fn new(surface: Arc<dyn Surface>, store: Arc<Store>, config: &Config) -> Self {
        Self {
            hands: Hands::new(surface, store.clone(), config.surface_timeout()),
            brain: Brain::new(config.model.clone(), config.model_timeout()),
            store,
            flight: Mutex::new(None),
        }
    }

    pub async fn process(&self, command: &str, settings: Settings) -> CommandResult {
        let Some((_flight, cancel)) = Flight::claim(&self.flight) else {
            warn!(command, "rejecting command, another one is in flight");
            return CommandResult::warning(BUSY);
        };

        let trimmed = command.trim();
        info!(command = trimmed, use_model = settings.use_language_model, "processing command");
        if trimmed.is_empty() {
            return CommandResult::unknown_intent("I didn't understand that command.");
        }
        if let Err(e) = self.store.add_to_history(trimmed) {
            warn!(error = %e, "could not record command history");
        }

        let ctx = CommandContext::new(settings, cancel);

        // Rules see the text as typed; "starts with" checks are positional.
        if let Some(action) = rules::match_command(command) {
            info!(?action, "rule matched");
            return self.hands.apply(&action, &ctx).await;
        }

        if !ctx.settings.use_language_model {
            return CommandResult::unknown_intent("I didn't understand that command.");
        }

        match self
            .brain
            .get_plan(trimmed, &ctx.settings.model_endpoint)
            .await
        {
            Ok(plan) => Interpreter::new(&self.hands, &self.brain).run(plan, &ctx).await,
            Err(e) => {
                error!(error = %e, "model call failed");
                CommandResult::error(format!("AI unavailable. {e}"))
            }
        }
    }

    /// Ask the in-flight command to stop at its next pause.
    /// Returns whether a command was running.
    pub fn cancel(&self) -> bool {
        match lock(&self.flight).as_ref() {
            Some(cancel) => {
                info!("cancelling in-flight command");
                cancel.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.flight).is_some()
    }

    pub async fn page_info(&self) -> Result<SurfaceReply, SurfaceError> {
        self.hands.page_info().await
    }
}

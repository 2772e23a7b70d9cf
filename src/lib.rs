//! Drive a browser tab with plain-language commands.
//!
//! A command is first tried against the rule matcher; anything it does not
//! recognize goes to a local language model, whose plan is interpreted step by
//! step against a [`Surface`].

pub mod agent;
pub mod brain;
pub mod chrome;
pub mod config;
pub mod context;
pub mod dom;
pub mod error;
pub mod hands;
pub mod interpreter;
pub mod logging;
pub mod rules;
pub mod store;
pub mod surface;
pub mod types;

pub use agent::Agent;
pub use config::Config;
pub use store::Store;
pub use surface::Surface;
pub use types::{Action, CommandResult, Plan, Profile, Settings, Status, Step};

//! Keyword rules tried before any model call.

use crate::types::{Action, NavDirection, ScrollDirection, TabOp};

const CLICK_VERBS: [&str; 3] = ["click", "play", "select"];

/// Map a command to an action without touching the network.
///
/// Matching is case-insensitive and the first rule that fires wins.
pub fn match_command(text: &str) -> Option<Action> {
    let lower = text.to_lowercase();

    let scroll = [
        ("scroll down", ScrollDirection::Down),
        ("scroll up", ScrollDirection::Up),
        ("scroll to top", ScrollDirection::Top),
        ("scroll to bottom", ScrollDirection::Bottom),
    ];
    for (phrase, direction) in scroll {
        if lower.contains(phrase) {
            return Some(Action::Scroll { direction });
        }
    }

    if lower.contains("go back") {
        return Some(Action::Navigate {
            direction: NavDirection::Back,
        });
    }
    if lower.contains("go forward") {
        return Some(Action::Navigate {
            direction: NavDirection::Forward,
        });
    }
    if lower.contains("refresh") || lower.contains("reload") {
        return Some(Action::Navigate {
            direction: NavDirection::Reload,
        });
    }

    if lower.contains("new tab") {
        return Some(Action::Tab { op: TabOp::New });
    }
    if lower.contains("close tab") {
        return Some(Action::Tab { op: TabOp::Close });
    }

    if let Some(query) = lower.strip_prefix("search for ") {
        return Some(Action::Search {
            query: query.to_string(),
        });
    }

    if ["fill this form", "autofill", "fill form"]
        .iter()
        .any(|phrase| lower.contains(phrase))
    {
        return Some(Action::FillForm);
    }

    click_target(&lower).map(|target| Action::Click { target })
}

/// "click X", "play X", "select on X" -> "X".
fn click_target(lower: &str) -> Option<String> {
    let rest = CLICK_VERBS.iter().find_map(|verb| {
        lower
            .strip_prefix(verb)
            .filter(|rest| rest.starts_with(' '))
    })?;
    let rest = rest.trim_start();
    let rest = match rest.strip_prefix("on") {
        Some(after) if after.starts_with(char::is_whitespace) => after.trim_start(),
        _ => rest,
    };
    let target = rest.trim();
    (!target.is_empty()).then(|| target.to_string())
}

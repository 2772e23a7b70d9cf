//! The content handler evaluated inside the page.
//!
//! Each request is serialized into a call of [`CONTENT_HANDLER_JS`]; the
//! handler returns its reply as a JSON string, which [`parse_reply`] decodes.

use crate::surface::{SurfaceReply, SurfaceRequest};

/// Longest text returned by `getText` and `getPageInfo`.
pub const PAGE_TEXT_MAX_CHARS: usize = 5000;

/// Scroll distance for up/down, in CSS pixels.
pub const SCROLL_STEP_PX: u32 = 500;

/// A function expression taking one request object and returning the reply.
///
/// Click matching walks `a, button, input[type=submit], [role=button],
/// [tabindex], span, div, h3`; DIV and SPAN only count with a pointer cursor,
/// and only elements fully inside the viewport are considered. An exact text
/// match wins at once, otherwise the shortest candidate containing the target.
/// Type matching prefers an exact placeholder or aria-label, then a substring
/// of placeholder, aria-label or name.
pub const CONTENT_HANDLER_JS: &str = r#"
(function (request) {
  const MAX_TEXT = __MAX_TEXT__;
  const STEP = __STEP__;
  const clean = (text) => (text || '').replace(/\s+/g, ' ').trim().substring(0, MAX_TEXT);

  const inViewport = (el) => {
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0 && r.top >= 0 && r.bottom <= window.innerHeight;
  };
  const hasSize = (el) => {
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  };
  const labelOf = (el) =>
    (el.innerText || el.getAttribute('aria-label') || el.value || '').toLowerCase();

  function scroll(direction) {
    if (direction === 'top') {
      window.scrollTo({ top: 0, behavior: 'smooth' });
    } else if (direction === 'bottom') {
      window.scrollTo({ top: document.body.scrollHeight, behavior: 'smooth' });
    } else {
      window.scrollBy({ top: direction === 'up' ? -STEP : STEP, behavior: 'smooth' });
    }
    return { status: 'success' };
  }

  function click(target) {
    const wanted = (target || '').toLowerCase();
    const candidates = document.querySelectorAll(
      'a, button, input[type="submit"], [role="button"], [tabindex], span, div, h3');
    let best = null;
    let bestLabel = '';
    for (const el of candidates) {
      if ((el.tagName === 'DIV' || el.tagName === 'SPAN') &&
          window.getComputedStyle(el).cursor !== 'pointer') continue;
      if (!inViewport(el)) continue;
      const label = labelOf(el);
      if (!label.trim()) continue;
      if (label === wanted) { best = el; break; }
      if (label.includes(wanted) && (!best || label.length < bestLabel.length)) {
        best = el;
        bestLabel = label;
      }
    }
    if (!best) {
      return { status: 'error', message: 'Could not find element with text "' + wanted + '"' };
    }
    best.scrollIntoView({ behavior: 'smooth', block: 'center' });
    const opts = { bubbles: true, cancelable: true, view: window };
    for (const kind of ['mouseover', 'mousedown', 'mouseup', 'click']) {
      best.dispatchEvent(new MouseEvent(kind, opts));
    }
    if (best.tagName === 'A' || best.tagName === 'BUTTON' || best.tagName === 'INPUT') {
      best.click();
    }
    return { status: 'success', message: 'Clicked "' + wanted + '"' };
  }

  function type(target, text) {
    const wanted = (target || '').toLowerCase();
    const value = text || '';
    let best = null;
    for (const el of document.querySelectorAll('input, textarea, [contenteditable="true"]')) {
      if (!hasSize(el)) continue;
      const placeholder = (el.placeholder || '').toLowerCase();
      const aria = (el.getAttribute('aria-label') || '').toLowerCase();
      const name = (el.name || '').toLowerCase();
      if (placeholder === wanted || aria === wanted) { best = el; break; }
      if (placeholder.includes(wanted) || aria.includes(wanted) || name.includes(wanted)) {
        best = el;
      }
    }
    if (!best) {
      return { status: 'error', message: 'Input "' + wanted + '" not found' };
    }
    best.focus();
    best.value = value;
    best.dispatchEvent(new Event('input', { bubbles: true }));
    best.dispatchEvent(new Event('change', { bubbles: true }));
    return { status: 'success', message: 'Typed "' + value + '"' };
  }

  function fillForm(profile) {
    profile = profile || {};
    let filled = 0;
    const put = (input, value) => {
      if (!value) return;
      input.value = value;
      input.dispatchEvent(new Event('input', { bubbles: true }));
      filled++;
    };
    for (const input of document.querySelectorAll('input, textarea, select')) {
      const label = (input.labels && input.labels[0] && input.labels[0].innerText) || '';
      const context = [input.name, input.id, input.placeholder, label]
        .map((part) => (part || '').toLowerCase())
        .join(' ');
      if (context.includes('name') || context.includes('user')) {
        put(input, profile.name);
      } else if (context.includes('email') || context.includes('mail')) {
        put(input, profile.email);
      } else if (context.includes('phone') || context.includes('tel')) {
        put(input, profile.phone);
      } else if (context.includes('address')) {
        put(input, profile.address);
      }
    }
    return { status: 'success', filled: filled };
  }

  switch (request.action) {
    case 'scroll': return scroll(request.direction);
    case 'getText': return { status: 'success', text: clean(document.body && document.body.innerText) };
    case 'click': return click(request.target);
    case 'type': return type(request.target, request.text);
    case 'fillForm': return fillForm(request.profile);
    case 'getPageInfo':
      return {
        status: 'success',
        title: document.title,
        url: window.location.href,
        visibleText: ((document.body && document.body.innerText) || '').substring(0, MAX_TEXT),
      };
    default:
      return { status: 'error', message: 'Unknown action ' + request.action };
  }
})
"#;

/// Build the expression that runs `request` through the handler and yields
/// the reply serialized as a JSON string.
pub fn handler_call(request: &SurfaceRequest) -> Result<String, serde_json::Error> {
    let request = serde_json::to_string(request)?;
    let handler = CONTENT_HANDLER_JS
        .replace("__MAX_TEXT__", &PAGE_TEXT_MAX_CHARS.to_string())
        .replace("__STEP__", &SCROLL_STEP_PX.to_string());
    Ok(format!("JSON.stringify({}({request}))", handler.trim()))
}

pub fn parse_reply(raw: &str) -> Result<SurfaceReply, serde_json::Error> {
    serde_json::from_str(raw)
}

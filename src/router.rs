//! `key:value` text frames and a small dispatcher for them.
//!
//! Payloads are newline-free text. The first colon separates the key from
//! the value; the value is kept verbatim, including further colons and
//! surrounding whitespace. Text without a colon is a [`Frame::Raw`] payload.
//!
//! ```
//! use tether_client::router::{Frame, MessageRouter};
//!
//! assert_eq!(
//!     Frame::parse("temp:21.5"),
//!     Frame::Pair { key: "temp", value: "21.5" }
//! );
//! assert_eq!(Frame::parse("hello"), Frame::Raw("hello"));
//!
//! let router = MessageRouter::new().on("temp", |value| println!("temperature {value}"));
//! assert!(router.dispatch("temp:21.5"));
//! assert!(!router.dispatch("humidity:40"));
//! ```

use std::collections::HashMap;
use std::fmt;

/// A parsed text payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// `key:value`, split at the first colon.
    Pair {
        /// Text before the first colon. May be empty.
        key: &'a str,
        /// Everything after the first colon, untouched.
        value: &'a str,
    },
    /// Text without any colon.
    Raw(&'a str),
}

impl<'a> Frame<'a> {
    /// Split `text` at its first colon.
    pub fn parse(text: &'a str) -> Self {
        match text.split_once(':') {
            Some((key, value)) => Self::Pair { key, value },
            None => Self::Raw(text),
        }
    }

    /// The key, if this is a pair.
    pub fn key(&self) -> Option<&'a str> {
        match self {
            Self::Pair { key, .. } => Some(key),
            Self::Raw(_) => None,
        }
    }

    /// The value of a pair, or the whole text of a raw frame.
    pub fn value(&self) -> &'a str {
        match self {
            Self::Pair { value, .. } => value,
            Self::Raw(text) => text,
        }
    }
}

impl fmt::Display for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pair { key, value } => write!(f, "{key}:{value}"),
            Self::Raw(text) => f.write_str(text),
        }
    }
}

/// Format a `key:value` payload.
pub fn pair(key: &str, value: &str) -> String {
    format!("{key}:{value}")
}

type ValueHandler = Box<dyn Fn(&str) + Send + Sync>;
type FallbackHandler = Box<dyn Fn(Frame<'_>) + Send + Sync>;

/// Routes incoming payloads to handlers by key.
///
/// Keys match exactly. A frame with no matching handler goes to the
/// fallback, if one is set.
#[derive(Default)]
pub struct MessageRouter {
    routes: HashMap<String, ValueHandler>,
    fallback: Option<FallbackHandler>,
}

impl MessageRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for frames whose key is `key`. Replaces any earlier handler.
    #[must_use]
    pub fn on(mut self, key: impl Into<String>, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.routes.insert(key.into(), Box::new(handler));
        self
    }

    /// Handle every frame no keyed handler claims, raw frames included.
    #[must_use]
    pub fn fallback(mut self, handler: impl Fn(Frame<'_>) + Send + Sync + 'static) -> Self {
        self.fallback = Some(Box::new(handler));
        self
    }

    /// Returns `true` if a handler is registered for `key`.
    pub fn handles(&self, key: &str) -> bool {
        self.routes.contains_key(key)
    }

    /// Route one payload. Returns `true` if any handler ran.
    pub fn dispatch(&self, text: &str) -> bool {
        let frame = Frame::parse(text);
        if let Some(handler) = frame.key().and_then(|key| self.routes.get(key)) {
            handler(frame.value());
            return true;
        }
        match &self.fallback {
            Some(fallback) => {
                fallback(frame);
                true
            }
            None => {
                tracing::trace!(key = ?frame.key(), "no route for frame");
                false
            }
        }
    }
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("MessageRouter")
            .field("routes", &keys)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

use std::any::Any;
use std::collections::BTreeMap;

use volley_core::Context;

/// Minimal per-session cookie jar: name/value pairs, sent back as a single
/// `cookie` header. Attributes (path, domain, expiry) are not modeled; every
/// cookie the target sets is replayed for the rest of the session.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn set(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// `cookie` header value, or `None` when the jar is empty.
    #[must_use]
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Stores the name/value pair of every `set-cookie` header.
    pub fn update_from_response(&mut self, headers: &[(String, String)]) {
        for (name, value) in headers {
            if !name.eq_ignore_ascii_case("set-cookie") {
                continue;
            }
            let pair = value.split(';').next().unwrap_or_default();
            if let Some((k, v)) = pair.split_once('=') {
                self.set(k.trim(), v.trim());
            }
        }
    }
}

/// Session-owned HTTP transport state, stored on the context and dropped
/// with it.
#[derive(Debug, Default)]
pub(crate) struct HttpTransport {
    pub jar: CookieJar,
}

/// The engine owns the transport slot; a session that somehow arrives with
/// another engine's state gets a fresh jar.
pub(crate) fn transport_mut(ctx: &mut Context) -> &mut HttpTransport {
    let fresh = !matches!(&ctx.transport, Some(t) if t.is::<HttpTransport>());
    if fresh {
        ctx.transport = Some(Box::new(HttpTransport::default()) as Box<dyn Any + Send>);
    }

    match ctx
        .transport
        .as_mut()
        .and_then(|t| t.downcast_mut::<HttpTransport>())
    {
        Some(t) => t,
        None => unreachable!("transport slot was just initialized"),
    }
}

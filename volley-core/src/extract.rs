use std::sync::Arc;

use rand::Rng as _;
use volley_value::{ObjectMap, Value};

use crate::config::{CaptureSpec, CssIndex, MatchSpec, Selector};
use crate::context::Context;
use crate::error::{StepError, StepResult};
use crate::expr::{self, Env, values_equal};
use crate::template;

/// Engine-agnostic view of a response, enough for extraction: buffered body
/// plus lowercased headers.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    pub body: &'a [u8],
    pub headers: &'a [(String, String)],
}

impl ResponseView<'_> {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_json(&self) -> bool {
        self.header("content-type")
            .is_some_and(|ct| ct.trim_start().starts_with("application/json"))
    }
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// The resolved selector expression; also the reporting key for this
    /// match, successful or not.
    pub expression: String,
    pub success: bool,
    pub expected: Value,
    pub got: Value,
    pub strict: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Captured variables in spec order.
    pub captures: Vec<(String, Value)>,
    pub matches: Vec<MatchOutcome>,
}

impl Extraction {
    /// A failed strict match is fatal to the owning step.
    #[must_use]
    pub fn has_failed_matches(&self) -> bool {
        self.matches.iter().any(|m| !m.success && m.strict)
    }

    /// A capture that extracted the empty string counts as failed.
    #[must_use]
    pub fn has_failed_captures(&self) -> bool {
        self.captures
            .iter()
            .any(|(_, v)| matches!(v, Value::String(s) if s.is_empty()))
    }

    pub fn apply_captures(&self, ctx: &mut Context) {
        for (name, value) in &self.captures {
            ctx.set_var(name, value.clone());
        }
    }
}

/// Runs capture specs, then match specs, strictly in order. The first hard
/// parser error (malformed content where a parser was mandated) aborts
/// extraction and becomes the step's error.
pub fn capture_or_match(
    captures: &[CaptureSpec],
    matches: &[MatchSpec],
    response: &ResponseView<'_>,
    ctx: &Context,
) -> StepResult<Extraction> {
    let mut out = Extraction::default();

    for spec in captures {
        let extracted = extract_one(&spec.selector, response)?;

        let value = match &spec.transform {
            Some(transform) => {
                // The transform sees the captures so far (including this
                // one) as its scope; errors and null results fall back to
                // the untransformed value.
                let mut scope = ObjectMap::default();
                for (name, value) in &out.captures {
                    scope.insert(Arc::<str>::from(name.as_str()), value.clone());
                }
                scope.insert(Arc::<str>::from(spec.as_var.as_str()), extracted.clone());

                match expr::eval(transform, &Env {
                    vars: &scope,
                    funcs: None,
                }) {
                    Some(v) if !v.is_null() => v,
                    _ => {
                        tracing::debug!(
                            transform,
                            capture = %spec.as_var,
                            "transform failed, keeping extracted value"
                        );
                        extracted
                    }
                }
            }
            None => extracted,
        };

        out.captures.push((spec.as_var.clone(), value));
    }

    for spec in matches {
        let got = extract_one(&spec.selector, response)?;
        let expected = template::resolve(&spec.value, ctx);
        let success = values_equal(&got, &expected);
        tracing::debug!(
            expression = %selector_expression(&spec.selector),
            ?expected,
            ?got,
            success,
            "match"
        );
        out.matches.push(MatchOutcome {
            expression: selector_expression(&spec.selector),
            success,
            expected,
            got,
            strict: spec.strict,
        });
    }

    Ok(out)
}

fn selector_expression(selector: &Selector) -> String {
    match selector {
        Selector::Json(expr) | Selector::XPath(expr) | Selector::Auto(expr) => expr.clone(),
        Selector::Regexp { expr, .. } => expr.clone(),
        Selector::Header(name) => name.clone(),
        Selector::Css { selector, .. } => selector.clone(),
    }
}

fn extract_one(selector: &Selector, response: &ResponseView<'_>) -> StepResult<Value> {
    match selector {
        Selector::Json(expr) => {
            let doc = parse_json(response.body)?;
            Ok(json_path(&doc, expr))
        }
        Selector::Auto(expr) => {
            // No explicit kind: infer from the content type. Non-JSON
            // content extracts nothing (XML support is not bundled).
            if response.is_json() {
                let doc = parse_json(response.body)?;
                Ok(json_path(&doc, expr))
            } else {
                Ok(Value::Null)
            }
        }
        Selector::XPath(expr) => {
            tracing::debug!(expr, "xpath extraction requested without XML support");
            Ok(Value::Null)
        }
        Selector::Regexp { expr, group, flags } => Ok(extract_regexp(
            &String::from_utf8_lossy(response.body),
            expr,
            *group,
            flags.as_deref(),
        )),
        Selector::Header(name) => Ok(response
            .header(name)
            .map(Value::string)
            .unwrap_or(Value::Null)),
        Selector::Css {
            selector,
            attr,
            index,
        } => Ok(extract_css(
            &String::from_utf8_lossy(response.body),
            selector,
            attr.as_deref(),
            index.as_ref(),
        )),
    }
}

fn parse_json(body: &[u8]) -> StepResult<Value> {
    serde_json::from_slice::<serde_json::Value>(body)
        .map(Value::from_json)
        .map_err(|err| StepError::Parse {
            format: "json",
            message: err.to_string(),
        })
}

/// JSONPath subset: optional leading `$`, dot children, bracket indices and
/// `[*]`/`.*` wildcards. Multiple matches pick one uniformly at random
/// (documented non-determinism, not an error).
fn json_path(doc: &Value, expr: &str) -> Value {
    let Some(segments) = parse_path(expr) else {
        return Value::Null;
    };

    let mut nodes: Vec<&Value> = vec![doc];
    for seg in &segments {
        let mut next = Vec::new();
        for node in nodes {
            match seg {
                PathSeg::Key(k) => {
                    if let Some(v) = node.get(k) {
                        next.push(v);
                    }
                }
                PathSeg::Index(i) => {
                    if let Value::Array(items) = node
                        && let Some(v) = items.get(*i)
                    {
                        next.push(v);
                    }
                }
                PathSeg::Wild => match node {
                    Value::Array(items) => next.extend(items.iter()),
                    Value::Object(map) => next.extend(map.values()),
                    _ => {}
                },
            }
        }
        nodes = next;
    }

    match nodes.len() {
        0 => Value::Null,
        1 => nodes[0].clone(),
        n => nodes[rand::rng().random_range(0..n)].clone(),
    }
}

#[derive(Debug, PartialEq)]
enum PathSeg {
    Key(String),
    Index(usize),
    Wild,
}

fn parse_path(expr: &str) -> Option<Vec<PathSeg>> {
    let expr = expr.strip_prefix('$').unwrap_or(expr);
    let mut segments = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => continue,
            '[' => {
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(ch) => inner.push(ch),
                        None => return None,
                    }
                }
                let inner = inner.trim();
                if inner == "*" {
                    segments.push(PathSeg::Wild);
                } else if let Ok(i) = inner.parse::<usize>() {
                    segments.push(PathSeg::Index(i));
                } else {
                    // Quoted key form: ['name']
                    let key = inner.trim_matches(|c| c == '\'' || c == '"');
                    segments.push(PathSeg::Key(key.to_string()));
                }
            }
            '*' => segments.push(PathSeg::Wild),
            _ => {
                let mut key = String::new();
                key.push(c);
                while let Some(&next) = chars.peek() {
                    if next == '.' || next == '[' {
                        break;
                    }
                    key.push(next);
                    chars.next();
                }
                segments.push(PathSeg::Key(key));
            }
        }
    }

    Some(segments)
}

/// No match (or an invalid pattern) yields an empty string, never an error.
fn extract_regexp(text: &str, expr: &str, group: Option<usize>, flags: Option<&str>) -> Value {
    let pattern = match flags {
        Some(flags) => {
            let flags: String = flags.chars().filter(|c| "imsUux".contains(*c)).collect();
            if flags.is_empty() {
                expr.to_string()
            } else {
                format!("(?{flags}){expr}")
            }
        }
        None => expr.to_string(),
    };

    let Ok(rx) = regex::Regex::new(&pattern) else {
        tracing::debug!(expr, "invalid regexp in capture spec");
        return Value::string("");
    };

    let Some(caps) = rx.captures(text) else {
        return Value::string("");
    };

    let m = group
        .and_then(|g| caps.get(g))
        .or_else(|| caps.get(0));
    m.map(|m| Value::string(m.as_str()))
        .unwrap_or(Value::string(""))
}

fn extract_css(
    text: &str,
    selector: &str,
    attr: Option<&str>,
    index: Option<&CssIndex>,
) -> Value {
    let Ok(sel) = scraper::Selector::parse(selector) else {
        tracing::debug!(selector, "invalid CSS selector in capture spec");
        return Value::string("");
    };

    let doc = scraper::Html::parse_document(text);
    let els: Vec<_> = doc.select(&sel).collect();
    if els.is_empty() {
        return Value::Null;
    }

    let i = match index {
        None => 0,
        Some(CssIndex::Number(n)) => *n,
        Some(CssIndex::Last) => els.len() - 1,
        Some(CssIndex::Random) => rand::rng().random_range(0..els.len()),
    };
    let Some(el) = els.get(i) else {
        return Value::Null;
    };

    match attr {
        Some(attr) => el
            .value()
            .attr(attr)
            .map(Value::string)
            .unwrap_or(Value::Null),
        None => Value::string(el.text().collect::<String>()),
    }
}

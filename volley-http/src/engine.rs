use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use tokio::time::Instant;

use volley_core::{
    Context, Defaults, EventSink, HookError, ProtocolEngine, RequestSpec, ResponseView, StepError,
    StepFn, StepOptions, StepResult, boxed_step, capture_or_match, resolve, resolve_str,
};

use crate::client::HttpClient;
use crate::error::Error;
use crate::jar::transport_mut;
use crate::types::{HttpRequest, HttpResponse};

const USER_AGENT: &str = concat!("volley ", env!("CARGO_PKG_VERSION"));

/// Hook mutating the assembled request before dispatch.
pub type BeforeRequestHook =
    Arc<dyn Fn(&mut PreparedRequest, &mut Context) -> Result<(), HookError> + Send + Sync>;

/// Hook observing the response after capture/match processing.
pub type AfterResponseHook = Arc<
    dyn Fn(&PreparedRequest, &HttpResponse, &mut Context) -> Result<(), HookError> + Send + Sync,
>;

#[derive(Clone, Default)]
pub struct HttpHooks {
    pub before_request: HashMap<String, BeforeRequestHook>,
    pub after_response: HashMap<String, AfterResponseHook>,
}

#[derive(Clone, Default)]
pub struct HttpEngineConfig {
    /// Base URL prefixed onto `/`-relative request urls.
    pub target: String,
    pub defaults: Defaults,
    pub hooks: HttpHooks,
}

/// The fully assembled request as `beforeRequest` hooks see it.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    /// Lowercased header names; later entries won the merge.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

/// HTTP protocol engine: executes `Request` steps against a session, reports
/// request/response/error/match events on the shared sink.
pub struct HttpEngine {
    client: HttpClient,
    config: Arc<HttpEngineConfig>,
}

impl HttpEngine {
    #[must_use]
    pub fn new(config: HttpEngineConfig) -> Self {
        Self::with_client(HttpClient::default(), config)
    }

    #[must_use]
    pub fn with_client(client: HttpClient, config: HttpEngineConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }
}

impl ProtocolEngine for HttpEngine {
    fn name(&self) -> &'static str {
        "http"
    }

    fn request_step(
        &self,
        spec: Arc<RequestSpec>,
        events: EventSink,
        opts: &StepOptions,
    ) -> StepFn {
        let client = self.client.clone();
        let config = self.config.clone();

        // Scenario-level hooks run before step-level ones.
        let before_names: Arc<[String]> = opts
            .before_request
            .iter()
            .chain(spec.before_request.iter())
            .cloned()
            .collect();
        let after_names: Arc<[String]> = opts
            .after_response
            .iter()
            .chain(spec.after_response.iter())
            .cloned()
            .collect();

        boxed_step(move |ctx: Context| {
            let client = client.clone();
            let config = config.clone();
            let spec = spec.clone();
            let events = events.clone();
            let before_names = before_names.clone();
            let after_names = after_names.clone();
            async move {
                execute(
                    client,
                    config,
                    spec,
                    events,
                    before_names,
                    after_names,
                    ctx,
                )
                .await
            }
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute(
    client: HttpClient,
    config: Arc<HttpEngineConfig>,
    spec: Arc<RequestSpec>,
    events: EventSink,
    before_names: Arc<[String]>,
    after_names: Arc<[String]>,
    mut ctx: Context,
) -> StepResult<Context> {
    if spec.url.is_empty() {
        events.error(&StepError::MissingUrl.code());
        return Err(StepError::MissingUrl);
    }

    let url = resolve_str(&spec.url, &ctx).to_display_string();
    if url.is_empty() {
        events.error(&StepError::MissingUrl.code());
        return Err(StepError::MissingUrl);
    }
    let url = if url.starts_with('/') {
        format!("{}{}", config.target, url)
    } else {
        url
    };

    let mut headers = merged_headers(&config.defaults.headers, &spec.headers, &ctx);

    let mut body = Bytes::new();
    if let Some(json) = &spec.json {
        let resolved = resolve(json, &ctx);
        body = match serde_json::to_vec(&resolved.to_json()) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                events.error("request_build");
                return Err(StepError::Transport {
                    kind: "request_build".to_string(),
                    message: err.to_string(),
                });
            }
        };
        ensure_header(&mut headers, "content-type", "application/json");
    } else if let Some(raw) = &spec.body {
        body = Bytes::from(resolve(raw, &ctx).to_display_string());
    } else if !spec.form.is_empty() {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in &spec.form {
            form.append_pair(name, &resolve(value, &ctx).to_display_string());
        }
        body = Bytes::from(form.finish());
        ensure_header(
            &mut headers,
            "content-type",
            "application/x-www-form-urlencoded",
        );
    }

    if let Some(auth) = &spec.auth {
        let user = resolve_str(&auth.user, &ctx).to_display_string();
        let pass = resolve_str(&auth.pass, &ctx).to_display_string();
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        ensure_header(&mut headers, "authorization", &format!("Basic {token}"));
    }

    // Step cookies land in the session jar; the jar rides on every request
    // of the session from here on.
    let cookie_pairs: Vec<(String, String)> = spec
        .cookie
        .iter()
        .map(|(name, value)| {
            (
                name.clone(),
                resolve_str(value, &ctx).to_display_string(),
            )
        })
        .collect();
    {
        let transport = transport_mut(&mut ctx);
        for (name, value) in &cookie_pairs {
            transport.jar.set(name, value);
        }
        if let Some(value) = transport.jar.header_value() {
            ensure_header(&mut headers, "cookie", &value);
        }
    }

    ensure_header(&mut headers, "user-agent", USER_AGENT);

    let mut prepared = PreparedRequest {
        method: spec.method.to_ascii_uppercase(),
        url,
        headers,
        body,
        timeout: spec.timeout.or(Some(config.defaults.timeout)),
    };

    for name in before_names.iter() {
        match config.hooks.before_request.get(name) {
            Some(hook) => {
                if let Err(err) = hook(&mut prepared, &mut ctx) {
                    let step_err = StepError::Hook {
                        name: name.clone(),
                        message: err.to_string(),
                    };
                    events.error(&step_err.code());
                    return Err(step_err);
                }
            }
            None => {
                tracing::debug!(hook = %name, "beforeRequest hook not registered, skipping");
            }
        }
    }

    let method = match http::Method::from_bytes(prepared.method.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            events.error("request_build");
            return Err(StepError::Transport {
                kind: "request_build".to_string(),
                message: format!("invalid method: {}", prepared.method),
            });
        }
    };

    tracing::debug!(method = %prepared.method, url = %prepared.url, "request");
    events.request();
    let started = Instant::now();

    let request = HttpRequest {
        method,
        url: prepared.url.clone(),
        headers: prepared.headers.clone(),
        body: prepared.body.clone(),
        timeout: prepared.timeout,
    };

    let response = match client.request(request).await {
        Ok(res) => res,
        Err(err) => {
            // No response event on a transport failure; the pending-request
            // gauge keeps counting the request as outstanding.
            let kind = err.transport_error_kind().to_string();
            events.error(&kind);
            tracing::debug!(url = %prepared.url, error = %err, "request failed");
            return Err(match err {
                Error::Timeout(_) => StepError::Timeout,
                other => StepError::Transport {
                    kind,
                    message: other.to_string(),
                },
            });
        }
    };

    let latency = started.elapsed();
    events.response(latency, response.status, &ctx.uid);
    ctx.success_count += 1;

    transport_mut(&mut ctx).jar.update_from_response(&response.headers);

    let mut failed_capture_or_match = false;
    if !spec.capture.is_empty() || !spec.matches.is_empty() {
        let view = ResponseView {
            body: &response.body,
            headers: &response.headers,
        };
        match capture_or_match(&spec.capture, &spec.matches, &view, &ctx) {
            Ok(extraction) => {
                failed_capture_or_match =
                    extraction.has_failed_matches() || extraction.has_failed_captures();
                if !failed_capture_or_match {
                    for outcome in &extraction.matches {
                        events.match_result(outcome);
                    }
                    extraction.apply_captures(&mut ctx);
                }
            }
            Err(err) => {
                events.error(&err.code());
                return Err(err);
            }
        }
    }

    for name in after_names.iter() {
        match config.hooks.after_response.get(name) {
            Some(hook) => {
                if let Err(err) = hook(&prepared, &response, &mut ctx) {
                    let step_err = StepError::Hook {
                        name: name.clone(),
                        message: err.to_string(),
                    };
                    events.error(&step_err.code());
                    return Err(step_err);
                }
            }
            None => {
                tracing::debug!(hook = %name, "afterResponse hook not registered, skipping");
            }
        }
    }

    if failed_capture_or_match {
        let err = StepError::FailedCaptureOrMatch;
        events.error(&err.code());
        return Err(err);
    }

    Ok(ctx)
}

/// Default headers first, step headers override; names lowercased, values
/// templated.
fn merged_headers(
    defaults: &[(String, String)],
    step: &[(String, String)],
    ctx: &Context,
) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for (name, value) in defaults.iter().chain(step.iter()) {
        let name = name.to_ascii_lowercase();
        let value = resolve_str(value, ctx).to_display_string();
        match out.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => out.push((name, value)),
        }
    }
    out
}

fn ensure_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if !headers.iter().any(|(existing, _)| existing == name) {
        headers.push((name.to_string(), value.to_string()));
    }
}

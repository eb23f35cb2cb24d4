use std::sync::Arc;
use std::time::Duration;

use volley_core::{
    CaptureSpec, Context, Defaults, EventSink, HookError, MatchSpec, ObjectMap, PendingCounters,
    ProtocolEngine, RequestSpec, Selector, SessionStats, StepError, StepOptions, Value,
};
use volley_http::{HttpEngine, HttpEngineConfig, HttpHooks};
use volley_testserver::TestServer;

struct Harness {
    server: TestServer,
    stats: Arc<SessionStats>,
    pending: Arc<PendingCounters>,
}

impl Harness {
    async fn start() -> Self {
        let server = match TestServer::start().await {
            Ok(s) => s,
            Err(err) => panic!("failed to start test server: {err}"),
        };
        Self {
            server,
            stats: Arc::new(SessionStats::default()),
            pending: Arc::new(PendingCounters::default()),
        }
    }

    fn engine(&self, hooks: HttpHooks) -> HttpEngine {
        HttpEngine::new(HttpEngineConfig {
            target: self.server.base_url().to_string(),
            defaults: Defaults::default(),
            hooks,
        })
    }

    fn sink(&self) -> EventSink {
        EventSink::new(self.stats.clone(), self.pending.clone())
    }

    async fn run_step(
        &self,
        engine: &HttpEngine,
        spec: RequestSpec,
        ctx: Context,
    ) -> Result<Context, StepError> {
        let step = engine.request_step(Arc::new(spec), self.sink(), &StepOptions::default());
        step(ctx).await
    }
}

fn get(url: &str) -> RequestSpec {
    RequestSpec {
        method: "GET".to_string(),
        url: url.to_string(),
        ..RequestSpec::default()
    }
}

fn empty_ctx() -> Context {
    Context::with_vars(ObjectMap::default())
}

#[tokio::test]
async fn get_records_status_latency_and_pending_counters() {
    let h = Harness::start().await;
    let engine = h.engine(HttpHooks::default());

    let ctx = match h.run_step(&engine, get("/hello"), empty_ctx()).await {
        Ok(ctx) => ctx,
        Err(err) => panic!("step failed: {err}"),
    };
    assert_eq!(ctx.success_count, 1);

    let snap = h.stats.snapshot();
    assert_eq!(snap.requests_completed, 1);
    assert_eq!(snap.request_marks, 1);
    assert_eq!(snap.codes.get(&200), Some(&1));
    assert_eq!(snap.latency_us.len(), 1);
    assert_eq!(h.pending.requests(), 0);

    h.server.shutdown().await;
}

#[tokio::test]
async fn templated_json_body_preserves_structured_values() {
    let h = Harness::start().await;
    let engine = h.engine(HttpHooks::default());

    let mut vars = ObjectMap::default();
    vars.insert(Arc::<str>::from("id"), Value::I64(7));
    let ctx = Context::with_vars(vars);

    // The echo endpoint reflects the JSON body; capturing `$.id` back out
    // proves the templated field went over the wire as a number.
    let mut spec = RequestSpec {
        method: "POST".to_string(),
        url: "/echo".to_string(),
        ..RequestSpec::default()
    };
    let mut body = ObjectMap::default();
    body.insert(Arc::<str>::from("id"), Value::from("{{ id }}"));
    body.insert(Arc::<str>::from("tag"), Value::from("n-{{ id }}"));
    spec.json = Some(Value::Object(body));
    spec.capture = vec![
        CaptureSpec {
            selector: Selector::Json("$.id".to_string()),
            as_var: "echoedId".to_string(),
            transform: None,
        },
        CaptureSpec {
            selector: Selector::Json("$.tag".to_string()),
            as_var: "echoedTag".to_string(),
            transform: None,
        },
    ];

    let ctx = match h.run_step(&engine, spec, ctx).await {
        Ok(ctx) => ctx,
        Err(err) => panic!("step failed: {err}"),
    };

    assert_eq!(ctx.vars.get("echoedId"), Some(&Value::I64(7)));
    assert_eq!(ctx.vars.get("echoedTag"), Some(&Value::from("n-7")));
    assert_eq!(h.server.stats().saw_json_content_type(), 1);

    h.server.shutdown().await;
}

#[tokio::test]
async fn capture_and_match_against_json_endpoint() {
    let h = Harness::start().await;
    let engine = h.engine(HttpHooks::default());

    let mut spec = get("/json");
    spec.capture = vec![CaptureSpec {
        selector: Selector::Json("$.token".to_string()),
        as_var: "token".to_string(),
        transform: None,
    }];
    spec.matches = vec![MatchSpec {
        selector: Selector::Json("$.user.name".to_string()),
        value: Value::from("ada"),
        strict: true,
    }];

    let ctx = match h.run_step(&engine, spec, empty_ctx()).await {
        Ok(ctx) => ctx,
        Err(err) => panic!("step failed: {err}"),
    };

    assert_eq!(ctx.vars.get("token"), Some(&Value::from("abc123")));
    let snap = h.stats.snapshot();
    assert_eq!(snap.matches, 1);

    h.server.shutdown().await;
}

#[tokio::test]
async fn failed_strict_match_fails_the_step() {
    let h = Harness::start().await;
    let engine = h.engine(HttpHooks::default());

    let mut spec = get("/json");
    spec.matches = vec![MatchSpec {
        selector: Selector::Json("$.user.name".to_string()),
        value: Value::from("grace"),
        strict: true,
    }];

    let err = match h.run_step(&engine, spec, empty_ctx()).await {
        Ok(_) => panic!("expected a failed match"),
        Err(err) => err,
    };
    assert!(matches!(err, StepError::FailedCaptureOrMatch));

    let snap = h.stats.snapshot();
    assert_eq!(snap.errors.get("capture_or_match"), Some(&1));
    // The response itself still completed.
    assert_eq!(snap.requests_completed, 1);

    h.server.shutdown().await;
}

#[tokio::test]
async fn non_strict_match_failure_does_not_fail_the_step() {
    let h = Harness::start().await;
    let engine = h.engine(HttpHooks::default());

    let mut spec = get("/json");
    spec.matches = vec![MatchSpec {
        selector: Selector::Json("$.user.name".to_string()),
        value: Value::from("grace"),
        strict: false,
    }];

    if let Err(err) = h.run_step(&engine, spec, empty_ctx()).await {
        panic!("step failed: {err}");
    }

    h.server.shutdown().await;
}

#[tokio::test]
async fn cookies_persist_across_steps_of_a_session() {
    let h = Harness::start().await;
    let engine = h.engine(HttpHooks::default());

    let ctx = match h.run_step(&engine, get("/login"), empty_ctx()).await {
        Ok(ctx) => ctx,
        Err(err) => panic!("login failed: {err}"),
    };

    let mut spec = get("/whoami");
    spec.capture = vec![CaptureSpec {
        selector: Selector::Regexp {
            expr: "sid=([a-z0-9-]+)".to_string(),
            group: Some(1),
            flags: None,
        },
        as_var: "sid".to_string(),
        transform: None,
    }];

    let ctx = match h.run_step(&engine, spec, ctx).await {
        Ok(ctx) => ctx,
        Err(err) => panic!("whoami failed: {err}"),
    };
    assert_eq!(ctx.vars.get("sid"), Some(&Value::from("s-123")));

    h.server.shutdown().await;
}

#[tokio::test]
async fn hooks_mutate_request_and_observe_response() {
    let h = Harness::start().await;

    let mut hooks = HttpHooks::default();
    hooks.before_request.insert(
        "tag".to_string(),
        Arc::new(|req, _ctx| {
            req.headers.push(("x-test".to_string(), "1".to_string()));
            Ok(())
        }),
    );
    hooks.after_response.insert(
        "note_status".to_string(),
        Arc::new(|_req, res, ctx| {
            ctx.set_var("lastStatus", Value::I64(res.status as i64));
            Ok(())
        }),
    );
    let engine = h.engine(hooks);

    let mut spec = get("/hello");
    spec.before_request = vec!["tag".to_string()];
    spec.after_response = vec!["note_status".to_string()];

    let ctx = match h.run_step(&engine, spec, empty_ctx()).await {
        Ok(ctx) => ctx,
        Err(err) => panic!("step failed: {err}"),
    };

    assert_eq!(ctx.vars.get("lastStatus"), Some(&Value::I64(200)));
    assert_eq!(h.server.stats().saw_test_header(), 1);

    h.server.shutdown().await;
}

#[tokio::test]
async fn hook_errors_abort_the_step() {
    let h = Harness::start().await;

    let mut hooks = HttpHooks::default();
    hooks.before_request.insert(
        "refuse".to_string(),
        Arc::new(|_req, _ctx| Err(HookError::new("refused"))),
    );
    let engine = h.engine(hooks);

    let mut spec = get("/hello");
    spec.before_request = vec!["refuse".to_string()];

    let err = match h.run_step(&engine, spec, empty_ctx()).await {
        Ok(_) => panic!("expected hook failure"),
        Err(err) => err,
    };
    assert!(matches!(err, StepError::Hook { .. }));
    // The request never went out.
    assert_eq!(h.server.stats().requests_total(), 0);
    assert_eq!(h.stats.snapshot().request_marks, 0);

    h.server.shutdown().await;
}

#[tokio::test]
async fn response_timeout_fails_the_step_and_is_counted() {
    let h = Harness::start().await;
    let engine = h.engine(HttpHooks::default());

    let mut spec = get("/slow");
    spec.timeout = Some(Duration::from_millis(10));

    let err = match h.run_step(&engine, spec, empty_ctx()).await {
        Ok(_) => panic!("expected a timeout"),
        Err(err) => err,
    };
    assert!(matches!(err, StepError::Timeout));

    let snap = h.stats.snapshot();
    assert_eq!(snap.errors.get("timeout"), Some(&1));
    // No response event: the request stays pending, as documented.
    assert_eq!(h.pending.requests(), 1);

    h.server.shutdown().await;
}

#[tokio::test]
async fn missing_url_is_a_step_error() {
    let h = Harness::start().await;
    let engine = h.engine(HttpHooks::default());

    let err = match h.run_step(&engine, get(""), empty_ctx()).await {
        Ok(_) => panic!("expected an error"),
        Err(err) => err,
    };
    assert!(matches!(err, StepError::MissingUrl));
    assert_eq!(h.stats.snapshot().errors.get("url_missing"), Some(&1));

    h.server.shutdown().await;
}

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::{ConnectSpec, RequestSpec};
use crate::context::Context;
use crate::error::StepResult;
use crate::events::EventSink;

pub type StepFuture = Pin<Box<dyn Future<Output = StepResult<Context>> + Send>>;

/// One executable step of a compiled pipeline. The session context is passed
/// by value through the chain; a step resolves exactly once, with either the
/// context to continue with or the error that aborts the session.
pub type StepFn = Arc<dyn Fn(Context) -> StepFuture + Send + Sync>;

pub fn boxed_step<F, Fut>(f: F) -> StepFn
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult<Context>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)) as StepFuture)
}

/// Scenario-level options threaded into every protocol step.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Hook names run before every request in the scenario.
    pub before_request: Vec<String>,
    /// Hook names run after every response in the scenario.
    pub after_response: Vec<String>,
}

/// Contract a protocol engine exposes to the compiler/runner: build one
/// executable step for a protocol-specific spec. The engine owns all
/// transport detail and reports progress through the [`EventSink`].
pub trait ProtocolEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn request_step(
        &self,
        spec: Arc<RequestSpec>,
        events: EventSink,
        opts: &StepOptions,
    ) -> StepFn;

    /// Connection setup for connection-oriented protocols. Engines without a
    /// distinct connect phase inherit this no-op.
    fn connect_step(
        &self,
        _spec: Arc<ConnectSpec>,
        _events: EventSink,
        _opts: &StepOptions,
    ) -> StepFn {
        boxed_step(|ctx| async move { Ok(ctx) })
    }
}

/// Explicit engine registry passed into the runner at construction; there is
/// no process-wide engine state.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn ProtocolEngine>>,
}

impl EngineRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn ProtocolEngine>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProtocolEngine>> {
        self.engines.get(name).cloned()
    }
}

/// A compiled scenario: the ordered concatenation of its step functions.
/// Cheap to clone; shared by every session that picks the scenario.
#[derive(Clone)]
pub struct Pipeline {
    steps: Arc<Vec<StepFn>>,
}

impl Pipeline {
    #[must_use]
    pub fn new(steps: Vec<StepFn>) -> Self {
        Self {
            steps: Arc::new(steps),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the steps in declared order; the first error aborts the rest of
    /// the scenario and surfaces to the caller.
    pub async fn run(&self, mut ctx: Context) -> StepResult<Context> {
        for step in self.steps.iter() {
            ctx = step(ctx).await?;
        }
        Ok(ctx)
    }
}

use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;
use volley_value::Value;

use crate::config::{LOOP_COUNT_VAR, LoopCount, LoopSpec, OverSpec, Scenario, Script, Step};
use crate::context::Context;
use crate::engine::{Pipeline, ProtocolEngine, StepFn, StepOptions, boxed_step};
use crate::error::StepError;
use crate::events::EventSink;
use crate::expr::{self, Env};
use crate::template;

/// Compiles a scenario's step tree into an executable, resumable pipeline.
///
/// Scenario-level hooks become leading/trailing `Function` steps; request
/// guards (`probability`, `ifTrue`) are evaluated here, before the protocol
/// engine is ever invoked.
pub fn compile(
    scenario: &Scenario,
    engine: &Arc<dyn ProtocolEngine>,
    events: &EventSink,
    script: &Script,
) -> Pipeline {
    let opts = StepOptions {
        before_request: scenario.before_request.clone(),
        after_response: scenario.after_response.clone(),
    };

    let mut steps: Vec<StepFn> = Vec::new();
    for name in &scenario.before_scenario {
        steps.push(compile_step(
            &Step::Function(name.clone()),
            engine,
            events,
            script,
            &opts,
        ));
    }
    for step in &scenario.flow {
        steps.push(compile_step(step, engine, events, script, &opts));
    }
    for name in &scenario.after_scenario {
        steps.push(compile_step(
            &Step::Function(name.clone()),
            engine,
            events,
            script,
            &opts,
        ));
    }

    Pipeline::new(steps)
}

fn compile_step(
    step: &Step,
    engine: &Arc<dyn ProtocolEngine>,
    events: &EventSink,
    script: &Script,
    opts: &StepOptions,
) -> StepFn {
    match step {
        Step::Request(spec) => {
            let inner = engine.request_step(spec.clone(), events.clone(), opts);
            let spec = spec.clone();
            Arc::new(move |ctx: Context| {
                let inner = inner.clone();
                let spec = spec.clone();
                Box::pin(async move {
                    if !probable_enough(spec.probability) {
                        tracing::debug!(url = %spec.url, "probability roll failed, skipping");
                        return Ok(ctx);
                    }
                    if let Some(cond) = &spec.if_true
                        && !guard_true(cond, &ctx)
                    {
                        tracing::debug!(url = %spec.url, cond = %cond, "ifTrue guard false, skipping");
                        return Ok(ctx);
                    }
                    inner(ctx).await
                }) as crate::engine::StepFuture
            })
        }

        Step::Connect(spec) => engine.connect_step(spec.clone(), events.clone(), opts),

        Step::Think(spec) => {
            let seconds = spec.seconds.clone();
            let jitter = script.defaults.think_jitter;
            boxed_step(move |ctx: Context| {
                let seconds = seconds.clone();
                async move {
                    let resolved = template::resolve(&seconds, &ctx);
                    let secs = resolved
                        .as_f64()
                        .or_else(|| resolved.as_str().and_then(|s| s.trim().parse().ok()))
                        .unwrap_or(0.0);
                    let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };

                    let factor = if jitter > 0.0 {
                        let low = (1.0 - jitter).max(0.0);
                        rand::rng().random_range(low..=1.0 + jitter)
                    } else {
                        1.0
                    };

                    tokio::time::sleep(Duration::from_secs_f64(secs * factor)).await;
                    Ok(ctx)
                }
            })
        }

        Step::Log(message) => {
            let message = message.clone();
            boxed_step(move |ctx: Context| {
                let message = message.clone();
                async move {
                    let rendered = template::resolve_str(&message, &ctx);
                    tracing::info!(target: "volley::script", "{}", rendered.to_display_string());
                    Ok(ctx)
                }
            })
        }

        Step::Function(name) => {
            let hook = script.processor.get(name).cloned();
            let name = name.clone();
            let events = events.clone();
            boxed_step(move |mut ctx: Context| {
                let hook = hook.clone();
                let name = name.clone();
                let events = events.clone();
                async move {
                    let Some(hook) = hook else {
                        tracing::debug!(hook = %name, "hook not registered, skipping");
                        return Ok(ctx);
                    };
                    match hook(&mut ctx) {
                        Ok(()) => Ok(ctx),
                        Err(err) => {
                            let step_err = StepError::Hook {
                                name,
                                message: err.to_string(),
                            };
                            events.error(&step_err.code());
                            Err(step_err)
                        }
                    }
                }
            })
        }

        Step::Loop(spec) => compile_loop(spec, engine, events, script, opts),
    }
}

fn compile_loop(
    spec: &LoopSpec,
    engine: &Arc<dyn ProtocolEngine>,
    events: &EventSink,
    script: &Script,
    opts: &StepOptions,
) -> StepFn {
    // Nested steps compile once and are shared by every iteration.
    let steps: Arc<Vec<StepFn>> = Arc::new(
        spec.steps
            .iter()
            .map(|s| compile_step(s, engine, events, script, opts))
            .collect(),
    );
    let count = spec.count.clone();
    let loop_var: Arc<str> = Arc::from(spec.loop_var.as_deref().unwrap_or(LOOP_COUNT_VAR));

    boxed_step(move |mut ctx: Context| {
        let steps = steps.clone();
        let count = count.clone();
        let loop_var = loop_var.clone();
        async move {
            let items = loop_items(&count, &ctx);
            for item in items {
                ctx.vars.insert(loop_var.clone(), item);
                for step in steps.iter() {
                    // The first error aborts remaining iterations.
                    ctx = step(ctx).await?;
                }
            }
            Ok(ctx)
        }
    })
}

/// Resolves the count spec to the concrete iteration values: `[0, n)` /
/// `[from, to)` indices, or the elements of a list.
fn loop_items(count: &LoopCount, ctx: &Context) -> Vec<Value> {
    match count {
        LoopCount::Fixed(n) => (0..*n).map(Value::I64).collect(),
        LoopCount::Range(from, to) => (*from..*to).map(Value::I64).collect(),
        LoopCount::Over(OverSpec::List(items)) => items.clone(),
        LoopCount::Over(OverSpec::Var(name)) => {
            match ctx.vars.get(name.as_str()) {
                Some(Value::Array(items)) => items.clone(),
                _ => {
                    tracing::debug!(var = %name, "loop `over` variable is not a list");
                    Vec::new()
                }
            }
        }
    }
}

/// `probability` is a percentage: the step runs when a uniform roll in
/// `[0, 100)` lands below it.
fn probable_enough(probability: Option<f64>) -> bool {
    match probability {
        None => true,
        Some(p) if p <= 0.0 => false,
        Some(p) if p >= 100.0 => true,
        Some(p) => rand::rng().random_range(0.0..100.0) < p,
    }
}

/// A malformed guard expression counts as true; a valid one skips the step
/// unless it evaluates truthy.
fn guard_true(cond: &str, ctx: &Context) -> bool {
    match expr::eval(cond, &Env {
        vars: &ctx.vars,
        funcs: Some(ctx.funcs.as_ref()),
    }) {
        Some(v) => v.truthy(),
        None => true,
    }
}

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use volley_metrics::{Report, SessionStats, StatsSnapshot};

use crate::compile::compile as compile_scenario;
use crate::config::Script;
use crate::context::SessionFactory;
use crate::engine::{EngineRegistry, Pipeline};
use crate::error::{Error, Result};
use crate::events::{EventFn, EventSink, PendingCounters, RunEvent};
use crate::phases::{PhaseEvent, Phaser};
use crate::picker::WeightedPicker;

/// Cadence for checking whether all in-flight sessions have drained after
/// the last phase elapsed.
const DONE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Executes a whole run: drives the phase scheduler, admits one session per
/// arrival, tracks outstanding work, flushes periodic statistics and returns
/// the final cumulative report.
///
/// Admission is controlled purely by the phase-declared rate; there is no
/// backpressure on pending requests. Under a slow target the pending-session
/// count can grow without bound.
pub async fn run(
    script: Script,
    engines: EngineRegistry,
    on_event: Option<EventFn>,
) -> Result<Report> {
    script.validate()?;

    let stats = Arc::new(SessionStats::default());
    let pending = Arc::new(PendingCounters::default());
    let sink = EventSink::new(stats.clone(), pending.clone());

    // Compile every scenario before any traffic starts; an unknown engine is
    // a config error, not a mid-run surprise.
    let mut pipelines: Vec<Pipeline> = Vec::with_capacity(script.scenarios.len());
    for scenario in &script.scenarios {
        let engine_name = scenario.engine.as_deref().unwrap_or("http");
        let engine = engines
            .get(engine_name)
            .ok_or_else(|| Error::UnknownEngine(engine_name.to_string()))?;
        pipelines.push(compile_scenario(scenario, &engine, &sink, &script));
    }

    let picker = WeightedPicker::new(&script.scenarios)?;
    let factory = Arc::new(SessionFactory::new(&script));
    let scenario_names: Vec<Arc<str>> = script
        .scenarios
        .iter()
        .map(|s| Arc::<str>::from(s.name.as_str()))
        .collect();

    let aggregate: Mutex<Vec<StatsSnapshot>> = Mutex::new(Vec::new());

    let emit = |event: RunEvent| {
        if let Some(f) = &on_event {
            f(event);
        }
    };

    let flush = || {
        stats.set_gauges(pending.scenarios(), pending.requests());
        let snap = stats.snapshot_and_reset();
        emit(RunEvent::Stats(snap.report()));
        aggregate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(snap);
    };

    let admit = |index: usize| {
        tracing::debug!(scenario = %scenario_names[index], "arrival");
        stats.new_scenario();
        sink.started();

        let pipeline = pipelines[index].clone();
        let ctx = factory.new_context();
        let stats = stats.clone();
        let pending = pending.clone();

        tokio::spawn(async move {
            let started_at = Instant::now();
            match pipeline.run(ctx).await {
                Ok(ctx) => {
                    stats.add_scenario_latency(started_at.elapsed());
                    stats.completed_scenario();
                    // Dropping the context releases all session-owned
                    // transport resources.
                    drop(ctx);
                }
                Err(err) => {
                    tracing::debug!(error = %err, "session aborted");
                }
            }
            pending.dec_scenarios();
        });
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(Phaser::new(script.phases.clone()).run(tx));

    let stats_period = script.stats_interval();
    let mut stats_ticker = interval_at(Instant::now() + stats_period, stats_period);
    stats_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            ev = rx.recv() => match ev {
                Some(PhaseEvent::Arrival) => admit(picker.pick()),
                Some(PhaseEvent::PhaseStarted { index, phase }) => {
                    emit(RunEvent::PhaseStarted { index, phase });
                }
                Some(PhaseEvent::PhaseCompleted { index, phase }) => {
                    emit(RunEvent::PhaseCompleted { index, phase });
                }
                Some(PhaseEvent::Done) | None => break,
            },
            _ = stats_ticker.tick() => flush(),
        }
    }

    // All phases have elapsed. Sessions launched during them may still be in
    // flight; wait for the pending-scenario count to reach zero.
    let mut done_poll = tokio::time::interval(DONE_POLL_INTERVAL);
    done_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = done_poll.tick() => {
                if pending.scenarios() == 0 {
                    break;
                }
                tracing::debug!(
                    pending_scenarios = pending.scenarios(),
                    pending_requests = pending.requests(),
                    "waiting for in-flight sessions"
                );
            }
            _ = stats_ticker.tick() => flush(),
        }
    }

    // Outstanding requests at this point are reported but not waited upon.
    if pending.requests() != 0 {
        tracing::debug!(
            pending_requests = pending.requests(),
            "run complete with outstanding requests"
        );
    }

    flush();

    let combined = {
        let agg = aggregate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        StatsSnapshot::combine(&agg)
    };
    let report = combined.report();
    emit(RunEvent::Done(report.clone()));

    Ok(report)
}

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::Phase;

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    PhaseStarted { index: usize, phase: Phase },
    /// Start a new virtual user now.
    Arrival,
    PhaseCompleted { index: usize, phase: Phase },
    /// All phases have elapsed. Sent exactly once, regardless of pending
    /// sessions (those are the runner's concern).
    Done,
}

/// Converts the declarative phase list into a stream of arrival events over
/// wall-clock time. Phases run strictly in sequence; a phase begins only
/// when the previous one's duration has fully elapsed.
#[derive(Debug, Clone)]
pub struct Phaser {
    phases: Vec<Phase>,
}

impl Phaser {
    #[must_use]
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { phases }
    }

    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.phases
            .iter()
            .map(|p| match p {
                Phase::Constant { duration, .. }
                | Phase::Ramp { duration, .. }
                | Phase::Pause { duration, .. } => *duration,
            })
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }

    pub async fn run(self, tx: mpsc::UnboundedSender<PhaseEvent>) {
        for (index, phase) in self.phases.into_iter().enumerate() {
            tracing::debug!(index, phase = ?phase, "phase started");
            let _ = tx.send(PhaseEvent::PhaseStarted {
                index,
                phase: phase.clone(),
            });

            match &phase {
                Phase::Pause { duration, .. } => {
                    tokio::time::sleep(*duration).await;
                }
                Phase::Constant {
                    duration,
                    arrival_rate,
                    ..
                } => {
                    let rate = *arrival_rate;
                    pace(&tx, *duration, move |_| rate).await;
                }
                Phase::Ramp {
                    duration, from, to, ..
                } => {
                    let (from, to, total) = (*from, *to, duration.as_secs_f64());
                    pace(&tx, *duration, move |elapsed: Duration| {
                        if total <= 0.0 {
                            return to;
                        }
                        // Linear interpolation across the phase.
                        from + (to - from) * (elapsed.as_secs_f64() / total)
                    })
                    .await;
                }
            }

            tracing::debug!(index, "phase completed");
            let _ = tx.send(PhaseEvent::PhaseCompleted { index, phase });
        }

        let _ = tx.send(PhaseEvent::Done);
    }
}

/// Emits arrivals at `rate_at(elapsed)` per second for `duration`, using a
/// fine tick and a fractional carry so ramps approximate the integral of the
/// rate curve. Negative rates are treated as zero.
async fn pace(
    tx: &mpsc::UnboundedSender<PhaseEvent>,
    duration: Duration,
    rate_at: impl Fn(Duration) -> f64,
) {
    let tick = Duration::from_millis(10);
    let started = Instant::now();
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut carry = 0.0f64;

    loop {
        interval.tick().await;

        let elapsed = started.elapsed();
        if elapsed >= duration {
            break;
        }

        let rate = rate_at(elapsed).max(0.0);
        carry += rate * tick.as_secs_f64();
        let due = carry.floor() as u64;
        carry -= due as f64;

        for _ in 0..due {
            let _ = tx.send(PhaseEvent::Arrival);
        }
    }
}

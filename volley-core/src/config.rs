use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use volley_value::Value;

use crate::context::FunctionHook;
use crate::error::{Error, Result};

/// Reserved loop-counter variable exposed by `Loop` steps that don't name
/// their own.
pub const LOOP_COUNT_VAR: &str = "$loopCount";

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A fully materialized load script: the configuration surface handed to the
/// runner. Parsing/validation of the on-disk format happens upstream.
#[derive(Clone, Default)]
pub struct Script {
    pub target: String,
    pub phases: Vec<Phase>,
    pub scenarios: Vec<Scenario>,
    pub defaults: Defaults,
    pub variables: Vec<(String, VariableSpec)>,
    pub payload: Vec<Payload>,
    pub stats_interval: Option<Duration>,
    /// Named user hooks for `Function` steps and scenario-level hooks.
    pub processor: HashMap<String, FunctionHook>,
}

impl Script {
    /// Script/config errors fail the run before any traffic starts.
    pub fn validate(&self) -> Result<()> {
        if self.phases.is_empty() {
            return Err(Error::NoPhases);
        }
        if self.scenarios.is_empty() {
            return Err(Error::NoScenarios);
        }

        for phase in &self.phases {
            if !phase.is_finite() {
                return Err(Error::InvalidPhase);
            }
        }

        let mut total = 0.0f64;
        for scenario in &self.scenarios {
            let w = scenario.weight;
            if !w.is_finite() || w < 0.0 {
                return Err(Error::InvalidWeights);
            }
            total += w;
        }
        if total <= 0.0 {
            return Err(Error::InvalidWeights);
        }

        for payload in &self.payload {
            for row in &payload.rows {
                if row.len() != payload.fields.len() {
                    return Err(Error::InvalidPayload {
                        expected: payload.fields.len(),
                        got: row.len(),
                    });
                }
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn stats_interval(&self) -> Duration {
        match self.stats_interval {
            Some(d) if !d.is_zero() => d,
            _ => DEFAULT_STATS_INTERVAL,
        }
    }
}

/// One time-bounded segment of the run with its own arrival-rate policy.
///
/// A zero (or negative, before clamping upstream) rate or duration makes the
/// phase an immediate no-op: it still reports start/complete, emits nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Constant {
        duration: Duration,
        arrival_rate: f64,
        name: Option<String>,
    },
    Ramp {
        duration: Duration,
        from: f64,
        to: f64,
        name: Option<String>,
    },
    Pause {
        duration: Duration,
        name: Option<String>,
    },
}

impl Phase {
    fn is_finite(&self) -> bool {
        match self {
            Self::Constant { arrival_rate, .. } => arrival_rate.is_finite(),
            Self::Ramp { from, to, .. } => from.is_finite() && to.is_finite(),
            Self::Pause { .. } => true,
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Constant { name, .. } | Self::Ramp { name, .. } | Self::Pause { name, .. } => {
                name.as_deref()
            }
        }
    }
}

/// A named, weighted flow of steps a virtual user executes end to end.
/// Steps are immutable templates shared by every session that picks this
/// scenario.
#[derive(Clone, Default)]
pub struct Scenario {
    pub name: String,
    /// Pick probability proportional to weight; defaults to 1.
    pub weight: f64,
    /// Protocol engine name; `http` when unset.
    pub engine: Option<String>,
    pub flow: Vec<Step>,
    pub before_scenario: Vec<String>,
    pub after_scenario: Vec<String>,
    /// Scenario-level hook names applied around every request in the flow.
    pub before_request: Vec<String>,
    pub after_response: Vec<String>,
}

impl Scenario {
    #[must_use]
    pub fn with_flow(name: &str, flow: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            weight: 1.0,
            ..Self::default()
        }
        .flow(flow)
    }

    fn flow(mut self, flow: Vec<Step>) -> Self {
        self.flow = flow;
        self
    }
}

#[derive(Clone)]
pub enum Step {
    Request(Arc<RequestSpec>),
    Connect(Arc<ConnectSpec>),
    Loop(LoopSpec),
    Think(ThinkSpec),
    Log(String),
    Function(String),
}

#[derive(Clone)]
pub struct LoopSpec {
    pub count: LoopCount,
    pub steps: Vec<Step>,
    /// Variable name the loop index (or element) is exposed under;
    /// [`LOOP_COUNT_VAR`] when unset.
    pub loop_var: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopCount {
    /// Iterate indices `[0, n)`.
    Fixed(i64),
    /// Iterate indices `[from, to)`.
    Range(i64, i64),
    /// Iterate the elements of a list.
    Over(OverSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverSpec {
    List(Vec<Value>),
    /// Session variable holding the list, resolved at run time.
    Var(String),
}

impl LoopCount {
    /// Parses the script-level count spec: an integer, or a string that is
    /// either an integer or a `from-to` range. Anything else iterates zero
    /// times.
    #[must_use]
    pub fn parse_spec(spec: &Value) -> Self {
        match spec {
            Value::I64(n) => Self::Fixed(*n),
            Value::F64(n) => Self::Fixed(*n as i64),
            Value::String(s) => {
                if let Ok(n) = s.parse::<i64>() {
                    return Self::Fixed(n);
                }
                if let Some((from, to)) = s.split_once('-')
                    && let (Ok(from), Ok(to)) = (from.trim().parse(), to.trim().parse())
                {
                    return Self::Range(from, to);
                }
                Self::Fixed(0)
            }
            _ => Self::Fixed(0),
        }
    }
}

/// A deliberate pause simulating user idle time. The duration is templated
/// (seconds); jitter comes from [`Defaults::think_jitter`].
#[derive(Clone)]
pub struct ThinkSpec {
    pub seconds: Value,
}

#[derive(Clone, Default)]
pub struct RequestSpec {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub cookie: Vec<(String, String)>,
    /// Raw body; templated as a string.
    pub body: Option<Value>,
    /// JSON body; templated structurally so captured objects survive intact.
    pub json: Option<Value>,
    /// urlencoded form fields; values are templated.
    pub form: Vec<(String, Value)>,
    pub auth: Option<BasicAuth>,
    pub capture: Vec<CaptureSpec>,
    pub matches: Vec<MatchSpec>,
    pub before_request: Vec<String>,
    pub after_response: Vec<String>,
    /// Percentage 0–100; the step is skipped when the roll fails.
    pub probability: Option<f64>,
    /// Guard expression over session vars; malformed expressions count as
    /// true.
    pub if_true: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub user: String,
    pub pass: String,
}

/// Protocol-specific connection step (WebSocket/socket.io engines); the HTTP
/// engine treats it as a no-op since its connections are pooled per request.
#[derive(Clone, Default)]
pub struct ConnectSpec {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

/// Content selector shared by capture and match specs.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Json(String),
    XPath(String),
    Regexp {
        expr: String,
        group: Option<usize>,
        flags: Option<String>,
    },
    Header(String),
    Css {
        selector: String,
        attr: Option<String>,
        index: Option<CssIndex>,
    },
    /// No explicit kind: infer JSON vs XML from the response content type.
    Auto(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CssIndex {
    Number(usize),
    Random,
    Last,
}

#[derive(Debug, Clone)]
pub struct CaptureSpec {
    pub selector: Selector,
    /// Variable name the extracted value is stored under.
    pub as_var: String,
    /// Optional post-processing expression, evaluated with the captures so
    /// far as scope; errors fall back to the untransformed value.
    pub transform: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MatchSpec {
    pub selector: Selector,
    /// Expected value (templated against session vars).
    pub value: Value,
    /// A failed strict match is fatal to the step. Default true.
    pub strict: bool,
}

impl Default for MatchSpec {
    fn default() -> Self {
        Self {
            selector: Selector::Auto(String::new()),
            value: Value::Null,
            strict: true,
        }
    }
}

#[derive(Clone)]
pub struct Defaults {
    /// Default headers merged under request headers (lowercased names).
    pub headers: Vec<(String, String)>,
    /// Think-time jitter as a fraction: the pause is scaled uniformly in
    /// `[1 - j, 1 + j]`.
    pub think_jitter: f64,
    pub timeout: Duration,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            think_jitter: 0.0,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub enum VariableSpec {
    Fixed(Value),
    /// One entry is sampled per session.
    OneOf(Vec<Value>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayloadOrder {
    #[default]
    Sequence,
    Random,
}

/// Inline payload rows mapped onto session variables by field name.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub fields: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub order: PayloadOrder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_count_parses_numbers_and_ranges() {
        assert_eq!(LoopCount::parse_spec(&Value::I64(5)), LoopCount::Fixed(5));
        assert_eq!(
            LoopCount::parse_spec(&Value::from("7")),
            LoopCount::Fixed(7)
        );
        assert_eq!(
            LoopCount::parse_spec(&Value::from("3-6")),
            LoopCount::Range(3, 6)
        );
        assert_eq!(
            LoopCount::parse_spec(&Value::from("nope")),
            LoopCount::Fixed(0)
        );
        assert_eq!(LoopCount::parse_spec(&Value::Null), LoopCount::Fixed(0));
    }

    #[test]
    fn validate_rejects_empty_and_weightless_scripts() {
        let mut script = Script {
            phases: vec![Phase::Pause {
                duration: Duration::from_secs(1),
                name: None,
            }],
            ..Script::default()
        };
        assert!(matches!(script.validate(), Err(Error::NoScenarios)));

        script.scenarios = vec![Scenario {
            weight: 0.0,
            ..Scenario::with_flow("a", Vec::new())
        }];
        assert!(matches!(script.validate(), Err(Error::InvalidWeights)));

        script.scenarios[0].weight = 1.0;
        assert!(script.validate().is_ok());

        script.phases.clear();
        assert!(matches!(script.validate(), Err(Error::NoPhases)));
    }

    #[test]
    fn validate_rejects_ragged_payload_rows() {
        let script = Script {
            phases: vec![Phase::Pause {
                duration: Duration::from_secs(1),
                name: None,
            }],
            scenarios: vec![Scenario::with_flow("a", Vec::new())],
            payload: vec![Payload {
                fields: vec!["user".to_string(), "pass".to_string()],
                rows: vec![vec![Value::from("alice")]],
                order: PayloadOrder::Sequence,
            }],
            ..Script::default()
        };
        assert!(matches!(
            script.validate(),
            Err(Error::InvalidPayload { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn stats_interval_defaults_when_unset_or_zero() {
        let mut script = Script::default();
        assert_eq!(script.stats_interval(), DEFAULT_STATS_INTERVAL);
        script.stats_interval = Some(Duration::ZERO);
        assert_eq!(script.stats_interval(), DEFAULT_STATS_INTERVAL);
        script.stats_interval = Some(Duration::from_secs(2));
        assert_eq!(script.stats_interval(), Duration::from_secs(2));
    }
}

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use serde::Deserialize;

use volley_core::{
    BasicAuth, CaptureSpec, ConnectSpec, CssIndex, Defaults, LoopCount, LoopSpec, MatchSpec,
    OverSpec, Payload, PayloadOrder, Phase, RequestSpec, Scenario, Script, Selector, Step,
    ThinkSpec, Value, VariableSpec,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptYaml {
    config: ConfigYaml,
    scenarios: Vec<ScenarioYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigYaml {
    target: Option<String>,

    #[serde(default)]
    phases: Vec<PhaseYaml>,

    stats_interval: Option<YamlDuration>,

    #[serde(default)]
    defaults: DefaultsYaml,

    #[serde(default)]
    variables: BTreeMap<String, serde_yaml::Value>,

    payload: Option<OneOrMany<PayloadYaml>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhaseYaml {
    duration: Option<YamlDuration>,
    arrival_rate: Option<f64>,
    ramp_to: Option<f64>,
    pause: Option<YamlDuration>,
    name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefaultsYaml {
    #[serde(default)]
    headers: BTreeMap<String, String>,
    think: Option<ThinkDefaultsYaml>,
    timeout: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThinkDefaultsYaml {
    #[serde(default)]
    jitter: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadYaml {
    fields: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<serde_yaml::Value>>,
    order: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioYaml {
    name: Option<String>,
    weight: Option<f64>,
    engine: Option<String>,
    flow: Vec<StepYaml>,

    before_scenario: Option<OneOrMany<String>>,
    after_scenario: Option<OneOrMany<String>>,
    before_request: Option<OneOrMany<String>>,
    after_response: Option<OneOrMany<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepYaml {
    get: Option<RequestYaml>,
    post: Option<RequestYaml>,
    put: Option<RequestYaml>,
    delete: Option<RequestYaml>,
    head: Option<RequestYaml>,
    patch: Option<RequestYaml>,

    think: Option<serde_yaml::Value>,
    log: Option<String>,
    function: Option<String>,
    connect: Option<ConnectYaml>,

    #[serde(rename = "loop")]
    loop_steps: Option<Vec<StepYaml>>,
    count: Option<serde_yaml::Value>,
    over: Option<serde_yaml::Value>,
    loop_value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectYaml {
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    query: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestYaml {
    url: Option<String>,
    uri: Option<String>,

    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    cookie: BTreeMap<String, String>,

    json: Option<serde_yaml::Value>,
    body: Option<serde_yaml::Value>,
    #[serde(default)]
    form: BTreeMap<String, serde_yaml::Value>,
    auth: Option<AuthYaml>,

    capture: Option<OneOrMany<ExtractYaml>>,
    #[serde(rename = "match")]
    matches: Option<OneOrMany<ExtractYaml>>,

    before_request: Option<OneOrMany<String>>,
    after_response: Option<OneOrMany<String>>,

    probability: Option<f64>,
    if_true: Option<String>,
    timeout: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthYaml {
    user: String,
    pass: String,
}

/// One capture/match entry. A spec with `as` is a capture; one with `value`
/// is a match.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractYaml {
    json: Option<String>,
    xpath: Option<String>,
    regexp: Option<String>,
    header: Option<String>,
    selector: Option<String>,

    group: Option<usize>,
    flags: Option<String>,
    attr: Option<String>,
    index: Option<serde_yaml::Value>,

    #[serde(rename = "as")]
    as_var: Option<String>,
    transform: Option<String>,

    value: Option<serde_yaml::Value>,
    strict: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

fn one_or_many<T>(v: Option<OneOrMany<T>>) -> Vec<T> {
    v.map(OneOrMany::into_vec).unwrap_or_default()
}

/// Duration as a humantime string (`10s`), integer seconds, or float
/// seconds.
#[derive(Debug, Clone, Copy, Default)]
struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0 {
                    return Err(E::custom("duration must be non-negative"));
                }
                Ok(YamlDuration(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_str(&v)
            }
        }

        deserializer.deserialize_any(V)
    }
}

pub async fn load_script(path: &Path) -> anyhow::Result<Script> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read script: {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    script_from_yaml_str(&text).with_context(|| format!("invalid script: {}", path.display()))
}

pub fn script_from_yaml_str(text: &str) -> anyhow::Result<Script> {
    let doc: ScriptYaml = serde_yaml::from_str(text).context("failed to parse YAML")?;
    script_from_yaml(doc)
}

fn script_from_yaml(doc: ScriptYaml) -> anyhow::Result<Script> {
    let ScriptYaml { config, scenarios } = doc;

    let phases = config
        .phases
        .into_iter()
        .map(phase_from_yaml)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let scenarios = scenarios
        .into_iter()
        .enumerate()
        .map(|(idx, s)| scenario_from_yaml(s, idx))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let variables = config
        .variables
        .into_iter()
        .map(|(name, v)| {
            let spec = match v {
                serde_yaml::Value::Sequence(items) => {
                    VariableSpec::OneOf(items.into_iter().map(yaml_value).collect())
                }
                other => VariableSpec::Fixed(yaml_value(other)),
            };
            (name, spec)
        })
        .collect();

    let payload = one_or_many(config.payload)
        .into_iter()
        .map(payload_from_yaml)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let defaults = Defaults {
        headers: config
            .defaults
            .headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect(),
        think_jitter: config.defaults.think.map(|t| t.jitter).unwrap_or(0.0),
        timeout: config
            .defaults
            .timeout
            .map(YamlDuration::into_inner)
            .unwrap_or(Defaults::default().timeout),
    };

    Ok(Script {
        target: config.target.unwrap_or_default(),
        phases,
        scenarios,
        defaults,
        variables,
        payload,
        stats_interval: config.stats_interval.map(YamlDuration::into_inner),
        processor: Default::default(),
    })
}

fn phase_from_yaml(phase: PhaseYaml) -> anyhow::Result<Phase> {
    if let Some(pause) = phase.pause {
        return Ok(Phase::Pause {
            duration: pause.into_inner(),
            name: phase.name,
        });
    }

    let Some(duration) = phase.duration else {
        bail!("phase must define either `pause` or `duration`");
    };
    let Some(arrival_rate) = phase.arrival_rate else {
        bail!("phase with `duration` must define `arrivalRate`");
    };

    Ok(match phase.ramp_to {
        Some(ramp_to) => Phase::Ramp {
            duration: duration.into_inner(),
            from: arrival_rate,
            to: ramp_to,
            name: phase.name,
        },
        None => Phase::Constant {
            duration: duration.into_inner(),
            arrival_rate,
            name: phase.name,
        },
    })
}

fn payload_from_yaml(payload: PayloadYaml) -> anyhow::Result<Payload> {
    let order = match payload.order.as_deref() {
        None | Some("sequence") => PayloadOrder::Sequence,
        Some("random") => PayloadOrder::Random,
        Some(other) => bail!("unknown payload order `{other}` (expected sequence|random)"),
    };

    Ok(Payload {
        fields: payload.fields,
        rows: payload
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(yaml_value).collect())
            .collect(),
        order,
    })
}

fn scenario_from_yaml(scenario: ScenarioYaml, idx: usize) -> anyhow::Result<Scenario> {
    let name = scenario
        .name
        .unwrap_or_else(|| format!("scenario_{}", idx + 1));

    let flow = scenario
        .flow
        .into_iter()
        .map(step_from_yaml)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Scenario {
        name,
        weight: scenario.weight.unwrap_or(1.0),
        engine: scenario.engine,
        flow,
        before_scenario: one_or_many(scenario.before_scenario),
        after_scenario: one_or_many(scenario.after_scenario),
        before_request: one_or_many(scenario.before_request),
        after_response: one_or_many(scenario.after_response),
    })
}

fn step_from_yaml(step: StepYaml) -> anyhow::Result<Step> {
    if let Some(steps) = step.loop_steps {
        let steps = steps
            .into_iter()
            .map(step_from_yaml)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let count = match (step.over, step.count) {
            (Some(serde_yaml::Value::Sequence(items)), _) => LoopCount::Over(OverSpec::List(
                items.into_iter().map(yaml_value).collect(),
            )),
            (Some(serde_yaml::Value::String(var)), _) => LoopCount::Over(OverSpec::Var(var)),
            (Some(other), _) => bail!("`over` must be a list or a variable name, got {other:?}"),
            (None, Some(count)) => LoopCount::parse_spec(&yaml_value(count)),
            (None, None) => bail!("`loop` requires `count` or `over`"),
        };

        return Ok(Step::Loop(LoopSpec {
            count,
            steps,
            loop_var: step.loop_value,
        }));
    }

    if let Some(think) = step.think {
        return Ok(Step::Think(ThinkSpec {
            seconds: yaml_value(think),
        }));
    }
    if let Some(log) = step.log {
        return Ok(Step::Log(log));
    }
    if let Some(function) = step.function {
        return Ok(Step::Function(function));
    }
    if let Some(connect) = step.connect {
        return Ok(Step::Connect(Arc::new(ConnectSpec {
            headers: connect.headers.into_iter().collect(),
            query: connect.query.into_iter().collect(),
        })));
    }

    let methods = [
        ("GET", step.get),
        ("POST", step.post),
        ("PUT", step.put),
        ("DELETE", step.delete),
        ("HEAD", step.head),
        ("PATCH", step.patch),
    ];
    for (method, request) in methods {
        if let Some(request) = request {
            return request_from_yaml(method, request).map(|r| Step::Request(Arc::new(r)));
        }
    }

    bail!("step defines no recognized action")
}

fn request_from_yaml(method: &str, request: RequestYaml) -> anyhow::Result<RequestSpec> {
    let url = request.url.or(request.uri).unwrap_or_default();

    let mut capture = Vec::new();
    for spec in one_or_many(request.capture) {
        capture.push(capture_from_yaml(spec)?);
    }

    let mut matches = Vec::new();
    for spec in one_or_many(request.matches) {
        matches.push(match_from_yaml(spec)?);
    }

    Ok(RequestSpec {
        method: method.to_string(),
        url,
        headers: request.headers.into_iter().collect(),
        cookie: request.cookie.into_iter().collect(),
        body: request.body.map(yaml_value),
        json: request.json.map(yaml_value),
        form: request
            .form
            .into_iter()
            .map(|(k, v)| (k, yaml_value(v)))
            .collect(),
        auth: request.auth.map(|a| BasicAuth {
            user: a.user,
            pass: a.pass,
        }),
        capture,
        matches,
        before_request: one_or_many(request.before_request),
        after_response: one_or_many(request.after_response),
        probability: request.probability,
        if_true: request.if_true,
        timeout: request.timeout.map(YamlDuration::into_inner),
    })
}

fn selector_from_yaml(spec: &ExtractYaml) -> Selector {
    if let Some(json) = &spec.json {
        Selector::Json(json.clone())
    } else if let Some(xpath) = &spec.xpath {
        Selector::XPath(xpath.clone())
    } else if let Some(regexp) = &spec.regexp {
        Selector::Regexp {
            expr: regexp.clone(),
            group: spec.group,
            flags: spec.flags.clone(),
        }
    } else if let Some(header) = &spec.header {
        Selector::Header(header.clone())
    } else if let Some(selector) = &spec.selector {
        Selector::Css {
            selector: selector.clone(),
            attr: spec.attr.clone(),
            index: spec.index.as_ref().map(|v| match v {
                serde_yaml::Value::String(s) if s == "random" => CssIndex::Random,
                serde_yaml::Value::String(s) if s == "last" => CssIndex::Last,
                serde_yaml::Value::Number(n) => {
                    CssIndex::Number(n.as_u64().unwrap_or(0) as usize)
                }
                _ => CssIndex::Number(0),
            }),
        }
    } else {
        Selector::Auto(String::new())
    }
}

fn capture_from_yaml(spec: ExtractYaml) -> anyhow::Result<CaptureSpec> {
    let selector = selector_from_yaml(&spec);
    let Some(as_var) = spec.as_var else {
        bail!("capture spec requires `as`");
    };
    Ok(CaptureSpec {
        selector,
        as_var,
        transform: spec.transform,
    })
}

fn match_from_yaml(spec: ExtractYaml) -> anyhow::Result<MatchSpec> {
    let selector = selector_from_yaml(&spec);
    let Some(value) = spec.value else {
        bail!("match spec requires `value`");
    };
    Ok(MatchSpec {
        selector,
        value: yaml_value(value),
        strict: spec.strict.unwrap_or(true),
    })
}

fn yaml_value(v: serde_yaml::Value) -> Value {
    match v {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::I64(i)
            } else {
                Value::F64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_yaml::Value::String(s) => Value::from(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_value).collect())
        }
        serde_yaml::Value::Mapping(map) => Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| {
                    k.as_str()
                        .map(|k| (Arc::<str>::from(k), yaml_value(v)))
                })
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_value(tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Script {
        match script_from_yaml_str(text) {
            Ok(s) => s,
            Err(err) => panic!("{err:#}"),
        }
    }

    #[test]
    fn parses_phases_defaults_and_variables() {
        let script = parse(
            r#"
config:
  target: "http://localhost:3003"
  statsInterval: 5
  phases:
    - duration: 60
      arrivalRate: 5
      name: warm-up
    - duration: 2m
      arrivalRate: 5
      rampTo: 50
    - pause: 10
  defaults:
    headers:
      X-Api-Key: "123"
    think:
      jitter: 0.2
    timeout: 30
  variables:
    greeting: hello
    flavor:
      - vanilla
      - chocolate
scenarios:
  - name: main
    flow:
      - get:
          url: "/"
"#,
        );

        assert_eq!(script.target, "http://localhost:3003");
        assert_eq!(script.stats_interval, Some(Duration::from_secs(5)));
        assert_eq!(script.phases.len(), 3);
        assert_eq!(
            script.phases[0],
            Phase::Constant {
                duration: Duration::from_secs(60),
                arrival_rate: 5.0,
                name: Some("warm-up".to_string()),
            }
        );
        assert_eq!(
            script.phases[1],
            Phase::Ramp {
                duration: Duration::from_secs(120),
                from: 5.0,
                to: 50.0,
                name: None,
            }
        );
        assert_eq!(
            script.phases[2],
            Phase::Pause {
                duration: Duration::from_secs(10),
                name: None,
            }
        );

        assert_eq!(
            script.defaults.headers,
            vec![("x-api-key".to_string(), "123".to_string())]
        );
        assert!((script.defaults.think_jitter - 0.2).abs() < 1e-9);
        assert_eq!(script.defaults.timeout, Duration::from_secs(30));

        assert_eq!(script.variables.len(), 2);
        assert!(script.validate().is_ok());
    }

    #[test]
    fn parses_request_steps_with_capture_and_match() {
        let script = parse(
            r#"
config:
  target: "http://localhost:3003"
  phases:
    - duration: 1
      arrivalRate: 1
scenarios:
  - name: main
    weight: 3
    flow:
      - post:
          url: "/login"
          json:
            user: "{{ user }}"
          capture:
            json: "$.token"
            as: token
          probability: 50
          ifTrue: "attempt < 3"
      - get:
          url: "/profile"
          headers:
            Authorization: "Bearer {{ token }}"
          match:
            - json: "$.status"
              value: ok
            - header: "x-cache"
              value: hit
              strict: false
"#,
        );

        let scenario = &script.scenarios[0];
        assert!((scenario.weight - 3.0).abs() < 1e-9);
        assert_eq!(scenario.flow.len(), 2);

        let Step::Request(login) = &scenario.flow[0] else {
            panic!("expected a request step");
        };
        assert_eq!(login.method, "POST");
        assert_eq!(login.url, "/login");
        assert_eq!(login.probability, Some(50.0));
        assert_eq!(login.if_true.as_deref(), Some("attempt < 3"));
        assert_eq!(login.capture.len(), 1);
        assert_eq!(login.capture[0].as_var, "token");
        assert_eq!(
            login.capture[0].selector,
            Selector::Json("$.token".to_string())
        );

        let Step::Request(profile) = &scenario.flow[1] else {
            panic!("expected a request step");
        };
        assert_eq!(profile.matches.len(), 2);
        assert!(profile.matches[0].strict);
        assert!(!profile.matches[1].strict);
    }

    #[test]
    fn parses_loop_think_log_and_function_steps() {
        let script = parse(
            r#"
config:
  phases:
    - duration: 1
      arrivalRate: 1
scenarios:
  - name: main
    beforeScenario: setup
    flow:
      - loop:
          - get:
              url: "/item/{{ $loopCount }}"
        count: "3-6"
      - loop:
          - get:
              url: "/color/{{ hue }}"
        over:
          - red
          - blue
        loopValue: hue
      - think: 2.5
      - log: "done {{ name }}"
      - function: finish
"#,
        );

        let scenario = &script.scenarios[0];
        assert_eq!(scenario.before_scenario, vec!["setup".to_string()]);

        let Step::Loop(range_loop) = &scenario.flow[0] else {
            panic!("expected a loop step");
        };
        assert_eq!(range_loop.count, LoopCount::Range(3, 6));
        assert!(range_loop.loop_var.is_none());

        let Step::Loop(over_loop) = &scenario.flow[1] else {
            panic!("expected a loop step");
        };
        assert_eq!(
            over_loop.count,
            LoopCount::Over(OverSpec::List(vec![
                Value::from("red"),
                Value::from("blue"),
            ]))
        );
        assert_eq!(over_loop.loop_var.as_deref(), Some("hue"));

        assert!(matches!(&scenario.flow[2], Step::Think(t) if t.seconds == Value::F64(2.5)));
        assert!(matches!(&scenario.flow[3], Step::Log(_)));
        assert!(matches!(&scenario.flow[4], Step::Function(f) if f == "finish"));
    }

    #[test]
    fn parses_inline_payload_rows() {
        let script = parse(
            r#"
config:
  phases:
    - duration: 1
      arrivalRate: 1
  payload:
    fields: [user, pass]
    order: random
    rows:
      - [alice, s3cret]
      - [bob, hunter2]
scenarios:
  - name: main
    flow: []
"#,
        );

        assert_eq!(script.payload.len(), 1);
        assert_eq!(script.payload[0].fields, vec!["user", "pass"]);
        assert_eq!(script.payload[0].rows.len(), 2);
        assert_eq!(script.payload[0].order, PayloadOrder::Random);
        assert!(script.validate().is_ok());
    }

    #[test]
    fn rejects_malformed_phases_and_loops() {
        assert!(
            script_from_yaml_str(
                r#"
config:
  phases:
    - duration: 10
scenarios:
  - flow: []
"#,
            )
            .is_err()
        );

        assert!(
            script_from_yaml_str(
                r#"
config:
  phases:
    - duration: 1
      arrivalRate: 1
scenarios:
  - flow:
      - loop:
          - get:
              url: "/"
"#,
            )
            .is_err()
        );
    }
}

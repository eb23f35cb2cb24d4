use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng as _;
use rand::distr::Alphanumeric;
use volley_value::{ObjectMap, Value};

use crate::config::{Payload, PayloadOrder, Script, VariableSpec};
use crate::error::HookError;

/// Built-in generator function usable from templates
/// (`{{ $randomNumber(1, 10) }}`).
pub type GeneratorFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;
pub type FuncMap = HashMap<String, GeneratorFn>;

/// User hook invoked by `Function` steps and scenario-level hooks.
pub type FunctionHook = Arc<dyn Fn(&mut Context) -> Result<(), HookError> + Send + Sync>;

/// Per-virtual-user mutable state. Created at arrival time, owned by exactly
/// one session, dropped (releasing any transport resources) when its
/// pipeline finishes.
pub struct Context {
    pub vars: ObjectMap,
    pub funcs: Arc<FuncMap>,
    pub uid: String,
    pub success_count: u64,
    /// Transport-specific resources (connections, cookie jars). Owned by the
    /// protocol engine; dropped with the session.
    pub transport: Option<Box<dyn Any + Send>>,
}

impl Context {
    #[must_use]
    pub fn with_vars(vars: ObjectMap) -> Self {
        Self {
            vars,
            funcs: Arc::new(builtin_funcs()),
            uid: uuid::Uuid::new_v4().to_string(),
            success_count: 0,
            transport: None,
        }
    }

    pub fn set_var(&mut self, name: &str, value: Value) {
        self.vars.insert(Arc::<str>::from(name), value);
    }
}

#[must_use]
pub fn builtin_funcs() -> FuncMap {
    let mut funcs: FuncMap = HashMap::new();

    funcs.insert(
        "$randomNumber".to_string(),
        Arc::new(|args: &[Value]| {
            let min = args.first().and_then(Value::as_f64).unwrap_or(0.0) as i64;
            let max = args.get(1).and_then(Value::as_f64).unwrap_or(0.0) as i64;
            if min > max {
                return Value::I64(min);
            }
            Value::I64(rand::rng().random_range(min..=max))
        }),
    );

    funcs.insert(
        "$randomString".to_string(),
        Arc::new(|args: &[Value]| {
            let len = args.first().and_then(Value::as_f64).unwrap_or(10.0).max(0.0) as usize;
            let s: String = rand::rng()
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect();
            Value::from(s)
        }),
    );

    funcs
}

/// Hands out payload rows in the configured order. Shared by all sessions of
/// a run.
#[derive(Debug)]
pub struct PayloadReader {
    fields: Vec<String>,
    rows: Vec<Vec<Value>>,
    order: PayloadOrder,
    cursor: AtomicUsize,
}

impl PayloadReader {
    #[must_use]
    pub fn new(payload: &Payload) -> Self {
        Self {
            fields: payload.fields.clone(),
            rows: payload.rows.clone(),
            order: payload.order,
            cursor: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    #[must_use]
    pub fn next_row(&self) -> Option<&[Value]> {
        if self.rows.is_empty() {
            return None;
        }

        let idx = match self.order {
            PayloadOrder::Sequence => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % self.rows.len()
            }
            PayloadOrder::Random => rand::rng().random_range(0..self.rows.len()),
        };
        self.rows.get(idx).map(Vec::as_slice)
    }
}

/// Builds a fresh session context per arrival: target + payload row +
/// static/sampled variables + built-in generator functions + unique id.
pub struct SessionFactory {
    target: String,
    variables: Vec<(String, VariableSpec)>,
    readers: Vec<PayloadReader>,
    funcs: Arc<FuncMap>,
}

impl SessionFactory {
    #[must_use]
    pub fn new(script: &Script) -> Self {
        Self {
            target: script.target.clone(),
            variables: script.variables.clone(),
            readers: script.payload.iter().map(PayloadReader::new).collect(),
            funcs: Arc::new(builtin_funcs()),
        }
    }

    #[must_use]
    pub fn new_context(&self) -> Context {
        let mut vars = ObjectMap::default();
        vars.insert(Arc::<str>::from("target"), Value::string(&self.target));

        for reader in &self.readers {
            if let Some(row) = reader.next_row() {
                for (field, value) in reader.fields().iter().zip(row.iter()) {
                    vars.insert(Arc::<str>::from(field.as_str()), value.clone());
                }
            }
        }

        for (name, spec) in &self.variables {
            let value = match spec {
                VariableSpec::Fixed(v) => v.clone(),
                VariableSpec::OneOf(choices) => {
                    if choices.is_empty() {
                        Value::Null
                    } else {
                        choices[rand::rng().random_range(0..choices.len())].clone()
                    }
                }
            };
            vars.insert(Arc::<str>::from(name.as_str()), value);
        }

        Context {
            vars,
            funcs: self.funcs.clone(),
            uid: uuid::Uuid::new_v4().to_string(),
            success_count: 0,
            transport: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_reader_wraps_around() {
        let reader = PayloadReader::new(&Payload {
            fields: vec!["user".to_string()],
            rows: vec![
                vec![Value::from("a")],
                vec![Value::from("b")],
            ],
            order: PayloadOrder::Sequence,
        });

        let got: Vec<_> = (0..4)
            .map(|_| match reader.next_row() {
                Some(row) => row[0].clone(),
                None => panic!("expected a row"),
            })
            .collect();
        assert_eq!(
            got,
            vec![
                Value::from("a"),
                Value::from("b"),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn empty_payload_yields_no_rows() {
        let reader = PayloadReader::new(&Payload::default());
        assert!(reader.next_row().is_none());
    }

    #[test]
    fn factory_seeds_target_payload_and_variables() {
        let script = Script {
            target: "http://localhost:3003".to_string(),
            variables: vec![
                ("fixed".to_string(), VariableSpec::Fixed(Value::I64(7))),
                (
                    "sampled".to_string(),
                    VariableSpec::OneOf(vec![Value::from("x"), Value::from("y")]),
                ),
            ],
            payload: vec![Payload {
                fields: vec!["user".to_string(), "pass".to_string()],
                rows: vec![vec![Value::from("alice"), Value::from("s3cret")]],
                order: PayloadOrder::Sequence,
            }],
            ..Script::default()
        };

        let factory = SessionFactory::new(&script);
        let ctx = factory.new_context();

        assert_eq!(
            ctx.vars.get("target"),
            Some(&Value::from("http://localhost:3003"))
        );
        assert_eq!(ctx.vars.get("user"), Some(&Value::from("alice")));
        assert_eq!(ctx.vars.get("pass"), Some(&Value::from("s3cret")));
        assert_eq!(ctx.vars.get("fixed"), Some(&Value::I64(7)));
        let sampled = match ctx.vars.get("sampled") {
            Some(v) => v,
            None => panic!("expected sampled var"),
        };
        assert!(sampled == &Value::from("x") || sampled == &Value::from("y"));
        assert!(!ctx.uid.is_empty());

        // Fresh contexts get fresh ids.
        let other = factory.new_context();
        assert_ne!(ctx.uid, other.uid);
    }

    #[test]
    fn random_string_generates_requested_length() {
        let funcs = builtin_funcs();
        let f = match funcs.get("$randomString") {
            Some(f) => f,
            None => panic!("missing $randomString"),
        };
        let v = f(&[Value::I64(12)]);
        match v {
            Value::String(s) => assert_eq!(s.len(), 12),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn random_number_respects_bounds() {
        let funcs = builtin_funcs();
        let f = match funcs.get("$randomNumber") {
            Some(f) => f,
            None => panic!("missing $randomNumber"),
        };
        for _ in 0..100 {
            let v = f(&[Value::I64(3), Value::I64(5)]);
            let n = match v.as_i64() {
                Some(n) => n,
                None => panic!("expected integer"),
            };
            assert!((3..=5).contains(&n), "n={n}");
        }
    }
}

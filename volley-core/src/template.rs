//! `{{ }}` template resolution against per-session state.
//!
//! Types are preserved: a string that is exactly one delimited expression
//! evaluates to the raw value (an object stays an object, a number stays a
//! number, null stays null). Expressions embedded in surrounding text
//! interpolate their display form, with null/missing rendering as the empty
//! string. Nothing is ever HTML-escaped.

use std::sync::LazyLock;

use regex::Regex;
use volley_value::Value;

use crate::context::Context;
use crate::expr::{self, Env};

static EXPR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(.*?)\}\}").unwrap_or_else(|err| panic!("template regex: {err}"))
});

/// Resolves a value recursively: strings are templated, arrays/objects
/// resolve each contained value, everything else passes through unchanged.
#[must_use]
pub fn resolve(value: &Value, ctx: &Context) -> Value {
    match value {
        Value::String(s) => resolve_str(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[must_use]
pub fn resolve_str(s: &str, ctx: &Context) -> Value {
    if !s.contains("{{") {
        return Value::string(s);
    }

    let env = Env {
        vars: &ctx.vars,
        funcs: Some(ctx.funcs.as_ref()),
    };

    // A single delimited expression spanning the whole string yields the raw
    // evaluated value, unconverted.
    if let Some(m) = EXPR_RE.find(s)
        && m.start() == 0
        && m.end() == s.len()
    {
        let inner = &s[2..s.len() - 2];
        return expr::eval(inner.trim(), &env).unwrap_or(Value::Null);
    }

    // Otherwise interpolate each expression into the surrounding text.
    let out = EXPR_RE.replace_all(s, |caps: &regex::Captures<'_>| {
        expr::eval(caps[1].trim(), &env)
            .map(|v| v.to_display_string())
            .unwrap_or_default()
    });
    Value::string(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use volley_value::ObjectMap;

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        Context::with_vars(
            pairs
                .iter()
                .map(|(k, v)| (Arc::<str>::from(*k), v.clone()))
                .collect(),
        )
    }

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (Arc::<str>::from(*k), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn plain_strings_pass_through() {
        let c = ctx(&[]);
        assert_eq!(resolve_str("string", &c), Value::from("string"));
        assert_eq!(resolve_str("string {}", &c), Value::from("string {}"));
    }

    #[test]
    fn string_variables_substitute() {
        let c = ctx(&[("name", Value::from("Hassy"))]);
        assert_eq!(resolve_str("hello {{name}}", &c), Value::from("hello Hassy"));
        assert_eq!(
            resolve_str("hello {{name}}", &ctx(&[])),
            Value::from("hello ")
        );
    }

    #[test]
    fn multiple_variables_substitute() {
        let c = ctx(&[
            ("nameFirst", Value::from("Neil")),
            ("nameLast", Value::from("Armstrong")),
        ]);
        assert_eq!(
            resolve_str("hello {{nameFirst}} {{nameLast}}", &c),
            Value::from("hello Neil Armstrong")
        );
    }

    #[test]
    fn substituted_values_are_not_escaped() {
        let c = ctx(&[("lawFirm", Value::from("Michelson, Jones & Peterson LLC."))]);
        assert_eq!(
            resolve_str("{{lawFirm}}", &c),
            Value::from("Michelson, Jones & Peterson LLC.")
        );
    }

    #[test]
    fn numbers_keep_their_type() {
        let c = ctx(&[("int", Value::I64(5))]);
        assert_eq!(resolve_str("{{int}}", &c), Value::I64(5));
        assert_eq!(resolve_str("{{ int }}", &c), Value::I64(5));
    }

    #[test]
    fn whole_objects_substitute_unconverted() {
        let nested = obj(&[("nested", Value::from("data"))]);
        let c = ctx(&[("obj", nested.clone())]);
        assert_eq!(resolve_str("{{obj}}", &c), nested);
    }

    #[test]
    fn bare_missing_reference_preserves_absence() {
        let c = ctx(&[]);
        assert_eq!(resolve_str("{{name}}", &c), Value::Null);
        assert_eq!(
            resolve_str("{{name}}", &ctx(&[("name", Value::Null)])),
            Value::Null
        );
    }

    #[test]
    fn null_interpolates_as_empty_string_in_text() {
        assert_eq!(
            resolve_str("hello {{name}}", &ctx(&[("name", Value::Null)])),
            Value::from("hello ")
        );
    }

    #[test]
    fn dotted_paths_resolve() {
        let c = ctx(&[(
            "nested",
            obj(&[
                ("str", Value::from("someText")),
                ("int", Value::I64(5)),
                ("emptyString", Value::from("")),
                ("explicitNull", Value::Null),
                ("deeply", obj(&[("some", Value::from("data"))])),
            ]),
        )]);

        assert_eq!(resolve_str("{{nested.str}}", &c), Value::from("someText"));
        assert_eq!(resolve_str("{{nested.int}}", &c), Value::I64(5));
        assert_eq!(resolve_str("{{nested.emptyString}}", &c), Value::from(""));
        assert_eq!(resolve_str("{{nested.explicitNull}}", &c), Value::Null);
        assert_eq!(
            resolve_str("{{nested.deeply}}", &c),
            obj(&[("some", Value::from("data"))])
        );
        assert_eq!(resolve_str("{{nested.implicitUndefined}}", &c), Value::Null);
    }

    #[test]
    fn expressions_evaluate_inside_delimiters() {
        let c = ctx(&[("n", Value::I64(4))]);
        assert_eq!(resolve_str("{{ n + 1 }}", &c), Value::I64(5));
        assert_eq!(resolve_str("total: {{ n * 10 }}", &c), Value::from("total: 40"));
        // Malformed expressions fail soft.
        assert_eq!(resolve_str("{{ n + }}", &c), Value::Null);
        assert_eq!(resolve_str("x {{ n + }} y", &c), Value::from("x  y"));
    }

    #[test]
    fn function_calls_substitute_into_text() {
        let mut c = ctx(&[]);
        let mut funcs = crate::context::FuncMap::default();
        funcs.insert(
            "$greeting".to_string(),
            Arc::new(|_: &[Value]| Value::from("hi")),
        );
        c.funcs = Arc::new(funcs);

        assert_eq!(resolve_str("{{ $greeting() }}", &c), Value::from("hi"));
        assert_eq!(
            resolve_str("say {{ $greeting() }}!", &c),
            Value::from("say hi!")
        );
        // Unknown functions render as empty in text and null when bare.
        assert_eq!(resolve_str("{{ $nope(1) }}", &c), Value::Null);
        assert_eq!(resolve_str("x{{ $nope(1) }}y", &c), Value::from("xy"));
    }

    #[test]
    fn composite_values_resolve_recursively() {
        let c = ctx(&[("id", Value::I64(7))]);
        let mut map = ObjectMap::default();
        map.insert(Arc::<str>::from("user"), Value::from("{{id}}"));
        map.insert(
            Arc::<str>::from("items"),
            Value::Array(vec![Value::from("n-{{id}}"), Value::I64(1)]),
        );

        let resolved = resolve(&Value::Object(map), &c);
        assert_eq!(resolved.get_path("user"), Some(&Value::I64(7)));
        assert_eq!(resolved.get_path("items.0"), Some(&Value::from("n-7")));
        assert_eq!(resolved.get_path("items.1"), Some(&Value::I64(1)));
    }
}

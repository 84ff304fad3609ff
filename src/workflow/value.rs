//! Tagged-union parameter value
//!
//! Step parameters are stored as this closed `Value` type rather than raw
//! `serde_json::Value`, so a malformed parameter is caught by a schema check
//! at step construction time instead of surfacing as a downcast failure deep
//! inside a step handler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::Map(m) => m.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Substitute every `{step_id.key}` placeholder found in string values
    /// (recursively through lists and maps) by looking it up in `context`.
    /// An unresolvable placeholder is left untouched.
    pub fn substitute(&self, context: &BTreeMap<String, Value>) -> Value {
        match self {
            Value::String(s) => Value::String(substitute_str(s, context)),
            Value::List(items) => {
                Value::List(items.iter().map(|v| v.substitute(context)).collect())
            }
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.substitute(context)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn substitute_str(input: &str, context: &BTreeMap<String, Value>) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('{') {
        let Some(end_rel) = rest[start..].find('}') else {
            output.push_str(rest);
            return output;
        };
        let end = start + end_rel;
        output.push_str(&rest[..start]);
        let placeholder = &rest[start + 1..end];
        match resolve_placeholder(placeholder, context) {
            Some(value) => output.push_str(&value),
            None => {
                output.push('{');
                output.push_str(placeholder);
                output.push('}');
            }
        }
        rest = &rest[end + 1..];
    }
    output.push_str(rest);
    output
}

fn resolve_placeholder(placeholder: &str, context: &BTreeMap<String, Value>) -> Option<String> {
    let (step_id, key) = placeholder.split_once('.')?;
    let value = context.get(step_id)?.get(key)?;
    Some(match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_json::to_string(&json_of(other)).unwrap_or_default(),
    })
}

fn json_of(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BTreeMap<String, Value> {
        let mut step1 = BTreeMap::new();
        step1.insert("path".to_string(), Value::String("/tmp/out.txt".to_string()));
        let mut context = BTreeMap::new();
        context.insert("step1".to_string(), Value::Map(step1));
        context
    }

    #[test]
    fn substitutes_known_placeholder() {
        let value = Value::String("result: {step1.path}".to_string());
        assert_eq!(
            value.substitute(&ctx()),
            Value::String("result: /tmp/out.txt".to_string())
        );
    }

    #[test]
    fn leaves_unresolvable_placeholder_untouched() {
        let value = Value::String("missing: {stepX.nope}".to_string());
        assert_eq!(
            value.substitute(&ctx()),
            Value::String("missing: {stepX.nope}".to_string())
        );
    }

    #[test]
    fn substitutes_recursively_through_lists() {
        let value = Value::List(vec![Value::String("{step1.path}".to_string())]);
        assert_eq!(
            value.substitute(&ctx()),
            Value::List(vec![Value::String("/tmp/out.txt".to_string())])
        );
    }

    #[test]
    fn is_empty_checks() {
        assert!(Value::Null.is_empty());
        assert!(Value::String(String::new()).is_empty());
        assert!(!Value::Number(0.0).is_empty());
    }
}

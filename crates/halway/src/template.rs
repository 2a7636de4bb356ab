//! # URI Templates
//!
//! Expansion of RFC 6570 templates (levels 1-3 plus explode and prefix modifiers)
//! and the [`TemplateVariables`] bag a relation's variables are bound from.

use crate::error::HalError;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use serde_json::{Map, Value};

/// Values bound to the variables of a templated link.
///
/// Variables can be bound one by one with [`TemplateVariables::with`] or taken
/// from the fields of a single composite argument with [`TemplateVariables::from_fields`].
/// A `null` value leaves the variable undefined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateVariables {
    values: Map<String, Value>,
}

impl TemplateVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Binds every field of `composite` (a struct or map) by field name.
    pub fn from_fields<T: Serialize>(composite: &T) -> Result<Self, HalError> {
        match serde_json::to_value(composite)? {
            Value::Object(values) => Ok(Self { values }),
            other => Err(HalError::developer(format!(
                "template variables must be bound from a struct or map, got {other}"
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// Names with a defined (non-null) value.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.names().next().is_none()
    }
}

struct Operator {
    first: &'static str,
    separator: char,
    named: bool,
    if_empty: &'static str,
    allow_reserved: bool,
}

impl Operator {
    fn parse(expression: &str) -> (Self, &str) {
        let op = |first, separator, named, if_empty, allow_reserved| Operator {
            first,
            separator,
            named,
            if_empty,
            allow_reserved,
        };
        let mut chars = expression.chars();
        match chars.next() {
            Some('+') => (op("", ',', false, "", true), &expression[1..]),
            Some('#') => (op("#", ',', false, "", true), &expression[1..]),
            Some('.') => (op(".", '.', false, "", false), &expression[1..]),
            Some('/') => (op("/", '/', false, "", false), &expression[1..]),
            Some(';') => (op(";", ';', true, "", false), &expression[1..]),
            Some('?') => (op("?", '&', true, "=", false), &expression[1..]),
            Some('&') => (op("&", '&', true, "=", false), &expression[1..]),
            _ => (op("", ',', false, "", false), expression),
        }
    }
}

struct VarSpec<'a> {
    name: &'a str,
    explode: bool,
    prefix: Option<usize>,
}

impl<'a> VarSpec<'a> {
    fn parse(spec: &'a str) -> Self {
        let spec = spec.trim();
        if let Some(name) = spec.strip_suffix('*') {
            return VarSpec {
                name,
                explode: true,
                prefix: None,
            };
        }
        match spec.split_once(':') {
            Some((name, len)) => VarSpec {
                name,
                explode: false,
                prefix: len.parse().ok(),
            },
            None => VarSpec {
                name: spec,
                explode: false,
                prefix: None,
            },
        }
    }
}

/// Expands `template`; undefined variables are removed from the result.
pub fn expand(template: &str, variables: &TemplateVariables) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                expand_expression(&after[..end], variables, &mut out);
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn expand_expression(expression: &str, variables: &TemplateVariables, out: &mut String) {
    let (op, list) = Operator::parse(expression);
    let mut first = true;
    for spec in list.split(',').map(VarSpec::parse) {
        let Some(value) = variables.get(spec.name) else {
            continue;
        };
        let Some(expanded) = expand_value(&op, &spec, value) else {
            continue;
        };
        out.push_str(if first { op.first } else { "" });
        if !first {
            out.push(op.separator);
        }
        out.push_str(&expanded);
        first = false;
    }
}

fn expand_value(op: &Operator, spec: &VarSpec<'_>, value: &Value) -> Option<String> {
    let enc = |s: &str| encode(s, op.allow_reserved);
    let named = |encoded: String| -> String {
        if !op.named {
            encoded
        } else if encoded.is_empty() {
            format!("{}{}", spec.name, op.if_empty)
        } else {
            format!("{}={}", spec.name, encoded)
        }
    };
    match value {
        Value::Array(items) => {
            let items: Vec<String> = items.iter().filter_map(scalar).collect();
            if items.is_empty() {
                return None;
            }
            if spec.explode {
                let parts: Vec<String> = items.iter().map(|i| named(enc(i.as_str()))).collect();
                Some(parts.join(&op.separator.to_string()))
            } else {
                let joined: Vec<String> = items.iter().map(|i| enc(i.as_str())).collect();
                Some(named(joined.join(",")))
            }
        }
        Value::Object(map) => {
            let pairs: Vec<(String, String)> = map
                .iter()
                .filter_map(|(k, v)| scalar(v).map(|v| (enc(k.as_str()), enc(v.as_str()))))
                .collect();
            if pairs.is_empty() {
                return None;
            }
            if spec.explode {
                let parts: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                Some(parts.join(&op.separator.to_string()))
            } else {
                let flat: Vec<String> = pairs.into_iter().flat_map(|(k, v)| [k, v]).collect();
                Some(named(flat.join(",")))
            }
        }
        other => {
            let mut text = scalar(other)?;
            if let Some(len) = spec.prefix {
                text = text.chars().take(len).collect();
            }
            Some(named(enc(text.as_str())))
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Characters left as-is by simple expansion.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Characters left as-is by reserved (`+`) and fragment (`#`) expansion.
const UNRESERVED_OR_RESERVED: &AsciiSet = &UNRESERVED
    .remove(b':')
    .remove(b'/')
    .remove(b'?')
    .remove(b'#')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=');

/// Percent-encodes `text`. Reserved expansion keeps reserved characters and existing
/// pct-encoded triplets; any other `%` is encoded.
fn encode(text: &str, allow_reserved: bool) -> String {
    if !allow_reserved {
        return utf8_percent_encode(text, UNRESERVED).to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(index) = rest.find('%') {
        out.extend(utf8_percent_encode(&rest[..index], UNRESERVED_OR_RESERVED));
        let candidate = &rest[index..];
        if is_pct_triplet(candidate) {
            out.push_str(&candidate[..3]);
            rest = &candidate[3..];
        } else {
            out.push_str("%25");
            rest = &candidate[1..];
        }
    }
    out.extend(utf8_percent_encode(rest, UNRESERVED_OR_RESERVED));
    out
}

fn is_pct_triplet(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 3 && bytes[0] == b'%' && bytes[1].is_ascii_hexdigit() && bytes[2].is_ascii_hexdigit()
}

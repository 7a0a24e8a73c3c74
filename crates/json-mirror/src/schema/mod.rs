//! Schema descriptors for the typed tree.
//!
//! A [`Schema`] is an immutable, shared description of an object node: an
//! ordered table of [`Property`] entries, each with a closed [`Kind`], an
//! editability flag, and (for object/array kinds) a child schema. Schemas
//! are built once by the application and never mutated at runtime.
//!
//! This module also owns strict conversion of raw incoming patch values
//! into typed [`Input`] scalars, including the empty-string rule for
//! numeric kinds (coerce to the kind's default, flag for re-emission).

use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

// ── Kind ──────────────────────────────────────────────────────────────────

/// The closed set of value kinds a property can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Bool,
    Long,
    Decimal,
    Double,
    String,
    Object,
    Array,
    Trigger,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Bool => "bool",
            Kind::Long => "long",
            Kind::Decimal => "decimal",
            Kind::Double => "double",
            Kind::String => "string",
            Kind::Object => "object",
            Kind::Array => "array",
            Kind::Trigger => "trigger",
        }
    }

    /// Kinds that hold a scalar value directly in the node slot.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Kind::Object | Kind::Array)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Kind::Long | Kind::Decimal | Kind::Double)
    }
}

// ── Property / Schema ─────────────────────────────────────────────────────

/// One property descriptor within a [`Schema`].
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub kind: Kind,
    pub editable: bool,
    /// Child object schema for `Object`, element schema for `Array`.
    pub child: Option<Arc<Schema>>,
}

/// Immutable schema for one object shape. Properties keep declaration
/// order; the positional index of a property is its slot, used by the
/// change log and the tree's value storage.
#[derive(Debug, Default)]
pub struct Schema {
    pub name: String,
    properties: IndexMap<String, Property>,
}

impl Schema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: IndexMap::new(),
        }
    }

    fn push(&mut self, property: Property) -> &mut Self {
        self.properties.insert(property.name.clone(), property);
        self
    }

    pub fn add_bool(&mut self, name: &str, editable: bool) -> &mut Self {
        self.push(Property {
            name: name.to_string(),
            kind: Kind::Bool,
            editable,
            child: None,
        })
    }

    pub fn add_long(&mut self, name: &str, editable: bool) -> &mut Self {
        self.push(Property {
            name: name.to_string(),
            kind: Kind::Long,
            editable,
            child: None,
        })
    }

    pub fn add_decimal(&mut self, name: &str, editable: bool) -> &mut Self {
        self.push(Property {
            name: name.to_string(),
            kind: Kind::Decimal,
            editable,
            child: None,
        })
    }

    pub fn add_double(&mut self, name: &str, editable: bool) -> &mut Self {
        self.push(Property {
            name: name.to_string(),
            kind: Kind::Double,
            editable,
            child: None,
        })
    }

    pub fn add_string(&mut self, name: &str, editable: bool) -> &mut Self {
        self.push(Property {
            name: name.to_string(),
            kind: Kind::String,
            editable,
            child: None,
        })
    }

    pub fn add_trigger(&mut self, name: &str) -> &mut Self {
        self.push(Property {
            name: name.to_string(),
            kind: Kind::Trigger,
            editable: true,
            child: None,
        })
    }

    pub fn add_object(&mut self, name: &str, child: Arc<Schema>) -> &mut Self {
        self.push(Property {
            name: name.to_string(),
            kind: Kind::Object,
            editable: false,
            child: Some(child),
        })
    }

    pub fn add_array(&mut self, name: &str, element: Arc<Schema>) -> &mut Self {
        self.push(Property {
            name: name.to_string(),
            kind: Kind::Array,
            editable: false,
            child: Some(element),
        })
    }

    /// Look a property up by name, returning its slot and descriptor.
    pub fn get(&self, name: &str) -> Option<(usize, &Property)> {
        self.properties
            .get_full(name)
            .map(|(slot, _, prop)| (slot, prop))
    }

    /// Property descriptor at `slot`. Panics on an out-of-range slot,
    /// which can only come from a change record for a different schema.
    pub fn prop(&self, slot: usize) -> &Property {
        self.properties
            .get_index(slot)
            .map(|(_, prop)| prop)
            .expect("property slot out of range")
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Property)> {
        self.properties.values().enumerate()
    }
}

// ── Input conversion ──────────────────────────────────────────────────────

/// A typed scalar produced by converting a raw patch value.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Bool(bool),
    Long(i64),
    Double(f64),
    Decimal(f64),
    Str(String),
    Trigger,
}

/// Outcome of [`convert_input`]. `coerced_default` is set when an empty
/// string arrived for a numeric kind: the value is the kind's default and
/// the property must be re-emitted to the remote on the next generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    pub input: Input,
    pub coerced_default: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("expected {kind} value, got {got}")]
    WrongType { kind: &'static str, got: String },
}

fn wrong(kind: Kind, raw: &Value) -> ConvertError {
    ConvertError::WrongType {
        kind: kind.as_str(),
        got: raw.to_string(),
    }
}

/// Default input for a terminal kind.
pub fn default_input(kind: Kind) -> Input {
    match kind {
        Kind::Bool => Input::Bool(false),
        Kind::Long => Input::Long(0),
        Kind::Double => Input::Double(0.0),
        Kind::Decimal => Input::Decimal(0.0),
        Kind::String => Input::Str(String::new()),
        Kind::Trigger => Input::Trigger,
        Kind::Object | Kind::Array => unreachable!("not a terminal kind"),
    }
}

/// Strictly convert a raw patch value to the property's kind.
///
/// Numbers are accepted either as JSON numbers or as numeric strings
/// (clients routinely send `"3"` for integer inputs). An empty string for
/// a numeric kind is not a failure: it yields the kind's default with
/// `coerced_default` set.
pub fn convert_input(property: &Property, raw: &Value) -> Result<Converted, ConvertError> {
    let ok = |input| {
        Ok(Converted {
            input,
            coerced_default: false,
        })
    };
    match property.kind {
        Kind::Bool => match raw {
            Value::Bool(b) => ok(Input::Bool(*b)),
            Value::String(s) => match s.as_str() {
                "true" => ok(Input::Bool(true)),
                "false" => ok(Input::Bool(false)),
                _ => Err(wrong(Kind::Bool, raw)),
            },
            _ => Err(wrong(Kind::Bool, raw)),
        },
        Kind::Long => match raw {
            Value::Number(n) => n
                .as_i64()
                .map(Input::Long)
                .map_or_else(|| Err(wrong(Kind::Long, raw)), ok),
            Value::String(s) if s.is_empty() => Ok(Converted {
                input: default_input(Kind::Long),
                coerced_default: true,
            }),
            Value::String(s) => s
                .parse::<i64>()
                .map(Input::Long)
                .map_or_else(|_| Err(wrong(Kind::Long, raw)), ok),
            _ => Err(wrong(Kind::Long, raw)),
        },
        Kind::Double | Kind::Decimal => {
            let kind = property.kind;
            let wrap = |f: f64| {
                if kind == Kind::Double {
                    Input::Double(f)
                } else {
                    Input::Decimal(f)
                }
            };
            match raw {
                Value::Number(n) => n
                    .as_f64()
                    .map(wrap)
                    .map_or_else(|| Err(wrong(kind, raw)), ok),
                Value::String(s) if s.is_empty() => Ok(Converted {
                    input: default_input(kind),
                    coerced_default: true,
                }),
                Value::String(s) => s
                    .parse::<f64>()
                    .map(wrap)
                    .map_or_else(|_| Err(wrong(kind, raw)), ok),
                _ => Err(wrong(kind, raw)),
            }
        }
        Kind::String => match raw {
            Value::String(s) => ok(Input::Str(s.clone())),
            _ => Err(wrong(Kind::String, raw)),
        },
        // A trigger fires on any value; the payload carries no data.
        Kind::Trigger => ok(Input::Trigger),
        Kind::Object | Kind::Array => Err(wrong(property.kind, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prop(kind: Kind) -> Property {
        Property {
            name: "p".to_string(),
            kind,
            editable: true,
            child: None,
        }
    }

    #[test]
    fn kind_as_str_all() {
        assert_eq!(Kind::Bool.as_str(), "bool");
        assert_eq!(Kind::Long.as_str(), "long");
        assert_eq!(Kind::Decimal.as_str(), "decimal");
        assert_eq!(Kind::Double.as_str(), "double");
        assert_eq!(Kind::String.as_str(), "string");
        assert_eq!(Kind::Object.as_str(), "object");
        assert_eq!(Kind::Array.as_str(), "array");
        assert_eq!(Kind::Trigger.as_str(), "trigger");
    }

    #[test]
    fn schema_slots_follow_declaration_order() {
        let mut schema = Schema::new("Simple");
        schema.add_string("name", true);
        schema.add_long("count", true);
        let (slot, p) = schema.get("count").unwrap();
        assert_eq!(slot, 1);
        assert_eq!(p.kind, Kind::Long);
        assert_eq!(schema.prop(0).name, "name");
        assert!(schema.get("missing").is_none());
    }

    #[test]
    fn long_accepts_number_and_numeric_string() {
        let p = prop(Kind::Long);
        assert_eq!(
            convert_input(&p, &json!(3)).unwrap().input,
            Input::Long(3)
        );
        assert_eq!(
            convert_input(&p, &json!("3")).unwrap().input,
            Input::Long(3)
        );
        assert!(convert_input(&p, &json!("invalid")).is_err());
        assert!(convert_input(&p, &json!(true)).is_err());
    }

    #[test]
    fn empty_string_coerces_numeric_defaults() {
        for kind in [Kind::Long, Kind::Double, Kind::Decimal] {
            let converted = convert_input(&prop(kind), &json!("")).unwrap();
            assert!(converted.coerced_default, "{}", kind.as_str());
            assert_eq!(converted.input, default_input(kind));
        }
        // Empty string is a perfectly good string value.
        let converted = convert_input(&prop(Kind::String), &json!("")).unwrap();
        assert!(!converted.coerced_default);
    }

    #[test]
    fn double_accepts_number_and_numeric_string() {
        let p = prop(Kind::Double);
        assert_eq!(
            convert_input(&p, &json!(3.3)).unwrap().input,
            Input::Double(3.3)
        );
        assert_eq!(
            convert_input(&p, &json!("3.3")).unwrap().input,
            Input::Double(3.3)
        );
    }

    #[test]
    fn bool_accepts_bool_and_string_forms() {
        let p = prop(Kind::Bool);
        assert_eq!(
            convert_input(&p, &json!(true)).unwrap().input,
            Input::Bool(true)
        );
        assert_eq!(
            convert_input(&p, &json!("false")).unwrap().input,
            Input::Bool(false)
        );
        assert!(convert_input(&p, &json!(1)).is_err());
    }

    #[test]
    fn string_rejects_non_string() {
        assert!(convert_input(&prop(Kind::String), &json!(42)).is_err());
    }

    #[test]
    fn trigger_accepts_anything() {
        let p = prop(Kind::Trigger);
        assert_eq!(convert_input(&p, &json!(null)).unwrap().input, Input::Trigger);
        assert_eq!(convert_input(&p, &json!("go")).unwrap().input, Input::Trigger);
    }
}

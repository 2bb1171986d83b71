//! The closed tagged value variant carried by publications and inputs.
//!
//! Concord transfers values as a closed set of variants rather than an
//! open class hierarchy. Conversion rules between variants are explicit
//! and total: any value can be coerced to any kind, with defined
//! rounding, formatting, and fallback behavior. These coercions are what
//! a subscriber observes when its declared kind differs from the
//! publication's kind.

use std::fmt;

/// Type tag for a [`Value`], declared at interface registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// 64-bit floating point.
    Double,
    /// 64-bit signed integer.
    Integer,
    /// Boolean.
    Boolean,
    /// UTF-8 string.
    Text,
    /// Complex number (re, im).
    Complex,
    /// Vector of doubles.
    Vector,
    /// Named scalar (label + double).
    NamedPoint,
}

impl ValueKind {
    /// Parse a type string as used in interface declarations.
    ///
    /// Recognizes the canonical names plus common aliases; unknown
    /// strings return `None`.
    pub fn parse(s: &str) -> Option<ValueKind> {
        match s {
            "double" | "float" | "real" => Some(ValueKind::Double),
            "integer" | "int" | "int64" => Some(ValueKind::Integer),
            "boolean" | "bool" => Some(ValueKind::Boolean),
            "string" | "text" => Some(ValueKind::Text),
            "complex" => Some(ValueKind::Complex),
            "vector" | "double_vector" => Some(ValueKind::Vector),
            "named_point" | "namedpoint" => Some(ValueKind::NamedPoint),
            _ => None,
        }
    }

    /// The canonical type string for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Double => "double",
            ValueKind::Integer => "integer",
            ValueKind::Boolean => "boolean",
            ValueKind::Text => "string",
            ValueKind::Complex => "complex",
            ValueKind::Vector => "vector",
            ValueKind::NamedPoint => "named_point",
        }
    }

    /// Whether a publication of kind `self` binds to an input of kind
    /// `other` without a conversion warning.
    ///
    /// Identical kinds always match; the numeric kinds (double, integer,
    /// boolean) interconvert losslessly enough to be considered
    /// compatible. Everything else is a mismatch (coerced, but flagged).
    pub fn compatible_with(self, other: ValueKind) -> bool {
        if self == other {
            return true;
        }
        let numeric = |k| {
            matches!(
                k,
                ValueKind::Double | ValueKind::Integer | ValueKind::Boolean
            )
        };
        numeric(self) && numeric(other)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published value.
///
/// Immutable once published; coercions produce new values.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// 64-bit floating point.
    Double(f64),
    /// 64-bit signed integer.
    Integer(i64),
    /// Boolean.
    Boolean(bool),
    /// UTF-8 string.
    Text(String),
    /// Complex number.
    Complex {
        /// Real part.
        re: f64,
        /// Imaginary part.
        im: f64,
    },
    /// Vector of doubles.
    Vector(Vec<f64>),
    /// Named scalar.
    NamedPoint {
        /// Label.
        name: String,
        /// Value.
        value: f64,
    },
}

impl Value {
    /// The kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Double(_) => ValueKind::Double,
            Value::Integer(_) => ValueKind::Integer,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Text(_) => ValueKind::Text,
            Value::Complex { .. } => ValueKind::Complex,
            Value::Vector(_) => ValueKind::Vector,
            Value::NamedPoint { .. } => ValueKind::NamedPoint,
        }
    }

    /// The value viewed as a double.
    ///
    /// Integers and booleans widen; complex takes the magnitude; vectors
    /// take their first element (0.0 when empty); text parses, falling
    /// back to 0.0; named points take their scalar.
    pub fn as_double(&self) -> f64 {
        match self {
            Value::Double(v) => *v,
            Value::Integer(v) => *v as f64,
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Text(s) => s.parse().unwrap_or(0.0),
            Value::Complex { re, im } => (re * re + im * im).sqrt(),
            Value::Vector(v) => v.first().copied().unwrap_or(0.0),
            Value::NamedPoint { value, .. } => *value,
        }
    }

    /// The value viewed as an integer (via [`as_double`](Value::as_double),
    /// rounded to nearest).
    pub fn as_integer(&self) -> i64 {
        match self {
            Value::Integer(v) => *v,
            other => other.as_double().round() as i64,
        }
    }

    /// The value viewed as a boolean.
    ///
    /// Numeric zero is false; the strings `""`, `"0"` and `"false"` are
    /// false; everything else is true.
    pub fn as_boolean(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Text(s) => !(s.is_empty() || s == "0" || s == "false"),
            other => other.as_double() != 0.0,
        }
    }

    /// The value rendered as text.
    pub fn as_text(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Double(v) => v.to_string(),
            Value::Integer(v) => v.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Complex { re, im } => format!("{re}+{im}j"),
            Value::Vector(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                format!("[{}]", parts.join(","))
            }
            Value::NamedPoint { name, value } => format!("{{{name}:{value}}}"),
        }
    }

    /// Coerce to the given kind, applying the conversion rules above.
    pub fn convert_to(&self, kind: ValueKind) -> Value {
        if self.kind() == kind {
            return self.clone();
        }
        match kind {
            ValueKind::Double => Value::Double(self.as_double()),
            ValueKind::Integer => Value::Integer(self.as_integer()),
            ValueKind::Boolean => Value::Boolean(self.as_boolean()),
            ValueKind::Text => Value::Text(self.as_text()),
            ValueKind::Complex => match self {
                Value::Vector(v) => Value::Complex {
                    re: v.first().copied().unwrap_or(0.0),
                    im: v.get(1).copied().unwrap_or(0.0),
                },
                other => Value::Complex {
                    re: other.as_double(),
                    im: 0.0,
                },
            },
            ValueKind::Vector => match self {
                Value::Complex { re, im } => Value::Vector(vec![*re, *im]),
                other => Value::Vector(vec![other.as_double()]),
            },
            ValueKind::NamedPoint => Value::NamedPoint {
                name: String::new(),
                value: self.as_double(),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

//! Parameter kinds and values.
//!
//! Script parameters are described by a closed tagged-variant type
//! rather than by runtime type identity. [`ParameterKind`] is what a
//! script declares; [`ParameterValue`] is what a program stores for it.
//! The two are kept compatible by [`ParameterKind::accepts`] and the
//! compiler's backfill pass.

use rhai::Dynamic;

/// The recognized parameter kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterKind {
    /// Whole number, optionally range-limited.
    Integer,
    /// Floating-point number, optionally range-limited.
    Real,
    /// Free text.
    Text,
    /// Yes/no flag.
    Boolean,
    /// One choice out of a fixed set of strings.
    Options(Vec<String>),
    /// Reference to a named valve on the chip.
    Valve,
    /// Reference to another program by name.
    ProgramRef,
    /// Homogeneous list of another kind.
    ListOf(Box<ParameterKind>),
}

impl ParameterKind {
    /// The canonical empty value used when backfilling a missing or
    /// type-incompatible stored value.
    pub fn none_value(&self) -> ParameterValue {
        match self {
            ParameterKind::Integer => ParameterValue::Integer(0),
            ParameterKind::Real => ParameterValue::Real(0.0),
            ParameterKind::Text => ParameterValue::Text(String::new()),
            ParameterKind::Boolean => ParameterValue::Boolean(false),
            ParameterKind::Options(options) => {
                ParameterValue::Choice(options.first().cloned().unwrap_or_default())
            }
            ParameterKind::Valve => ParameterValue::Valve(None),
            ParameterKind::ProgramRef => ParameterValue::ProgramRef(None),
            ParameterKind::ListOf(_) => ParameterValue::List(Vec::new()),
        }
    }

    /// Whether a stored value is compatible with this kind.
    pub fn accepts(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (ParameterKind::Integer, ParameterValue::Integer(_)) => true,
            (ParameterKind::Real, ParameterValue::Real(_)) => true,
            (ParameterKind::Text, ParameterValue::Text(_)) => true,
            (ParameterKind::Boolean, ParameterValue::Boolean(_)) => true,
            (ParameterKind::Options(options), ParameterValue::Choice(choice)) => {
                options.iter().any(|o| o == choice)
            }
            (ParameterKind::Valve, ParameterValue::Valve(_)) => true,
            (ParameterKind::ProgramRef, ParameterValue::ProgramRef(_)) => true,
            (ParameterKind::ListOf(element), ParameterValue::List(items)) => {
                items.iter().all(|item| element.accepts(item))
            }
            _ => false,
        }
    }

    /// Short label for diagnostics.
    pub fn label(&self) -> String {
        match self {
            ParameterKind::Integer => "int".to_string(),
            ParameterKind::Real => "real".to_string(),
            ParameterKind::Text => "text".to_string(),
            ParameterKind::Boolean => "bool".to_string(),
            ParameterKind::Options(_) => "options".to_string(),
            ParameterKind::Valve => "valve".to_string(),
            ParameterKind::ProgramRef => "program".to_string(),
            ParameterKind::ListOf(element) => format!("list of {}", element.label()),
        }
    }

    /// Parse a string tag into a kind, for the `param_list` element form.
    pub fn from_tag(tag: &str) -> Option<ParameterKind> {
        match tag {
            "int" | "integer" => Some(ParameterKind::Integer),
            "real" | "float" => Some(ParameterKind::Real),
            "text" | "string" => Some(ParameterKind::Text),
            "bool" | "boolean" => Some(ParameterKind::Boolean),
            "valve" => Some(ParameterKind::Valve),
            "program" => Some(ParameterKind::ProgramRef),
            _ => None,
        }
    }
}

/// A stored parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    /// Selected option string.
    Choice(String),
    /// Valve reference by valve name; `None` when unassigned.
    Valve(Option<String>),
    /// Program reference by program name; `None` when unassigned.
    ProgramRef(Option<String>),
    List(Vec<ParameterValue>),
}

impl ParameterValue {
    /// Convert a rhai value into a parameter value of the given kind.
    ///
    /// Returns `None` if the dynamic value cannot represent the kind.
    /// Integer widening to `Real` is the only implicit conversion.
    pub fn from_dynamic(kind: &ParameterKind, value: &Dynamic) -> Option<ParameterValue> {
        match kind {
            ParameterKind::Integer => value.as_int().ok().map(ParameterValue::Integer),
            ParameterKind::Real => match value.as_float() {
                Ok(f) => Some(ParameterValue::Real(f)),
                Err(_) => value.as_int().ok().map(|i| ParameterValue::Real(i as f64)),
            },
            ParameterKind::Text => value.clone().into_string().ok().map(ParameterValue::Text),
            ParameterKind::Boolean => value.as_bool().ok().map(ParameterValue::Boolean),
            ParameterKind::Options(options) => {
                let choice = value.clone().into_string().ok()?;
                options
                    .iter()
                    .any(|o| *o == choice)
                    .then_some(ParameterValue::Choice(choice))
            }
            ParameterKind::Valve => value
                .clone()
                .into_string()
                .ok()
                .map(|name| ParameterValue::Valve(Some(name))),
            ParameterKind::ProgramRef => value
                .clone()
                .into_string()
                .ok()
                .map(|name| ParameterValue::ProgramRef(Some(name))),
            ParameterKind::ListOf(element) => {
                let array = value.clone().try_cast::<rhai::Array>()?;
                let mut items = Vec::with_capacity(array.len());
                for entry in &array {
                    items.push(ParameterValue::from_dynamic(element, entry)?);
                }
                Some(ParameterValue::List(items))
            }
        }
    }
}

/// One declared script parameter, in declaration order.
#[derive(Clone, Debug)]
pub struct ParameterDeclaration {
    /// Binding name at the script's top level.
    pub symbol: String,
    /// Name shown by the UI; defaults to the symbol.
    pub display_name: String,
    pub kind: ParameterKind,
    /// Default value used when a program has nothing stored.
    pub default: ParameterValue,
    /// Lower bound for numeric kinds.
    pub minimum: Option<f64>,
    /// Upper bound for numeric kinds.
    pub maximum: Option<f64>,
    /// False when the declaration was malformed; the parameter is still
    /// listed for UI stability but carries a compile-time error.
    pub valid: bool,
}

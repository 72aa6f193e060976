use std::fmt;

use serde::Serialize;

pub const OBJECT_SIGNATURE: &str = "Ljava/lang/Object;";
pub const STRING_SIGNATURE: &str = "Ljava/lang/String;";

/// A statically known JVM constant.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

impl Constant {
    /// Signature of the natural stack type for this constant.
    pub fn signature(&self) -> &'static str {
        match self {
            Constant::Int(_) => "I",
            Constant::Long(_) => "J",
            Constant::Float(_) => "F",
            Constant::Double(_) => "D",
            Constant::String(_) => STRING_SIGNATURE,
        }
    }

    fn fits(&self, signature: &str) -> bool {
        match self {
            Constant::Int(_) => matches!(signature, "I" | "B" | "C" | "S" | "Z"),
            Constant::String(_) => signature == STRING_SIGNATURE,
            other => signature == other.signature(),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(value) => write!(f, "{value}"),
            Constant::Long(value) => write!(f, "{value}L"),
            Constant::Float(value) => write!(f, "{value}f"),
            Constant::Double(value) => write!(f, "{value}d"),
            Constant::String(value) => write!(f, "{value:?}"),
        }
    }
}

/// Value category of a signature as the operand stack sees it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl Kind {
    /// Category of a field or return signature, `None` for `V` and malformed input.
    pub fn of(signature: &str) -> Option<Kind> {
        match signature.as_bytes().first()? {
            b'I' | b'B' | b'C' | b'S' | b'Z' => Some(Kind::Int),
            b'J' => Some(Kind::Long),
            b'F' => Some(Kind::Float),
            b'D' => Some(Kind::Double),
            b'L' | b'[' => Some(Kind::Reference),
            _ => None,
        }
    }

    /// Long and double take two JVM slots but are one stack value here.
    pub fn is_wide(self) -> bool {
        matches!(self, Kind::Long | Kind::Double)
    }

    pub fn generic_signature(self) -> &'static str {
        match self {
            Kind::Int => "I",
            Kind::Long => "J",
            Kind::Float => "F",
            Kind::Double => "D",
            Kind::Reference => OBJECT_SIGNATURE,
        }
    }
}

/// One value on the simulated operand stack.
///
/// Values are immutable; the interpreter shares them through `Rc` so that
/// duplicated entries refer to the same value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StackValue {
    signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    constant: Option<Constant>,
    is_null: bool,
}

impl StackValue {
    /// Value of a known type with no known constant.
    pub fn typed(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            constant: None,
            is_null: false,
        }
    }

    /// Value carrying a constant with its natural signature.
    pub fn constant(constant: Constant) -> Self {
        Self {
            signature: constant.signature().to_string(),
            constant: Some(constant),
            is_null: false,
        }
    }

    /// Value with an explicit signature and constant, `None` when the two
    /// are not compatible.
    pub fn with_constant(signature: impl Into<String>, constant: Constant) -> Option<Self> {
        let signature = signature.into();
        if !constant.fits(&signature) {
            return None;
        }
        Some(Self {
            signature,
            constant: Some(constant),
            is_null: false,
        })
    }

    /// The null reference produced by `ACONST_NULL`.
    pub fn null() -> Self {
        Self {
            signature: OBJECT_SIGNATURE.to_string(),
            constant: None,
            is_null: true,
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn constant_value(&self) -> Option<&Constant> {
        self.constant.as_ref()
    }

    pub fn is_null(&self) -> bool {
        self.is_null
    }

    pub fn kind(&self) -> Option<Kind> {
        Kind::of(&self.signature)
    }

    pub fn int_constant(&self) -> Option<i32> {
        match self.constant {
            Some(Constant::Int(value)) => Some(value),
            _ => None,
        }
    }

    pub fn long_constant(&self) -> Option<i64> {
        match self.constant {
            Some(Constant::Long(value)) => Some(value),
            _ => None,
        }
    }

    pub fn float_constant(&self) -> Option<f32> {
        match self.constant {
            Some(Constant::Float(value)) => Some(value),
            _ => None,
        }
    }

    pub fn double_constant(&self) -> Option<f64> {
        match self.constant {
            Some(Constant::Double(value)) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for StackValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null {
            return write!(f, "null");
        }
        match &self.constant {
            Some(constant) => write!(f, "{}={}", self.signature, constant),
            None => write!(f, "{}", self.signature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_take_their_natural_signature() {
        assert_eq!("I", StackValue::constant(Constant::Int(1)).signature());
        assert_eq!("J", StackValue::constant(Constant::Long(1)).signature());
        assert_eq!(
            STRING_SIGNATURE,
            StackValue::constant(Constant::String("x".to_string())).signature()
        );
    }

    #[test]
    fn with_constant_rejects_incompatible_signature() {
        assert!(StackValue::with_constant("B", Constant::Int(-1)).is_some());
        assert!(StackValue::with_constant("J", Constant::Int(1)).is_none());
        assert!(StackValue::with_constant("I", Constant::String("1".to_string())).is_none());
    }

    #[test]
    fn null_is_a_reference_without_constant() {
        let value = StackValue::null();

        assert!(value.is_null());
        assert_eq!(Some(Kind::Reference), value.kind());
        assert!(value.constant_value().is_none());
        assert_eq!("null", value.to_string());
    }

    #[test]
    fn serializes_for_traces() {
        let value = StackValue::constant(Constant::Int(7));
        let json = serde_json::to_value(&value).expect("serialize value");

        assert_eq!("I", json["signature"]);
        assert_eq!("int", json["constant"]["kind"]);
        assert_eq!(7, json["constant"]["value"]);
        assert_eq!(false, json["is_null"]);
    }
}

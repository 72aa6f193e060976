//! Constant folding with Java arithmetic semantics.

use std::cmp::Ordering;

use crate::opcodes;
use crate::value::{Constant, Kind, StackValue};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    pub(crate) fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr)
    }
}

/// Fold `left op right`. Shift distances are always int-typed.
pub(crate) fn binary(
    op: BinaryOp,
    kind: Kind,
    left: &StackValue,
    right: &StackValue,
) -> Option<Constant> {
    match kind {
        Kind::Int => int_op(op, left.int_constant()?, right.int_constant()?).map(Constant::Int),
        Kind::Long => {
            let distance_or_value = if op.is_shift() {
                right.int_constant()? as i64
            } else {
                right.long_constant()?
            };
            long_op(op, left.long_constant()?, distance_or_value).map(Constant::Long)
        }
        Kind::Float => {
            float_op(op, left.float_constant()?, right.float_constant()?).map(Constant::Float)
        }
        Kind::Double => {
            double_op(op, left.double_constant()?, right.double_constant()?).map(Constant::Double)
        }
        Kind::Reference => None,
    }
}

fn int_op(op: BinaryOp, a: i32, b: i32) -> Option<i32> {
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div if b == 0 => return None,
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Rem if b == 0 => return None,
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::Shr => a.wrapping_shr(b as u32),
        BinaryOp::Ushr => (a as u32).wrapping_shr(b as u32) as i32,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
    };
    Some(value)
}

fn long_op(op: BinaryOp, a: i64, b: i64) -> Option<i64> {
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div if b == 0 => return None,
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Rem if b == 0 => return None,
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::Shr => a.wrapping_shr(b as u32),
        BinaryOp::Ushr => (a as u64).wrapping_shr(b as u32) as i64,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
    };
    Some(value)
}

fn float_op(op: BinaryOp, a: f32, b: f32) -> Option<f32> {
    match op {
        BinaryOp::Add => Some(a + b),
        BinaryOp::Sub => Some(a - b),
        BinaryOp::Mul => Some(a * b),
        BinaryOp::Div => Some(a / b),
        BinaryOp::Rem => Some(a % b),
        _ => None,
    }
}

fn double_op(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    match op {
        BinaryOp::Add => Some(a + b),
        BinaryOp::Sub => Some(a - b),
        BinaryOp::Mul => Some(a * b),
        BinaryOp::Div => Some(a / b),
        BinaryOp::Rem => Some(a % b),
        _ => None,
    }
}

pub(crate) fn negate(value: &StackValue) -> Option<Constant> {
    match value.constant_value()? {
        Constant::Int(v) => Some(Constant::Int(v.wrapping_neg())),
        Constant::Long(v) => Some(Constant::Long(v.wrapping_neg())),
        Constant::Float(v) => Some(Constant::Float(-v)),
        Constant::Double(v) => Some(Constant::Double(-v)),
        Constant::String(_) => None,
    }
}

/// Source kind and result signature of a conversion opcode.
pub(crate) fn conversion(opcode: u8) -> Option<(Kind, &'static str)> {
    let conversion = match opcode {
        opcodes::I2L => (Kind::Int, "J"),
        opcodes::I2F => (Kind::Int, "F"),
        opcodes::I2D => (Kind::Int, "D"),
        opcodes::L2I => (Kind::Long, "I"),
        opcodes::L2F => (Kind::Long, "F"),
        opcodes::L2D => (Kind::Long, "D"),
        opcodes::F2I => (Kind::Float, "I"),
        opcodes::F2L => (Kind::Float, "J"),
        opcodes::F2D => (Kind::Float, "D"),
        opcodes::D2I => (Kind::Double, "I"),
        opcodes::D2L => (Kind::Double, "J"),
        opcodes::D2F => (Kind::Double, "F"),
        opcodes::I2B => (Kind::Int, "B"),
        opcodes::I2C => (Kind::Int, "C"),
        opcodes::I2S => (Kind::Int, "S"),
        _ => return None,
    };
    Some(conversion)
}

/// Fold a conversion. Float to integer casts saturate and map NaN to zero,
/// which is what `as` does.
pub(crate) fn convert(opcode: u8, value: &StackValue) -> Option<Constant> {
    let constant = match (opcode, value.constant_value()?) {
        (opcodes::I2L, Constant::Int(v)) => Constant::Long(*v as i64),
        (opcodes::I2F, Constant::Int(v)) => Constant::Float(*v as f32),
        (opcodes::I2D, Constant::Int(v)) => Constant::Double(*v as f64),
        (opcodes::I2B, Constant::Int(v)) => Constant::Int(*v as i8 as i32),
        (opcodes::I2C, Constant::Int(v)) => Constant::Int(*v as u16 as i32),
        (opcodes::I2S, Constant::Int(v)) => Constant::Int(*v as i16 as i32),
        (opcodes::L2I, Constant::Long(v)) => Constant::Int(*v as i32),
        (opcodes::L2F, Constant::Long(v)) => Constant::Float(*v as f32),
        (opcodes::L2D, Constant::Long(v)) => Constant::Double(*v as f64),
        (opcodes::F2I, Constant::Float(v)) => Constant::Int(*v as i32),
        (opcodes::F2L, Constant::Float(v)) => Constant::Long(*v as i64),
        (opcodes::F2D, Constant::Float(v)) => Constant::Double(*v as f64),
        (opcodes::D2I, Constant::Double(v)) => Constant::Int(*v as i32),
        (opcodes::D2L, Constant::Double(v)) => Constant::Long(*v as i64),
        (opcodes::D2F, Constant::Double(v)) => Constant::Float(*v as f32),
        _ => return None,
    };
    Some(constant)
}

/// Fold `LCMP`, `FCMPL/G` and `DCMPL/G`.
pub(crate) fn compare(opcode: u8, left: &StackValue, right: &StackValue) -> Option<Constant> {
    let ordering = match opcode {
        opcodes::LCMP => Some(left.long_constant()?.cmp(&right.long_constant()?)),
        opcodes::FCMPL | opcodes::FCMPG => left
            .float_constant()?
            .partial_cmp(&right.float_constant()?),
        opcodes::DCMPL | opcodes::DCMPG => left
            .double_constant()?
            .partial_cmp(&right.double_constant()?),
        _ => return None,
    };
    let result = match ordering {
        Some(Ordering::Less) => -1,
        Some(Ordering::Equal) => 0,
        Some(Ordering::Greater) => 1,
        None if matches!(opcode, opcodes::FCMPG | opcodes::DCMPG) => 1,
        None => -1,
    };
    Some(Constant::Int(result))
}

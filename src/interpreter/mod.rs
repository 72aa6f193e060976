//! Symbolic operand stack interpretation for one path through a method.
//!
//! The interpreter consumes decoded instructions one at a time and keeps a
//! stack of [`StackValue`]s describing what the JVM operand stack holds at
//! that point, folding constants where every input is known.
//!
//! Faults never escape: an underflow, an operand of the wrong kind, an
//! unusable constant pool reference or an unsupported opcode clears the
//! whole stack and marks it invalid. Detectors then see "no information"
//! instead of stale values, and the rest of the method is still analysed.

mod fold;

use std::rc::Rc;

use log::debug;
use thiserror::Error;

use crate::descriptor::{class_name_to_signature, method_descriptor_summary, primitive_array_signature};
use crate::ir::{Instruction, LocalVariableTable, Operands};
use crate::opcodes;
use crate::value::{Constant, Kind, OBJECT_SIGNATURE, StackValue};

use fold::BinaryOp;

/// Read access to the constant pool of the method's class.
pub trait ConstantPoolView {
    /// Entry usable by `LDC`, `LDC_W` and `LDC2_W`.
    fn loadable(&self, index: u16) -> Option<Loadable<'_>>;
    /// Internal name (or array descriptor) of a `CONSTANT_Class` entry.
    fn class_name(&self, index: u16) -> Option<&str>;
    /// Field, method or interface method reference.
    fn member(&self, index: u16) -> Option<MemberRef<'_>>;
    /// Method descriptor of a `CONSTANT_InvokeDynamic` entry.
    fn dynamic_descriptor(&self, index: u16) -> Option<&str>;
}

/// Read access to declared local variable types.
pub trait LocalVariableView {
    fn local_signature(&self, index: u16, offset: u32) -> Option<&str>;
}

impl LocalVariableView for LocalVariableTable {
    fn local_signature(&self, index: u16, offset: u32) -> Option<&str> {
        self.signature_at(index, offset)
    }
}

/// Local variable view for methods without debug information.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLocals;

impl LocalVariableView for NoLocals {
    fn local_signature(&self, _index: u16, _offset: u32) -> Option<&str> {
        None
    }
}

/// Constant pool entry loadable onto the stack.
#[derive(Clone, Debug, PartialEq)]
pub enum Loadable<'a> {
    Constant(Constant),
    Class(&'a str),
    MethodType,
    MethodHandle,
    /// Dynamically-computed constant with its field descriptor.
    Dynamic(&'a str),
}

/// Resolved field or method reference.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemberRef<'a> {
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// Reason the stack was discarded while processing an instruction.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StackFault {
    #[error("{opcode} needs {needed} stack values but only {available} are present")]
    Underflow {
        opcode: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("{opcode} expected a {expected:?} operand but found {found}")]
    TypeMismatch {
        opcode: &'static str,
        expected: Kind,
        found: String,
    },
    #[error("unsupported opcode {opcode} (0x{code:02x})")]
    Unsupported { opcode: &'static str, code: u8 },
    #[error("{opcode} has malformed operands {operands:?}")]
    MalformedOperands {
        opcode: &'static str,
        operands: Operands,
    },
    #[error("{opcode} refers to unusable constant pool entry #{index}")]
    BadPoolEntry { opcode: &'static str, index: u16 },
    #[error("{opcode} refers to invalid descriptor {descriptor}")]
    BadDescriptor {
        opcode: &'static str,
        descriptor: String,
    },
}

/// Simulated operand stack driven one instruction at a time.
///
/// One interpreter belongs to one method pass. It holds `Rc`s and is not
/// `Send`.
#[derive(Clone, Debug)]
pub struct StackInterpreter {
    stack: Vec<Rc<StackValue>>,
    valid: bool,
}

impl Default for StackInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl StackInterpreter {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            valid: true,
        }
    }

    /// Number of values on the stack.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Value `offset` entries below the top; 0 is the top.
    pub fn item_at(&self, offset: usize) -> Option<&Rc<StackValue>> {
        let index = self.stack.len().checked_sub(offset + 1)?;
        self.stack.get(index)
    }

    /// False once a fault cleared the stack, until the next [`reset`](Self::reset).
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Values from bottom to top.
    pub fn items(&self) -> impl Iterator<Item = &Rc<StackValue>> {
        self.stack.iter()
    }

    /// Empty the stack and forget earlier faults.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.valid = true;
    }

    /// Start an exception handler: the stack holds only the caught exception.
    pub fn enter_handler(&mut self, catch_type: Option<&str>) {
        self.reset();
        let signature = catch_type
            .map(class_name_to_signature)
            .unwrap_or_else(|| "Ljava/lang/Throwable;".to_string());
        self.stack.push(Rc::new(StackValue::typed(signature)));
    }

    /// Apply the stack effect of `instruction`.
    pub fn process_instruction(
        &mut self,
        instruction: &Instruction,
        pool: &dyn ConstantPoolView,
        locals: &dyn LocalVariableView,
    ) {
        if let Err(fault) = self.step(instruction, pool, locals) {
            debug!(
                "operand stack cleared at offset {}: {}",
                instruction.offset, fault
            );
            self.stack.clear();
            self.valid = false;
        }
    }

    fn step(
        &mut self,
        instruction: &Instruction,
        pool: &dyn ConstantPoolView,
        locals: &dyn LocalVariableView,
    ) -> Result<(), StackFault> {
        let opcode = instruction.opcode;
        match opcode {
            opcodes::NOP
            | opcodes::GOTO
            | opcodes::GOTO_W
            | opcodes::RET
            | opcodes::RETURN
            | opcodes::IINC
            | opcodes::ATHROW
            | opcodes::CHECKCAST => {}
            opcodes::ACONST_NULL => self.push(StackValue::null()),
            opcodes::ICONST_M1..=opcodes::ICONST_5 => {
                let value = opcode as i32 - opcodes::ICONST_0 as i32;
                self.push(StackValue::constant(Constant::Int(value)));
            }
            opcodes::LCONST_0 | opcodes::LCONST_1 => {
                let value = (opcode - opcodes::LCONST_0) as i64;
                self.push(StackValue::constant(Constant::Long(value)));
            }
            opcodes::FCONST_0..=opcodes::FCONST_2 => {
                let value = (opcode - opcodes::FCONST_0) as f32;
                self.push(StackValue::constant(Constant::Float(value)));
            }
            opcodes::DCONST_0 | opcodes::DCONST_1 => {
                let value = (opcode - opcodes::DCONST_0) as f64;
                self.push(StackValue::constant(Constant::Double(value)));
            }
            opcodes::BIPUSH | opcodes::SIPUSH => match instruction.operands {
                Operands::Int(value) => self.push(StackValue::constant(Constant::Int(value))),
                _ => return Err(malformed(instruction)),
            },
            opcodes::LDC | opcodes::LDC_W | opcodes::LDC2_W => {
                let index = pool_index(instruction)?;
                let value = match pool.loadable(index) {
                    Some(Loadable::Constant(constant)) => StackValue::constant(constant),
                    Some(Loadable::Class(_)) => StackValue::typed("Ljava/lang/Class;"),
                    Some(Loadable::MethodType) => {
                        StackValue::typed("Ljava/lang/invoke/MethodType;")
                    }
                    Some(Loadable::MethodHandle) => {
                        StackValue::typed("Ljava/lang/invoke/MethodHandle;")
                    }
                    Some(Loadable::Dynamic(descriptor)) => StackValue::typed(descriptor),
                    None => return Err(bad_pool_entry(opcode, index)),
                };
                self.push(value);
            }
            opcodes::ILOAD..=opcodes::ALOAD => {
                let Operands::Local(index) = instruction.operands else {
                    return Err(malformed(instruction));
                };
                let kind = LOAD_STORE_KINDS[(opcode - opcodes::ILOAD) as usize];
                self.push_local(kind, index, instruction.offset, locals);
            }
            opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let relative = opcode - opcodes::ILOAD_0;
                let kind = LOAD_STORE_KINDS[(relative / 4) as usize];
                self.push_local(kind, (relative % 4) as u16, instruction.offset, locals);
            }
            opcodes::IALOAD..=opcodes::SALOAD => {
                self.pop_kind(opcode, Kind::Int)?;
                let array = self.pop_kind(opcode, Kind::Reference)?;
                self.push(StackValue::typed(array_element_signature(opcode, &array)));
            }
            opcodes::ISTORE..=opcodes::ASTORE => {
                let kind = LOAD_STORE_KINDS[(opcode - opcodes::ISTORE) as usize];
                self.pop_kind(opcode, kind)?;
            }
            opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let kind = LOAD_STORE_KINDS[((opcode - opcodes::ISTORE_0) / 4) as usize];
                self.pop_kind(opcode, kind)?;
            }
            opcodes::IASTORE..=opcodes::SASTORE => {
                self.pop_kind(opcode, array_store_kind(opcode))?;
                self.pop_kind(opcode, Kind::Int)?;
                self.pop_kind(opcode, Kind::Reference)?;
            }
            opcodes::POP => {
                self.pop(opcode)?;
            }
            opcodes::POP2 => {
                let count = if self.is_wide_at(opcode, 0)? { 1 } else { 2 };
                self.require(opcode, count)?;
                self.stack.truncate(self.stack.len() - count);
            }
            opcodes::DUP => self.dup_under(opcode, 1, 0)?,
            opcodes::DUP_X1 => self.dup_under(opcode, 1, 1)?,
            opcodes::DUP_X2 => {
                let skipped = if self.is_wide_at(opcode, 1)? { 1 } else { 2 };
                self.dup_under(opcode, 1, skipped)?;
            }
            opcodes::DUP2 => {
                let copied = if self.is_wide_at(opcode, 0)? { 1 } else { 2 };
                self.dup_under(opcode, copied, 0)?;
            }
            opcodes::DUP2_X1 => {
                let copied = if self.is_wide_at(opcode, 0)? { 1 } else { 2 };
                self.dup_under(opcode, copied, 1)?;
            }
            opcodes::DUP2_X2 => {
                let copied = if self.is_wide_at(opcode, 0)? { 1 } else { 2 };
                let skipped = if self.is_wide_at(opcode, copied)? { 1 } else { 2 };
                self.dup_under(opcode, copied, skipped)?;
            }
            opcodes::SWAP => {
                self.require(opcode, 2)?;
                let len = self.stack.len();
                self.stack.swap(len - 1, len - 2);
            }
            opcodes::IADD..=opcodes::DREM => {
                let relative = opcode - opcodes::IADD;
                let kind = NUMERIC_KINDS[(relative % 4) as usize];
                let op = [
                    BinaryOp::Add,
                    BinaryOp::Sub,
                    BinaryOp::Mul,
                    BinaryOp::Div,
                    BinaryOp::Rem,
                ][(relative / 4) as usize];
                self.binary(opcode, op, kind)?;
            }
            opcodes::INEG..=opcodes::DNEG => {
                let kind = NUMERIC_KINDS[(opcode - opcodes::INEG) as usize];
                let value = self.pop_kind(opcode, kind)?;
                self.push_folded(kind.generic_signature(), fold::negate(&value));
            }
            opcodes::ISHL..=opcodes::LXOR => {
                let relative = opcode - opcodes::ISHL;
                let kind = if relative % 2 == 0 {
                    Kind::Int
                } else {
                    Kind::Long
                };
                let op = [
                    BinaryOp::Shl,
                    BinaryOp::Shr,
                    BinaryOp::Ushr,
                    BinaryOp::And,
                    BinaryOp::Or,
                    BinaryOp::Xor,
                ][(relative / 2) as usize];
                self.binary(opcode, op, kind)?;
            }
            opcodes::I2L..=opcodes::I2S => {
                let Some((from, signature)) = fold::conversion(opcode) else {
                    return Err(unsupported(opcode));
                };
                let value = self.pop_kind(opcode, from)?;
                self.push_folded(signature, fold::convert(opcode, &value));
            }
            opcodes::LCMP..=opcodes::DCMPG => {
                let kind = match opcode {
                    opcodes::LCMP => Kind::Long,
                    opcodes::FCMPL | opcodes::FCMPG => Kind::Float,
                    _ => Kind::Double,
                };
                let right = self.pop_kind(opcode, kind)?;
                let left = self.pop_kind(opcode, kind)?;
                self.push_folded("I", fold::compare(opcode, &left, &right));
            }
            opcodes::IFEQ..=opcodes::IFLE
            | opcodes::TABLESWITCH
            | opcodes::LOOKUPSWITCH => {
                self.pop_kind(opcode, Kind::Int)?;
            }
            opcodes::IF_ICMPEQ..=opcodes::IF_ICMPLE => {
                self.pop_kind(opcode, Kind::Int)?;
                self.pop_kind(opcode, Kind::Int)?;
            }
            opcodes::IF_ACMPEQ | opcodes::IF_ACMPNE => {
                self.pop_kind(opcode, Kind::Reference)?;
                self.pop_kind(opcode, Kind::Reference)?;
            }
            opcodes::IFNULL
            | opcodes::IFNONNULL
            | opcodes::MONITORENTER
            | opcodes::MONITOREXIT => {
                self.pop_kind(opcode, Kind::Reference)?;
            }
            opcodes::IRETURN..=opcodes::ARETURN => {
                let kind = LOAD_STORE_KINDS[(opcode - opcodes::IRETURN) as usize];
                self.pop_kind(opcode, kind)?;
            }
            opcodes::GETSTATIC => {
                let member = self.member(instruction, pool)?;
                self.push(StackValue::typed(member.descriptor));
            }
            opcodes::PUTSTATIC => {
                let member = self.member(instruction, pool)?;
                self.pop_kind(opcode, field_kind(opcode, member.descriptor)?)?;
            }
            opcodes::GETFIELD => {
                let member = self.member(instruction, pool)?;
                self.pop_kind(opcode, Kind::Reference)?;
                self.push(StackValue::typed(member.descriptor));
            }
            opcodes::PUTFIELD => {
                let member = self.member(instruction, pool)?;
                self.pop_kind(opcode, field_kind(opcode, member.descriptor)?)?;
                self.pop_kind(opcode, Kind::Reference)?;
            }
            opcodes::INVOKEVIRTUAL
            | opcodes::INVOKESPECIAL
            | opcodes::INVOKESTATIC
            | opcodes::INVOKEINTERFACE
            | opcodes::INVOKEDYNAMIC => {
                let descriptor = if opcode == opcodes::INVOKEDYNAMIC {
                    let index = pool_index(instruction)?;
                    pool.dynamic_descriptor(index)
                        .ok_or_else(|| bad_pool_entry(opcode, index))?
                } else {
                    self.member(instruction, pool)?.descriptor
                };
                let summary =
                    method_descriptor_summary(descriptor).map_err(|_| StackFault::BadDescriptor {
                        opcode: opcodes::mnemonic(opcode),
                        descriptor: descriptor.to_string(),
                    })?;
                let has_receiver =
                    !matches!(opcode, opcodes::INVOKESTATIC | opcodes::INVOKEDYNAMIC);
                let count = summary.param_count + usize::from(has_receiver);
                self.require(opcode, count)?;
                self.stack.truncate(self.stack.len() - count);
                if let Some(signature) = summary.return_signature {
                    self.push(StackValue::typed(signature));
                }
            }
            opcodes::NEW => {
                let index = pool_index(instruction)?;
                let name = pool
                    .class_name(index)
                    .ok_or_else(|| bad_pool_entry(opcode, index))?;
                self.push(StackValue::typed(class_name_to_signature(name)));
            }
            opcodes::NEWARRAY => {
                let Operands::NewArray(type_code) = instruction.operands else {
                    return Err(malformed(instruction));
                };
                let signature =
                    primitive_array_signature(type_code).ok_or_else(|| malformed(instruction))?;
                self.pop_kind(opcode, Kind::Int)?;
                self.push(StackValue::typed(signature));
            }
            opcodes::ANEWARRAY => {
                let index = pool_index(instruction)?;
                let name = pool
                    .class_name(index)
                    .ok_or_else(|| bad_pool_entry(opcode, index))?;
                self.pop_kind(opcode, Kind::Int)?;
                self.push(StackValue::typed(format!(
                    "[{}",
                    class_name_to_signature(name)
                )));
            }
            opcodes::ARRAYLENGTH | opcodes::INSTANCEOF => {
                self.pop_kind(opcode, Kind::Reference)?;
                self.push(StackValue::typed("I"));
            }
            _ => return Err(unsupported(opcode)),
        }
        Ok(())
    }

    fn push(&mut self, value: StackValue) {
        self.stack.push(Rc::new(value));
    }

    fn push_folded(&mut self, signature: &str, folded: Option<Constant>) {
        let value = folded
            .and_then(|constant| StackValue::with_constant(signature, constant))
            .unwrap_or_else(|| StackValue::typed(signature));
        self.push(value);
    }

    fn push_local(&mut self, kind: Kind, index: u16, offset: u32, locals: &dyn LocalVariableView) {
        let signature = locals
            .local_signature(index, offset)
            .filter(|signature| Kind::of(signature) == Some(kind))
            .unwrap_or(kind.generic_signature());
        self.push(StackValue::typed(signature));
    }

    fn require(&self, opcode: u8, needed: usize) -> Result<(), StackFault> {
        if self.stack.len() < needed {
            return Err(StackFault::Underflow {
                opcode: opcodes::mnemonic(opcode),
                needed,
                available: self.stack.len(),
            });
        }
        Ok(())
    }

    fn peek(&self, opcode: u8, offset: usize) -> Result<Rc<StackValue>, StackFault> {
        self.require(opcode, offset + 1)?;
        Ok(Rc::clone(&self.stack[self.stack.len() - 1 - offset]))
    }

    /// Whether the value `offset` entries below the top is a long or double.
    fn is_wide_at(&self, opcode: u8, offset: usize) -> Result<bool, StackFault> {
        Ok(self.peek(opcode, offset)?.kind().is_some_and(Kind::is_wide))
    }

    /// Copy the top `copied` values and insert the copies below the
    /// `skipped` values that sit under them.
    fn dup_under(&mut self, opcode: u8, copied: usize, skipped: usize) -> Result<(), StackFault> {
        self.require(opcode, copied + skipped)?;
        let len = self.stack.len();
        let top = self.stack[len - copied..].to_vec();
        let tail = self.stack.split_off(len - copied - skipped);
        self.stack.extend(top);
        self.stack.extend(tail);
        Ok(())
    }

    fn pop(&mut self, opcode: u8) -> Result<Rc<StackValue>, StackFault> {
        self.require(opcode, 1)?;
        self.stack.pop().ok_or(StackFault::Underflow {
            opcode: opcodes::mnemonic(opcode),
            needed: 1,
            available: 0,
        })
    }

    fn pop_kind(&mut self, opcode: u8, expected: Kind) -> Result<Rc<StackValue>, StackFault> {
        let value = self.pop(opcode)?;
        if value.kind() != Some(expected) {
            return Err(StackFault::TypeMismatch {
                opcode: opcodes::mnemonic(opcode),
                expected,
                found: value.signature().to_string(),
            });
        }
        Ok(value)
    }

    fn binary(&mut self, opcode: u8, op: BinaryOp, kind: Kind) -> Result<(), StackFault> {
        let right_kind = if op.is_shift() { Kind::Int } else { kind };
        let right = self.pop_kind(opcode, right_kind)?;
        let left = self.pop_kind(opcode, kind)?;
        self.push_folded(kind.generic_signature(), fold::binary(op, kind, &left, &right));
        Ok(())
    }

    fn member<'p>(
        &self,
        instruction: &Instruction,
        pool: &'p dyn ConstantPoolView,
    ) -> Result<MemberRef<'p>, StackFault> {
        let index = pool_index(instruction)?;
        pool.member(index)
            .ok_or_else(|| bad_pool_entry(instruction.opcode, index))
    }
}

const LOAD_STORE_KINDS: [Kind; 5] = [
    Kind::Int,
    Kind::Long,
    Kind::Float,
    Kind::Double,
    Kind::Reference,
];

const NUMERIC_KINDS: [Kind; 4] = [Kind::Int, Kind::Long, Kind::Float, Kind::Double];

fn array_store_kind(opcode: u8) -> Kind {
    match opcode {
        opcodes::LASTORE => Kind::Long,
        opcodes::FASTORE => Kind::Float,
        opcodes::DASTORE => Kind::Double,
        opcodes::AASTORE => Kind::Reference,
        _ => Kind::Int,
    }
}

/// Element signature loaded by an array load, preferring the array's own
/// component type when it is known and agrees with the opcode.
fn array_element_signature(opcode: u8, array: &StackValue) -> String {
    let fallback = match opcode {
        opcodes::IALOAD => "I",
        opcodes::LALOAD => "J",
        opcodes::FALOAD => "F",
        opcodes::DALOAD => "D",
        opcodes::BALOAD => "B",
        opcodes::CALOAD => "C",
        opcodes::SALOAD => "S",
        _ => OBJECT_SIGNATURE,
    };
    let expected = Kind::of(fallback);
    match array.signature().strip_prefix('[') {
        Some(element) if Kind::of(element) == expected => element.to_string(),
        _ => fallback.to_string(),
    }
}

fn field_kind(opcode: u8, descriptor: &str) -> Result<Kind, StackFault> {
    Kind::of(descriptor).ok_or_else(|| StackFault::BadDescriptor {
        opcode: opcodes::mnemonic(opcode),
        descriptor: descriptor.to_string(),
    })
}

fn pool_index(instruction: &Instruction) -> Result<u16, StackFault> {
    match instruction.operands {
        Operands::Pool(index) => Ok(index),
        _ => Err(malformed(instruction)),
    }
}

fn malformed(instruction: &Instruction) -> StackFault {
    StackFault::MalformedOperands {
        opcode: opcodes::mnemonic(instruction.opcode),
        operands: instruction.operands.clone(),
    }
}

fn bad_pool_entry(opcode: u8, index: u16) -> StackFault {
    StackFault::BadPoolEntry {
        opcode: opcodes::mnemonic(opcode),
        index,
    }
}

fn unsupported(opcode: u8) -> StackFault {
    StackFault::Unsupported {
        opcode: opcodes::mnemonic(opcode),
        code: opcode,
    }
}

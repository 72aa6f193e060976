use crate::constant_pool::ConstantPool;

/// Intermediate representation for a parsed JVM class.
#[derive(Clone, Debug)]
pub struct Class {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    pub constant_pool: ConstantPool,
    pub methods: Vec<Method>,
    pub artifact_index: i64,
}

/// Intermediate representation for a method and its decoded bytecode.
#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    pub descriptor: String,
    pub instructions: Vec<Instruction>,
    pub exception_handlers: Vec<ExceptionHandler>,
    pub local_variables: LocalVariableTable,
}

/// Exception handler metadata from the Code attribute.
#[derive(Clone, Debug)]
pub struct ExceptionHandler {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    pub catch_type: Option<String>,
}

/// Bytecode instruction with its immediate operands decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: u8,
    pub operands: Operands,
}

impl Instruction {
    pub fn new(offset: u32, opcode: u8, operands: Operands) -> Self {
        Self {
            offset,
            opcode,
            operands,
        }
    }

    /// Instruction without immediates.
    pub fn simple(offset: u32, opcode: u8) -> Self {
        Self::new(offset, opcode, Operands::None)
    }
}

/// Immediate operands carried by an instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operands {
    None,
    /// `BIPUSH`/`SIPUSH` literal.
    Int(i32),
    /// Local variable slot for loads, stores and `RET`.
    Local(u16),
    Iinc { index: u16, delta: i16 },
    /// Constant pool index for `LDC*`, field, method, class and invokedynamic references.
    Pool(u16),
    /// Absolute branch target.
    Branch(u32),
    /// Absolute switch targets, default first.
    Switch(Vec<u32>),
    /// `NEWARRAY` primitive element type code.
    NewArray(u8),
    /// `MULTIANEWARRAY` class index and dimension count.
    MultiNewArray { index: u16, dimensions: u8 },
}

/// One entry of a `LocalVariableTable` attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u32,
    pub length: u32,
    pub name: String,
    pub signature: String,
    pub index: u16,
}

/// Local variable declarations of a method, possibly empty when the class
/// was compiled without debug information.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalVariableTable {
    pub entries: Vec<LocalVariable>,
}

impl LocalVariableTable {
    pub fn new(entries: Vec<LocalVariable>) -> Self {
        Self { entries }
    }

    /// Declared signature of `index` at bytecode `offset`.
    pub fn signature_at(&self, index: u16, offset: u32) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| {
                entry.index == index
                    && offset >= entry.start_pc
                    && offset < entry.start_pc.saturating_add(entry.length)
            })
            .map(|entry| entry.signature.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_variable_lookup_respects_ranges() {
        let table = LocalVariableTable::new(vec![
            LocalVariable {
                start_pc: 0,
                length: 10,
                name: "count".to_string(),
                signature: "I".to_string(),
                index: 1,
            },
            LocalVariable {
                start_pc: 10,
                length: 5,
                name: "name".to_string(),
                signature: "Ljava/lang/String;".to_string(),
                index: 1,
            },
        ]);

        assert_eq!(Some("I"), table.signature_at(1, 4));
        assert_eq!(Some("Ljava/lang/String;"), table.signature_at(1, 12));
        assert_eq!(None, table.signature_at(1, 15));
        assert_eq!(None, table.signature_at(2, 4));
    }
}

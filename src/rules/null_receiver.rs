use anyhow::Result;
use serde_sarif::sarif::Result as SarifResult;

use crate::descriptor::method_param_count;
use crate::engine::{walk_method, AnalysisContext, TypeContext};
use crate::interpreter::ConstantPoolView;
use crate::ir::{Instruction, Operands};
use crate::opcodes;
use crate::rules::{method_result, Rule, RuleMetadata};

/// Rule that detects dereferences of the `null` literal.
pub(crate) struct NullReceiverRule;

impl Rule for NullReceiverRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "NULL_RECEIVER",
            name: "Null receiver",
            description: "Field access, method call, throw or lock on a value that is always null",
        }
    }

    fn run(&self, context: &AnalysisContext, _types: &mut TypeContext) -> Result<Vec<SarifResult>> {
        let mut results = Vec::new();
        for class in &context.classes {
            for method in &class.methods {
                walk_method(method, &class.constant_pool, |instruction, interpreter| {
                    let Some(depth) = receiver_depth(instruction, &class.constant_pool) else {
                        return;
                    };
                    let is_null = interpreter
                        .item_at(depth)
                        .is_some_and(|receiver| receiver.is_null());
                    if is_null {
                        results.push(method_result(
                            class,
                            method,
                            instruction.offset,
                            describe(instruction, &class.constant_pool),
                        ));
                    }
                });
            }
        }
        Ok(results)
    }
}

/// Stack position of the dereferenced value, counted from the top.
fn receiver_depth(instruction: &Instruction, pool: &dyn ConstantPoolView) -> Option<usize> {
    match instruction.opcode {
        opcodes::GETFIELD | opcodes::ARRAYLENGTH | opcodes::ATHROW | opcodes::MONITORENTER => {
            Some(0)
        }
        opcodes::PUTFIELD => Some(1),
        opcodes::INVOKEVIRTUAL | opcodes::INVOKEINTERFACE => {
            let Operands::Pool(index) = instruction.operands else {
                return None;
            };
            let member = pool.member(index)?;
            method_param_count(member.descriptor).ok()
        }
        _ => None,
    }
}

fn describe(instruction: &Instruction, pool: &dyn ConstantPoolView) -> String {
    let member = match instruction.operands {
        Operands::Pool(index) => pool.member(index),
        _ => None,
    };
    match member {
        Some(member) => format!(
            "{} of {}.{} on a null reference",
            opcodes::mnemonic(instruction.opcode),
            member.owner,
            member.name
        ),
        None => format!(
            "{} on a null reference",
            opcodes::mnemonic(instruction.opcode)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant_pool::{ConstantPool, PoolEntry};
    use crate::rules::tests::{class_with_code, messages, run_rule};

    fn string_pool() -> ConstantPool {
        ConstantPool::from_entries(vec![
            PoolEntry::Utf8("java/lang/String".to_string()), // 1
            PoolEntry::Class { name_index: 1 },              // 2
            PoolEntry::Utf8("length".to_string()),           // 3
            PoolEntry::Utf8("()I".to_string()),              // 4
            PoolEntry::NameAndType {
                name_index: 3,
                descriptor_index: 4,
            }, // 5
            PoolEntry::Methodref {
                class_index: 2,
                name_and_type_index: 5,
            }, // 6
            PoolEntry::Utf8("charAt".to_string()), // 7
            PoolEntry::Utf8("(I)C".to_string()),   // 8
            PoolEntry::NameAndType {
                name_index: 7,
                descriptor_index: 8,
            }, // 9
            PoolEntry::Methodref {
                class_index: 2,
                name_and_type_index: 9,
            }, // 10
        ])
    }

    #[test]
    fn reports_call_on_null_literal() {
        let class = class_with_code(
            "com/example/App",
            string_pool(),
            &[
                opcodes::ACONST_NULL,
                opcodes::CHECKCAST,
                0x00,
                0x02,
                opcodes::INVOKEVIRTUAL,
                0x00,
                0x06,
                opcodes::IRETURN,
            ],
        );

        let results = run_rule(&NullReceiverRule, vec![class], Vec::new());

        assert_eq!(
            vec!["invokevirtual of java/lang/String.length on a null reference (offset 4)"
                .to_string()],
            messages(&results)
        );
    }

    #[test]
    fn receiver_sits_below_arguments() {
        let class = class_with_code(
            "com/example/App",
            string_pool(),
            &[
                opcodes::ACONST_NULL,
                opcodes::ICONST_0,
                opcodes::INVOKEVIRTUAL,
                0x00,
                0x0a,
                opcodes::IRETURN,
            ],
        );

        let results = run_rule(&NullReceiverRule, vec![class], Vec::new());

        assert_eq!(1, results.len());
    }

    #[test]
    fn reports_throw_and_array_length_of_null() {
        let class = class_with_code(
            "com/example/App",
            ConstantPool::default(),
            &[
                opcodes::ACONST_NULL,
                opcodes::ARRAYLENGTH,
                opcodes::POP,
                opcodes::ACONST_NULL,
                opcodes::ATHROW,
            ],
        );

        let results = run_rule(&NullReceiverRule, vec![class], Vec::new());

        assert_eq!(
            vec![
                "arraylength on a null reference (offset 1)".to_string(),
                "athrow on a null reference (offset 4)".to_string(),
            ],
            messages(&results)
        );
    }

    #[test]
    fn ignores_non_null_receivers() {
        let class = class_with_code(
            "com/example/App",
            string_pool(),
            &[
                opcodes::ALOAD_0,
                opcodes::INVOKEVIRTUAL,
                0x00,
                0x06,
                opcodes::IRETURN,
            ],
        );

        let results = run_rule(&NullReceiverRule, vec![class], Vec::new());

        assert!(results.is_empty());
    }
}

use anyhow::Result;
use serde_sarif::sarif::Result as SarifResult;

use crate::engine::{walk_method, AnalysisContext, TypeContext};
use crate::opcodes;
use crate::rules::{method_result, Rule, RuleMetadata};

/// Rule that detects integer division or remainder by a constant zero.
pub(crate) struct DivideByZeroRule;

impl Rule for DivideByZeroRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "DIVIDE_BY_ZERO",
            name: "Division by constant zero",
            description: "Integer division or remainder whose divisor is always zero",
        }
    }

    fn run(&self, context: &AnalysisContext, _types: &mut TypeContext) -> Result<Vec<SarifResult>> {
        let mut results = Vec::new();
        for class in &context.classes {
            for method in &class.methods {
                walk_method(method, &class.constant_pool, |instruction, interpreter| {
                    if !matches!(
                        instruction.opcode,
                        opcodes::IDIV | opcodes::IREM | opcodes::LDIV | opcodes::LREM
                    ) {
                        return;
                    }
                    let Some(divisor) = interpreter.item_at(0) else {
                        return;
                    };
                    if divisor.int_constant() == Some(0) || divisor.long_constant() == Some(0) {
                        results.push(method_result(
                            class,
                            method,
                            instruction.offset,
                            format!(
                                "{} by constant zero always throws ArithmeticException",
                                opcodes::mnemonic(instruction.opcode)
                            ),
                        ));
                    }
                });
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant_pool::ConstantPool;
    use crate::rules::tests::{class_with_code, messages, run_rule};

    #[test]
    fn reports_int_and_long_division_by_zero() {
        let class = class_with_code(
            "com/example/App",
            ConstantPool::default(),
            &[
                opcodes::ICONST_1,
                opcodes::ICONST_0,
                opcodes::IDIV,
                opcodes::POP,
                opcodes::LCONST_1,
                opcodes::LCONST_0,
                opcodes::LREM,
                opcodes::POP,
                opcodes::RETURN,
            ],
        );

        let results = run_rule(&DivideByZeroRule, vec![class], Vec::new());

        assert_eq!(
            vec![
                "idiv by constant zero always throws ArithmeticException (offset 2)".to_string(),
                "lrem by constant zero always throws ArithmeticException (offset 6)".to_string(),
            ],
            messages(&results)
        );
    }

    #[test]
    fn ignores_nonzero_and_unknown_divisors() {
        let class = class_with_code(
            "com/example/App",
            ConstantPool::default(),
            &[
                opcodes::ICONST_4,
                opcodes::ICONST_2,
                opcodes::IDIV,
                opcodes::ILOAD_0,
                opcodes::IDIV,
                opcodes::IRETURN,
            ],
        );

        let results = run_rule(&DivideByZeroRule, vec![class], Vec::new());

        assert!(results.is_empty());
    }

    #[test]
    fn folded_zero_divisor_is_reported() {
        let class = class_with_code(
            "com/example/App",
            ConstantPool::default(),
            &[
                opcodes::ICONST_5,
                opcodes::ICONST_2,
                opcodes::ICONST_2,
                opcodes::ISUB,
                opcodes::IREM,
                opcodes::IRETURN,
            ],
        );

        let results = run_rule(&DivideByZeroRule, vec![class], Vec::new());

        assert_eq!(1, results.len());
    }
}

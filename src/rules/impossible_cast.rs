use anyhow::Result;
use log::debug;
use serde_sarif::sarif::Result as SarifResult;

use crate::descriptor::class_name_to_signature;
use crate::engine::{walk_method, AnalysisContext, TypeContext};
use crate::interpreter::ConstantPoolView;
use crate::ir::Operands;
use crate::opcodes;
use crate::rules::{method_result, Rule, RuleMetadata};
use crate::types::{Type, TypeId};

/// Rule that detects casts between unrelated class types.
pub(crate) struct ImpossibleCastRule;

impl Rule for ImpossibleCastRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "IMPOSSIBLE_CAST",
            name: "Impossible cast",
            description: "Checked cast between class types where neither is a subtype of the other",
        }
    }

    fn run(&self, context: &AnalysisContext, types: &mut TypeContext) -> Result<Vec<SarifResult>> {
        let mut results = Vec::new();
        for class in &context.classes {
            for method in &class.methods {
                let mut casts = Vec::new();
                walk_method(method, &class.constant_pool, |instruction, interpreter| {
                    if instruction.opcode != opcodes::CHECKCAST {
                        return;
                    }
                    let Operands::Pool(index) = instruction.operands else {
                        return;
                    };
                    let Some(target) = class.constant_pool.class_name(index) else {
                        return;
                    };
                    match interpreter.item_at(0) {
                        Some(value) if !value.is_null() => casts.push((
                            instruction.offset,
                            value.signature().to_string(),
                            class_name_to_signature(target),
                        )),
                        _ => {}
                    }
                });

                for (offset, source, target) in casts {
                    if is_impossible(types, &source, &target) {
                        results.push(method_result(
                            class,
                            method,
                            offset,
                            format!("Cast from {} to {} always fails", source, target),
                        ));
                    }
                }
            }
        }
        Ok(results)
    }
}

fn is_impossible(types: &mut TypeContext, source: &str, target: &str) -> bool {
    if !source.starts_with(['L', '[']) {
        return false;
    }
    let (source_id, target_id) = match (
        types.type_from_signature(source),
        types.type_from_signature(target),
    ) {
        (Ok(source_id), Ok(target_id)) => (source_id, target_id),
        (Err(err), _) | (_, Err(err)) => {
            debug!("skipping cast {} -> {}: {}", source, target, err);
            return false;
        }
    };
    if types.is_subtype(source_id, target_id) || types.is_subtype(target_id, source_id) {
        return false;
    }
    !is_incomplete(types, source_id)
        && !is_incomplete(types, target_id)
        && !involves_interface(types, source_id)
        && !involves_interface(types, target_id)
}

/// Whether the hierarchy walk from `id` hit classes it could not resolve.
fn is_incomplete(types: &TypeContext, id: TypeId) -> bool {
    types
        .types
        .subtype_query_result(id)
        .is_none_or(|result| !result.missing_classes().is_empty())
}

/// Interfaces (and arrays of them) can be implemented by unrelated classes.
fn involves_interface(types: &TypeContext, id: TypeId) -> bool {
    match types.types.get_type(id) {
        Type::Array { element, .. } => involves_interface(types, *element),
        Type::Basic(_) => false,
        Type::Class { .. } => types.types.is_interface(id) != Some(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant_pool::{ConstantPool, PoolEntry};
    use crate::ir::Class;
    use crate::rules::tests::{class_with_code, library_class, messages, run_rule};

    /// Class entries: Dog #2, Cat #4, Animal #6, Runnable #8, Ghost #10.
    fn pool() -> ConstantPool {
        let mut entries = Vec::new();
        for name in [
            "com/example/Dog",
            "com/example/Cat",
            "com/example/Animal",
            "java/lang/Runnable",
            "com/example/Ghost",
        ] {
            let name_index = entries.len() as u16 + 1;
            entries.push(PoolEntry::Utf8(name.to_string()));
            entries.push(PoolEntry::Class { name_index });
        }
        ConstantPool::from_entries(entries)
    }

    fn animals() -> Vec<Class> {
        vec![
            library_class("com/example/Animal", "java/lang/Object", &[]),
            library_class("com/example/Dog", "com/example/Animal", &[]),
            library_class("com/example/Cat", "com/example/Animal", &[]),
        ]
    }

    /// `new Dog` followed by a cast to the class at `target`.
    fn cast_new_dog_to(target: u8) -> Class {
        class_with_code(
            "com/example/App",
            pool(),
            &[
                opcodes::NEW,
                0x00,
                0x02,
                opcodes::CHECKCAST,
                0x00,
                target,
                opcodes::ARETURN,
            ],
        )
    }

    #[test]
    fn reports_cast_between_sibling_classes() {
        let results = run_rule(&ImpossibleCastRule, vec![cast_new_dog_to(4)], animals());

        assert_eq!(
            vec!["Cast from Lcom/example/Dog; to Lcom/example/Cat; always fails (offset 3)"
                .to_string()],
            messages(&results)
        );
    }

    #[test]
    fn allows_upcast_and_interface_cast() {
        let upcast = run_rule(&ImpossibleCastRule, vec![cast_new_dog_to(6)], animals());
        let interface = run_rule(&ImpossibleCastRule, vec![cast_new_dog_to(8)], animals());

        assert!(upcast.is_empty());
        assert!(interface.is_empty());
    }

    #[test]
    fn stays_quiet_when_hierarchy_is_incomplete() {
        let results = run_rule(&ImpossibleCastRule, vec![cast_new_dog_to(10)], animals());

        assert!(results.is_empty());
    }

    #[test]
    fn stays_quiet_on_null() {
        let class = class_with_code(
            "com/example/App",
            pool(),
            &[opcodes::ACONST_NULL, opcodes::CHECKCAST, 0x00, 0x04, opcodes::ARETURN],
        );

        let results = run_rule(&ImpossibleCastRule, vec![class], animals());

        assert!(results.is_empty());
    }
}

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Serialize;
use serde_sarif::sarif::Result as SarifResult;

use crate::cfg::block_leaders;
use crate::interpreter::{ConstantPoolView, StackInterpreter};
use crate::ir::{Class, Instruction, Method};
use crate::opcodes;
use crate::rules::{all_rules, Rule, RuleMetadata};
use crate::types::{ClasspathResolver, SignatureError, TypeId, TypeRepository};
use crate::value::StackValue;

/// Classes visible to one analysis run.
pub struct AnalysisContext {
    /// Classes the rules report on.
    pub classes: Vec<Class>,
    /// Classes that only contribute hierarchy facts.
    pub library_classes: Vec<Class>,
}

pub fn build_context(classes: Vec<Class>, library_classes: Vec<Class>) -> AnalysisContext {
    AnalysisContext {
        classes,
        library_classes,
    }
}

impl AnalysisContext {
    pub fn all_classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter().chain(self.library_classes.iter())
    }

    /// Resolver over the JDK core table and every scanned class.
    pub fn class_resolver(&self) -> ClasspathResolver {
        ClasspathResolver::from_classes(self.all_classes())
    }
}

/// Type repository paired with the resolver that feeds it.
pub struct TypeContext {
    pub types: TypeRepository,
    pub resolver: ClasspathResolver,
}

impl TypeContext {
    pub fn new(resolver: ClasspathResolver) -> Self {
        Self {
            types: TypeRepository::new(),
            resolver,
        }
    }

    pub fn type_from_signature(&mut self, signature: &str) -> Result<TypeId, SignatureError> {
        self.types.type_from_signature(signature)
    }

    pub fn is_subtype(&mut self, sub: TypeId, superclass: TypeId) -> bool {
        self.types.is_subtype(sub, superclass, &mut self.resolver)
    }
}

/// Results of one run plus resolution statistics.
pub struct EngineOutput {
    pub results: Vec<SarifResult>,
    pub resolutions: usize,
}

/// Runs the selected rules over an [`AnalysisContext`].
pub struct Engine {
    rules: Vec<Box<dyn Rule>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self { rules: all_rules() }
    }

    /// Engine limited to the given rule ids; an empty list keeps every rule.
    pub fn with_rules(ids: &[String]) -> Result<Self> {
        if ids.is_empty() {
            return Ok(Self::new());
        }
        for id in ids {
            if !all_rules().iter().any(|rule| rule.metadata().id == id) {
                anyhow::bail!("unknown rule id: {}", id);
            }
        }
        let rules = all_rules()
            .into_iter()
            .filter(|rule| ids.iter().any(|id| id == rule.metadata().id))
            .collect();
        Ok(Self { rules })
    }

    pub fn rule_metadata(&self) -> Vec<RuleMetadata> {
        self.rules.iter().map(|rule| rule.metadata()).collect()
    }

    pub fn analyze(&self, context: &AnalysisContext) -> Result<EngineOutput> {
        let mut types = TypeContext::new(context.class_resolver());
        let mut results = Vec::new();
        for rule in &self.rules {
            let metadata = rule.metadata();
            let mut rule_results = rule
                .run(context, &mut types)
                .with_context(|| format!("rule {} failed", metadata.id))?;
            info!("rule {} reported {} results", metadata.id, rule_results.len());
            for result in &mut rule_results {
                result.rule_id = Some(metadata.id.to_string());
            }
            results.extend(rule_results);
        }
        Ok(EngineOutput {
            results,
            resolutions: types.resolver.resolution_count(),
        })
    }
}

/// Run a fresh interpreter over `method` in offset order.
///
/// The stack is reset at every basic-block leader and replaced by the caught
/// exception at every handler entry. `visit` sees each instruction with the
/// stack as it is just before that instruction executes.
pub fn walk_method<F>(method: &Method, pool: &dyn ConstantPoolView, mut visit: F)
where
    F: FnMut(&Instruction, &StackInterpreter),
{
    let leaders = block_leaders(&method.instructions);
    let handlers = handler_entries(method);
    let mut interpreter = StackInterpreter::new();
    for instruction in &method.instructions {
        if let Some(catch_type) = handlers.get(&instruction.offset) {
            interpreter.enter_handler(*catch_type);
        } else if instruction.offset != 0 && leaders.contains(&instruction.offset) {
            interpreter.reset();
        }
        visit(instruction, &interpreter);
        interpreter.process_instruction(instruction, pool, &method.local_variables);
    }
}

/// Catch type per handler entry; entries shared by different catch types
/// fall back to `Throwable`.
fn handler_entries(method: &Method) -> BTreeMap<u32, Option<&str>> {
    let mut entries: BTreeMap<u32, Option<&str>> = BTreeMap::new();
    for handler in &method.exception_handlers {
        let catch_type = handler.catch_type.as_deref();
        entries
            .entry(handler.handler_pc)
            .and_modify(|existing| {
                if *existing != catch_type {
                    *existing = None;
                }
            })
            .or_insert(catch_type);
    }
    entries
}

#[derive(Serialize)]
struct TraceLine<'a> {
    class: &'a str,
    method: &'a str,
    offset: u32,
    opcode: &'static str,
    valid: bool,
    stack: Vec<&'a StackValue>,
}

/// Write the stack before every instruction of the methods named
/// `method_name` as JSON lines.
pub fn trace_method(
    context: &AnalysisContext,
    method_name: &str,
    writer: &mut dyn Write,
) -> Result<usize> {
    let mut traced = 0;
    for class in &context.classes {
        for method in class.methods.iter().filter(|method| method.name == method_name) {
            debug!("tracing {}.{}{}", class.name, method.name, method.descriptor);
            let signature = format!("{}{}", method.name, method.descriptor);
            let mut failure = None;
            walk_method(method, &class.constant_pool, |instruction, interpreter| {
                if failure.is_some() {
                    return;
                }
                let line = TraceLine {
                    class: &class.name,
                    method: &signature,
                    offset: instruction.offset,
                    opcode: opcodes::mnemonic(instruction.opcode),
                    valid: interpreter.is_valid(),
                    stack: interpreter.items().map(|item| item.as_ref()).collect(),
                };
                let written = serde_json::to_writer(&mut *writer, &line)
                    .context("serialize trace line")
                    .and_then(|()| writeln!(writer).context("write trace line"));
                if let Err(err) = written {
                    failure = Some(err);
                }
            });
            if let Some(err) = failure {
                return Err(err);
            }
            traced += 1;
        }
    }
    Ok(traced)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::constant_pool::ConstantPool;
    use crate::ir::{ExceptionHandler, LocalVariableTable};
    use crate::scan::decode_instructions;
    use crate::value::Constant;

    pub(crate) fn method_from_code(code: &[u8], handlers: Vec<ExceptionHandler>) -> Method {
        Method {
            name: "run".to_string(),
            descriptor: "()V".to_string(),
            instructions: decode_instructions(code).expect("decode"),
            exception_handlers: handlers,
            local_variables: LocalVariableTable::default(),
        }
    }

    fn depths(method: &Method) -> Vec<(u32, usize)> {
        let mut seen = Vec::new();
        walk_method(method, &ConstantPool::default(), |instruction, interpreter| {
            seen.push((instruction.offset, interpreter.depth()));
        });
        seen
    }

    #[test]
    fn walk_resets_stack_at_block_leaders() {
        let method = method_from_code(
            &[
                opcodes::ICONST_1,
                opcodes::ICONST_2,
                opcodes::GOTO,
                0x00,
                0x03,
                opcodes::ICONST_3,
                opcodes::POP,
            ],
            Vec::new(),
        );

        assert_eq!(vec![(0, 0), (1, 1), (2, 2), (5, 0), (6, 1)], depths(&method));
    }

    #[test]
    fn walk_seeds_handler_with_caught_exception() {
        let method = method_from_code(
            &[opcodes::ICONST_1, opcodes::IRETURN, opcodes::ATHROW],
            vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 2,
                catch_type: Some("java/io/IOException".to_string()),
            }],
        );
        let mut handler_top = None;

        walk_method(&method, &ConstantPool::default(), |instruction, interpreter| {
            if instruction.offset == 2 {
                handler_top = interpreter
                    .item_at(0)
                    .map(|value| value.signature().to_string());
            }
        });

        assert_eq!(Some("Ljava/io/IOException;".to_string()), handler_top);
    }

    #[test]
    fn walk_exposes_folded_constants() {
        let method = method_from_code(
            &[opcodes::ICONST_3, opcodes::ICONST_4, opcodes::IADD, opcodes::IRETURN],
            Vec::new(),
        );
        let mut returned = None;

        walk_method(&method, &ConstantPool::default(), |instruction, interpreter| {
            if instruction.opcode == opcodes::IRETURN {
                returned = interpreter
                    .item_at(0)
                    .and_then(|value| value.constant_value().cloned());
            }
        });

        assert_eq!(Some(Constant::Int(7)), returned);
    }

    #[test]
    fn shared_handler_entry_falls_back_to_throwable() {
        let handler = |catch_type: &str| ExceptionHandler {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 1,
            catch_type: Some(catch_type.to_string()),
        };
        let method = method_from_code(
            &[opcodes::RETURN, opcodes::ATHROW],
            vec![handler("java/io/IOException"), handler("java/lang/IllegalStateException")],
        );

        assert_eq!(Some(&None), handler_entries(&method).get(&1));
    }

    #[test]
    fn with_rules_rejects_unknown_ids() {
        assert!(Engine::with_rules(&["NO_SUCH_RULE".to_string()]).is_err());

        let engine = Engine::with_rules(&["DIVIDE_BY_ZERO".to_string()]).expect("known rule");
        let ids = engine
            .rule_metadata()
            .into_iter()
            .map(|metadata| metadata.id)
            .collect::<Vec<_>>();
        assert_eq!(vec!["DIVIDE_BY_ZERO"], ids);
    }

    #[test]
    fn trace_writes_one_json_line_per_instruction() {
        let mut method =
            method_from_code(&[opcodes::ICONST_2, opcodes::IRETURN], Vec::new());
        method.name = "answer".to_string();
        let class = Class {
            name: "com/example/App".to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            is_interface: false,
            constant_pool: ConstantPool::default(),
            methods: vec![method],
            artifact_index: 0,
        };
        let context = build_context(vec![class], Vec::new());
        let mut out = Vec::new();

        let traced = trace_method(&context, "answer", &mut out).expect("trace");

        assert_eq!(1, traced);
        let text = String::from_utf8(out).expect("utf8");
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(2, lines.len());
        let second: serde_json::Value = serde_json::from_str(lines[1]).expect("json line");
        assert_eq!("ireturn", second["opcode"]);
        assert_eq!("I", second["stack"][0]["signature"]);
    }
}

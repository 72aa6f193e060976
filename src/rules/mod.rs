use anyhow::Result;
use serde_sarif::sarif::{
    ArtifactLocation, Location, LogicalLocation, Message, PhysicalLocation, Result as SarifResult,
};

use crate::engine::{AnalysisContext, TypeContext};
use crate::ir::{Class, Method};

pub(crate) mod divide_by_zero;
pub(crate) mod impossible_cast;
pub(crate) mod null_receiver;

/// Metadata describing an analysis rule.
#[derive(Clone, Debug)]
pub struct RuleMetadata {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// Rule interface for analysis execution.
pub trait Rule {
    fn metadata(&self) -> RuleMetadata;
    fn run(&self, context: &AnalysisContext, types: &mut TypeContext) -> Result<Vec<SarifResult>>;
}

/// Every rule, in reporting order.
pub fn all_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(divide_by_zero::DivideByZeroRule),
        Box::new(null_receiver::NullReceiverRule),
        Box::new(impossible_cast::ImpossibleCastRule),
    ]
}

/// Location of a method inside the artifact its class was read from.
pub(crate) fn method_location(class: &Class, method: &Method) -> Location {
    let logical = method_logical_location(&class.name, &method.name, &method.descriptor);
    let physical = PhysicalLocation::builder()
        .artifact_location(ArtifactLocation::builder().index(class.artifact_index).build())
        .build();
    Location::builder()
        .physical_location(physical)
        .logical_locations(vec![logical])
        .build()
}

pub(crate) fn method_logical_location(
    class_name: &str,
    method_name: &str,
    descriptor: &str,
) -> LogicalLocation {
    LogicalLocation::builder()
        .name(format!("{class_name}.{method_name}{descriptor}"))
        .kind("function")
        .build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

/// Result anchored at a method, naming the bytecode offset in the message.
pub(crate) fn method_result(
    class: &Class,
    method: &Method,
    offset: u32,
    text: impl Into<String>,
) -> SarifResult {
    let message = result_message(format!("{} (offset {})", text.into(), offset));
    let location = method_location(class, method);
    SarifResult::builder()
        .message(message)
        .locations(vec![location])
        .build()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::constant_pool::ConstantPool;
    use crate::engine::build_context;
    use crate::engine::tests::method_from_code;

    pub(crate) fn class_with_code(name: &str, pool: ConstantPool, code: &[u8]) -> Class {
        Class {
            name: name.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            is_interface: false,
            constant_pool: pool,
            methods: vec![method_from_code(code, Vec::new())],
            artifact_index: 0,
        }
    }

    pub(crate) fn library_class(name: &str, super_name: &str, interfaces: &[&str]) -> Class {
        Class {
            name: name.to_string(),
            super_name: Some(super_name.to_string()),
            interfaces: interfaces.iter().map(|name| name.to_string()).collect(),
            is_interface: false,
            constant_pool: ConstantPool::default(),
            methods: Vec::new(),
            artifact_index: 0,
        }
    }

    pub(crate) fn run_rule(
        rule: &dyn Rule,
        classes: Vec<Class>,
        library_classes: Vec<Class>,
    ) -> Vec<SarifResult> {
        let context = build_context(classes, library_classes);
        let mut types = TypeContext::new(context.class_resolver());
        rule.run(&context, &mut types).expect("rule run")
    }

    pub(crate) fn messages(results: &[SarifResult]) -> Vec<String> {
        results
            .iter()
            .filter_map(|result| result.message.text.clone())
            .collect()
    }

    #[test]
    fn method_result_points_at_method() {
        let mut class = class_with_code("com/example/App", ConstantPool::default(), &[0xb1]);
        class.artifact_index = 3;
        let result = method_result(&class, &class.methods[0], 7, "Something odd");

        assert_eq!(
            Some("Something odd (offset 7)".to_string()),
            result.message.text
        );
        let name = result
            .locations
            .as_ref()
            .and_then(|locations| locations.first())
            .and_then(|location| location.logical_locations.as_ref())
            .and_then(|logical| logical.first())
            .and_then(|logical| logical.name.clone());
        assert_eq!(Some("com/example/App.run()V".to_string()), name);
        let artifact_index = result
            .locations
            .as_ref()
            .and_then(|locations| locations.first())
            .and_then(|location| location.physical_location.as_ref())
            .and_then(|physical| physical.artifact_location.as_ref())
            .and_then(|artifact| artifact.index);
        assert_eq!(Some(3), artifact_index);
    }
}

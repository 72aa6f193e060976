use anyhow::{Context, Result};
use jclassfile::attributes::{Attribute, ExceptionRecord};
use jclassfile::class_file::{self, ClassFlags};
use jclassfile::methods::MethodInfo;

use crate::constant_pool::ConstantPool;
use crate::ir::{Class, ExceptionHandler, LocalVariable, LocalVariableTable, Method};
use crate::scan::decode_instructions;

/// Parse a class file into the IR consumed by the analysis engines.
///
/// Fields and class-level attributes are skipped. Methods keep their decoded
/// instructions, exception table and local variable table; methods without a
/// `Code` attribute get an empty body.
pub fn parse_class(data: &[u8]) -> Result<Class> {
    let parsed = class_file::parse(data).context("invalid class file")?;
    let constant_pool = ConstantPool::from_class_file(parsed.constant_pool());

    let name = constant_pool
        .require_class_name(parsed.this_class())
        .context("resolve class name")?
        .to_string();
    let super_name = if parsed.super_class() == 0 {
        None
    } else {
        Some(
            constant_pool
                .require_class_name(parsed.super_class())
                .context("resolve super class name")?
                .to_string(),
        )
    };
    let mut interfaces = Vec::new();
    for interface in parsed.interfaces() {
        interfaces.push(
            constant_pool
                .require_class_name(*interface)
                .context("resolve interface name")?
                .to_string(),
        );
    }

    let mut methods = Vec::new();
    for method in parsed.methods() {
        methods.push(
            parse_method(method, &constant_pool)
                .with_context(|| format!("read method of {}", name))?,
        );
    }

    Ok(Class {
        name,
        super_name,
        interfaces,
        is_interface: parsed.access_flags().contains(ClassFlags::ACC_INTERFACE),
        constant_pool,
        methods,
        artifact_index: 0,
    })
}

fn parse_method(method: &MethodInfo, pool: &ConstantPool) -> Result<Method> {
    let name = pool
        .require_utf8(method.name_index())
        .context("resolve method name")?
        .to_string();
    let descriptor = pool
        .require_utf8(method.descriptor_index())
        .context("resolve method descriptor")?
        .to_string();

    let code = method
        .attributes()
        .iter()
        .find_map(|attribute| match attribute {
            Attribute::Code {
                code,
                exception_table,
                attributes,
                ..
            } => Some((code, exception_table, attributes)),
            _ => None,
        });
    let Some((code, exception_table, code_attributes)) = code else {
        return Ok(Method {
            name,
            descriptor,
            instructions: Vec::new(),
            exception_handlers: Vec::new(),
            local_variables: LocalVariableTable::default(),
        });
    };

    let instructions = decode_instructions(code)
        .with_context(|| format!("decode {}{}", name, descriptor))?;
    let exception_handlers =
        parse_exception_handlers(exception_table, pool).context("parse handlers")?;
    let local_variables =
        parse_local_variables(code_attributes, pool).context("parse local variables")?;

    Ok(Method {
        name,
        descriptor,
        instructions,
        exception_handlers,
        local_variables,
    })
}

fn parse_exception_handlers(
    table: &[ExceptionRecord],
    pool: &ConstantPool,
) -> Result<Vec<ExceptionHandler>> {
    let mut handlers = Vec::new();
    for entry in table {
        let catch_type = if entry.catch_type() == 0 {
            None
        } else {
            Some(
                pool.require_class_name(entry.catch_type())
                    .context("resolve catch type")?
                    .to_string(),
            )
        };
        handlers.push(ExceptionHandler {
            start_pc: entry.start_pc() as u32,
            end_pc: entry.end_pc() as u32,
            handler_pc: entry.handler_pc() as u32,
            catch_type,
        });
    }
    Ok(handlers)
}

fn parse_local_variables(
    attributes: &[Attribute],
    pool: &ConstantPool,
) -> Result<LocalVariableTable> {
    let mut entries = Vec::new();
    for attribute in attributes {
        let Attribute::LocalVariableTable {
            local_variable_table,
        } = attribute
        else {
            continue;
        };
        for record in local_variable_table {
            entries.push(LocalVariable {
                start_pc: record.start_pc() as u32,
                length: record.length() as u32,
                name: pool.require_utf8(record.name_index())?.to_string(),
                signature: pool.require_utf8(record.descriptor_index())?.to_string(),
                index: record.index(),
            });
        }
    }
    Ok(LocalVariableTable::new(entries))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::interpreter::{ConstantPoolView, Loadable};
    use crate::ir::Operands;
    use crate::opcodes;
    use crate::value::Constant;

    fn utf8(out: &mut Vec<u8>, value: &str) {
        out.push(1);
        out.extend((value.len() as u16).to_be_bytes());
        out.extend(value.as_bytes());
    }

    fn class_ref(out: &mut Vec<u8>, name_index: u16) {
        out.push(7);
        out.extend(name_index.to_be_bytes());
    }

    fn attribute(out: &mut Vec<u8>, name_index: u16, body: &[u8]) {
        out.extend(name_index.to_be_bytes());
        out.extend((body.len() as u32).to_be_bytes());
        out.extend(body);
    }

    /// `com/example/Sample extends Object implements Runnable` with one
    /// method `run()J` whose body is `code`.
    pub(crate) fn sample_class_bytes(code: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(0xCAFE_BABEu32.to_be_bytes());
        out.extend(0u16.to_be_bytes());
        out.extend(52u16.to_be_bytes());

        out.extend(15u16.to_be_bytes());
        utf8(&mut out, "com/example/Sample"); // 1
        class_ref(&mut out, 1); // 2
        utf8(&mut out, "java/lang/Object"); // 3
        class_ref(&mut out, 3); // 4
        utf8(&mut out, "run"); // 5
        utf8(&mut out, "()J"); // 6
        utf8(&mut out, "Code"); // 7
        utf8(&mut out, "LocalVariableTable"); // 8
        utf8(&mut out, "this"); // 9
        utf8(&mut out, "Lcom/example/Sample;"); // 10
        out.push(5); // 11 and 12
        out.extend(42i64.to_be_bytes());
        utf8(&mut out, "java/lang/Runnable"); // 13
        class_ref(&mut out, 13); // 14

        out.extend(0x0021u16.to_be_bytes());
        out.extend(2u16.to_be_bytes());
        out.extend(4u16.to_be_bytes());
        out.extend(1u16.to_be_bytes());
        out.extend(14u16.to_be_bytes());
        out.extend(0u16.to_be_bytes());

        let mut locals = Vec::new();
        locals.extend(1u16.to_be_bytes());
        for value in [0u16, code.len() as u16, 9, 10, 0] {
            locals.extend(value.to_be_bytes());
        }

        let mut body = Vec::new();
        body.extend(2u16.to_be_bytes());
        body.extend(1u16.to_be_bytes());
        body.extend((code.len() as u32).to_be_bytes());
        body.extend(code);
        body.extend(1u16.to_be_bytes());
        for value in [0u16, 1, 1, 0] {
            body.extend(value.to_be_bytes());
        }
        body.extend(1u16.to_be_bytes());
        attribute(&mut body, 8, &locals);

        out.extend(1u16.to_be_bytes());
        out.extend(0x0001u16.to_be_bytes());
        out.extend(5u16.to_be_bytes());
        out.extend(6u16.to_be_bytes());
        out.extend(1u16.to_be_bytes());
        attribute(&mut out, 7, &body);

        out.extend(0u16.to_be_bytes());
        out
    }

    #[test]
    fn parse_class_reads_hierarchy_and_code() {
        let code = [opcodes::LDC2_W, 0, 11, opcodes::LRETURN];
        let class = parse_class(&sample_class_bytes(&code)).expect("parse class");

        assert_eq!("com/example/Sample", class.name);
        assert_eq!(Some("java/lang/Object".to_string()), class.super_name);
        assert_eq!(vec!["java/lang/Runnable".to_string()], class.interfaces);
        assert!(!class.is_interface);

        let method = &class.methods[0];
        assert_eq!("run", method.name);
        assert_eq!("()J", method.descriptor);
        assert_eq!(2, method.instructions.len());
        assert_eq!(Operands::Pool(11), method.instructions[0].operands);
        assert_eq!(3, method.instructions[1].offset);
        assert_eq!(None, method.exception_handlers[0].catch_type);
        assert_eq!(
            Some("Lcom/example/Sample;"),
            method.local_variables.signature_at(0, 0)
        );
        assert!(matches!(
            class.constant_pool.loadable(11),
            Some(Loadable::Constant(Constant::Long(42)))
        ));
    }

    #[test]
    fn parse_class_rejects_bad_magic() {
        let mut data = sample_class_bytes(&[opcodes::RETURN]);
        data[0] = 0;

        assert!(parse_class(&data).is_err());
    }

    #[test]
    fn parse_class_rejects_truncated_data() {
        let data = sample_class_bytes(&[opcodes::RETURN]);

        assert!(parse_class(&data[..data.len() - 3]).is_err());
    }
}

use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// Stack-relevant facts of a method descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MethodDescriptorSummary {
    pub param_count: usize,
    /// Return signature, `None` for `V`.
    pub return_signature: Option<String>,
    pub reference_params: Vec<bool>,
}

pub fn method_descriptor_summary(descriptor: &str) -> Result<MethodDescriptorSummary> {
    let parsed = MethodDescriptor::from_str(descriptor)
        .with_context(|| format!("parse method descriptor {descriptor}"))?;
    let (_, return_part) = descriptor
        .rsplit_once(')')
        .with_context(|| format!("missing return type in {descriptor}"))?;
    let return_signature = if return_part == "V" {
        None
    } else {
        Some(return_part.to_string())
    };
    let reference_params = parsed
        .parameter_types()
        .iter()
        .map(is_reference_type)
        .collect::<Vec<_>>();
    Ok(MethodDescriptorSummary {
        param_count: reference_params.len(),
        return_signature,
        reference_params,
    })
}

pub fn method_param_count(descriptor: &str) -> Result<usize> {
    Ok(method_descriptor_summary(descriptor)?.param_count)
}

fn is_reference_type(ty: &TypeDescriptor) -> bool {
    matches!(ty, TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _))
}

/// Convert an internal class name or array descriptor to a field signature.
///
/// Class constants name arrays by their descriptor (`[I`) and classes by
/// their internal name (`java/lang/String`).
pub fn class_name_to_signature(name: &str) -> String {
    if name.starts_with('[') {
        name.to_string()
    } else {
        format!("L{name};")
    }
}

/// Array signature for a `NEWARRAY` element type code.
pub fn primitive_array_signature(type_code: u8) -> Option<&'static str> {
    let signature = match type_code {
        4 => "[Z",
        5 => "[C",
        6 => "[F",
        7 => "[D",
        8 => "[B",
        9 => "[S",
        10 => "[I",
        11 => "[J",
        _ => return None,
    };
    Some(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_parameters_and_return() {
        let summary =
            method_descriptor_summary("(IJLjava/lang/String;[D)Ljava/lang/Object;").expect("parse");

        assert_eq!(4, summary.param_count);
        assert_eq!(vec![false, false, true, true], summary.reference_params);
        assert_eq!(
            Some("Ljava/lang/Object;".to_string()),
            summary.return_signature
        );
    }

    #[test]
    fn void_return_has_no_signature() {
        let summary = method_descriptor_summary("()V").expect("parse");

        assert_eq!(0, summary.param_count);
        assert_eq!(None, summary.return_signature);
    }

    #[test]
    fn class_names_become_signatures() {
        assert_eq!("Ljava/lang/String;", class_name_to_signature("java/lang/String"));
        assert_eq!("[I", class_name_to_signature("[I"));
        assert_eq!(Some("[J"), primitive_array_signature(11));
        assert_eq!(None, primitive_array_signature(3));
    }
}

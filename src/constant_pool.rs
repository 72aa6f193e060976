use anyhow::{Context, Result};
use jclassfile::constant_pool::ConstantPool as RawEntry;

use crate::interpreter::{ConstantPoolView, Loadable, MemberRef};
use crate::value::Constant;

/// Constant pool entry with the cross references the analysis follows.
#[derive(Clone, Debug, PartialEq)]
pub enum PoolEntry {
    /// Index 0, the second slot of long/double entries, and entries the
    /// analysis never reads.
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle,
    MethodType,
    Dynamic { name_and_type_index: u16 },
    InvokeDynamic { name_and_type_index: u16 },
}

impl From<&RawEntry> for PoolEntry {
    fn from(raw: &RawEntry) -> Self {
        match raw {
            RawEntry::Utf8 { value } => PoolEntry::Utf8(value.clone()),
            RawEntry::Integer { value } => PoolEntry::Integer(*value),
            RawEntry::Float { value } => PoolEntry::Float(*value),
            RawEntry::Long { value } => PoolEntry::Long(*value),
            RawEntry::Double { value } => PoolEntry::Double(*value),
            RawEntry::Class { name_index } => PoolEntry::Class {
                name_index: *name_index,
            },
            RawEntry::String { string_index } => PoolEntry::String {
                string_index: *string_index,
            },
            RawEntry::Fieldref {
                class_index,
                name_and_type_index,
            } => PoolEntry::Fieldref {
                class_index: *class_index,
                name_and_type_index: *name_and_type_index,
            },
            RawEntry::Methodref {
                class_index,
                name_and_type_index,
            } => PoolEntry::Methodref {
                class_index: *class_index,
                name_and_type_index: *name_and_type_index,
            },
            RawEntry::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => PoolEntry::InterfaceMethodref {
                class_index: *class_index,
                name_and_type_index: *name_and_type_index,
            },
            RawEntry::NameAndType {
                name_index,
                descriptor_index,
            } => PoolEntry::NameAndType {
                name_index: *name_index,
                descriptor_index: *descriptor_index,
            },
            RawEntry::MethodHandle { .. } => PoolEntry::MethodHandle,
            RawEntry::MethodType { .. } => PoolEntry::MethodType,
            RawEntry::Dynamic {
                name_and_type_index,
                ..
            } => PoolEntry::Dynamic {
                name_and_type_index: *name_and_type_index,
            },
            RawEntry::InvokeDynamic {
                name_and_type_index,
                ..
            } => PoolEntry::InvokeDynamic {
                name_and_type_index: *name_and_type_index,
            },
            _ => PoolEntry::Unusable,
        }
    }
}

/// Indexed constant pool of one class.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<PoolEntry>,
}

impl ConstantPool {
    /// Build a pool from entries starting at index 1.
    pub fn from_entries(entries: Vec<PoolEntry>) -> Self {
        let mut all = Vec::with_capacity(entries.len() + 1);
        all.push(PoolEntry::Unusable);
        all.extend(entries);
        Self { entries: all }
    }

    /// Pool of a class parsed by jclassfile, whose entries keep their
    /// class file indices.
    pub fn from_class_file(raw: &[RawEntry]) -> Self {
        Self {
            entries: raw.iter().map(PoolEntry::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Option<&PoolEntry> {
        self.entries.get(index as usize)
    }

    pub fn utf8(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            PoolEntry::Utf8(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Class name as required by the caller, with context on failure.
    pub fn require_class_name(&self, index: u16) -> Result<&str> {
        self.class_name(index)
            .with_context(|| format!("missing class entry at constant pool index {}", index))
    }

    pub fn require_utf8(&self, index: u16) -> Result<&str> {
        self.utf8(index)
            .with_context(|| format!("missing utf8 entry at constant pool index {}", index))
    }

    fn name_and_type(&self, index: u16) -> Option<(&str, &str)> {
        match self.get(index)? {
            PoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => Some((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => None,
        }
    }
}

impl ConstantPoolView for ConstantPool {
    fn loadable(&self, index: u16) -> Option<Loadable<'_>> {
        let loadable = match self.get(index)? {
            PoolEntry::Integer(value) => Loadable::Constant(Constant::Int(*value)),
            PoolEntry::Float(value) => Loadable::Constant(Constant::Float(*value)),
            PoolEntry::Long(value) => Loadable::Constant(Constant::Long(*value)),
            PoolEntry::Double(value) => Loadable::Constant(Constant::Double(*value)),
            PoolEntry::String { string_index } => {
                Loadable::Constant(Constant::String(self.utf8(*string_index)?.to_string()))
            }
            PoolEntry::Class { name_index } => Loadable::Class(self.utf8(*name_index)?),
            PoolEntry::MethodType => Loadable::MethodType,
            PoolEntry::MethodHandle => Loadable::MethodHandle,
            PoolEntry::Dynamic {
                name_and_type_index,
            } => Loadable::Dynamic(self.name_and_type(*name_and_type_index)?.1),
            _ => return None,
        };
        Some(loadable)
    }

    fn class_name(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            PoolEntry::Class { name_index } => self.utf8(*name_index),
            _ => None,
        }
    }

    fn member(&self, index: u16) -> Option<MemberRef<'_>> {
        let (class_index, name_and_type_index) = match self.get(index)? {
            PoolEntry::Fieldref {
                class_index,
                name_and_type_index,
            }
            | PoolEntry::Methodref {
                class_index,
                name_and_type_index,
            }
            | PoolEntry::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            _ => return None,
        };
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Some(MemberRef {
            owner: self.class_name(class_index)?,
            name,
            descriptor,
        })
    }

    fn dynamic_descriptor(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            PoolEntry::InvokeDynamic {
                name_and_type_index,
            } => Some(self.name_and_type(*name_and_type_index)?.1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_class_file_keeps_indices_and_references() {
        let raw = vec![
            RawEntry::Utf8 {
                value: String::new(),
            },
            RawEntry::Integer { value: -7 },
            RawEntry::Utf8 {
                value: "abc".to_string(),
            },
            RawEntry::String { string_index: 2 },
            RawEntry::Class { name_index: 2 },
        ];

        let pool = ConstantPool::from_class_file(&raw);

        assert_eq!(5, pool.len());
        assert_eq!(Some(&PoolEntry::Integer(-7)), pool.get(1));
        assert_eq!(Some("abc"), pool.utf8(2));
        assert_eq!(
            Some(Loadable::Constant(Constant::String("abc".to_string()))),
            pool.loadable(3)
        );
        assert_eq!(Some("abc"), pool.class_name(4));
        assert!(pool.get(5).is_none());
    }

    #[test]
    fn unusable_entries_load_nothing() {
        let pool = ConstantPool::from_entries(vec![PoolEntry::Long(3), PoolEntry::Unusable]);

        assert_eq!(
            Some(Loadable::Constant(Constant::Long(3))),
            pool.loadable(1)
        );
        assert_eq!(None, pool.loadable(2));
        assert_eq!(None, pool.loadable(0));
    }

    #[test]
    fn member_resolves_owner_name_and_descriptor() {
        let pool = ConstantPool::from_entries(vec![
            PoolEntry::Utf8("java/io/PrintStream".to_string()),
            PoolEntry::Class { name_index: 1 },
            PoolEntry::Utf8("println".to_string()),
            PoolEntry::Utf8("(I)V".to_string()),
            PoolEntry::NameAndType {
                name_index: 3,
                descriptor_index: 4,
            },
            PoolEntry::Methodref {
                class_index: 2,
                name_and_type_index: 5,
            },
        ]);

        let member = pool.member(6).expect("method ref");

        assert_eq!("java/io/PrintStream", member.owner);
        assert_eq!("println", member.name);
        assert_eq!("(I)V", member.descriptor);
        assert!(pool.member(2).is_none());
        assert_eq!(Some(Loadable::Class("java/io/PrintStream")), pool.loadable(2));
    }
}

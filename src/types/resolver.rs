use std::collections::BTreeMap;

use log::debug;
use thiserror::Error;

use crate::ir::Class;

/// A class whose hierarchy facts could not be obtained.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("class not found: {class_name}")]
pub struct ClassNotFoundError {
    pub class_name: String,
}

impl ClassNotFoundError {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
        }
    }
}

/// Direct hierarchy facts of one class, by internal (slashed) name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResolvedClass {
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
}

impl ResolvedClass {
    pub fn class(superclass: &str, interfaces: &[&str]) -> Self {
        Self {
            superclass: Some(superclass.to_string()),
            interfaces: interfaces.iter().map(|name| name.to_string()).collect(),
            is_interface: false,
        }
    }

    pub fn interface(extends: &[&str]) -> Self {
        Self {
            superclass: None,
            interfaces: extends.iter().map(|name| name.to_string()).collect(),
            is_interface: true,
        }
    }
}

/// Supplies the direct superclass and interfaces of a class on demand.
///
/// Implementations may perform I/O; the repository calls `resolve` at most
/// once per class.
pub trait ClassResolver {
    fn resolve(&mut self, class_name: &str) -> Result<ResolvedClass, ClassNotFoundError>;
}

/// Core JDK types that analysed code nearly always reaches.
const JDK_CORE: &[(&str, Option<&str>, &[&str], bool)] = &[
    ("java/io/Serializable", None, &[], true),
    ("java/lang/Cloneable", None, &[], true),
    ("java/lang/Comparable", None, &[], true),
    ("java/lang/CharSequence", None, &[], true),
    ("java/lang/Iterable", None, &[], true),
    ("java/lang/Runnable", None, &[], true),
    ("java/lang/AutoCloseable", None, &[], true),
    ("java/io/Closeable", None, &["java/lang/AutoCloseable"], true),
    ("java/util/Collection", None, &["java/lang/Iterable"], true),
    ("java/util/List", None, &["java/util/Collection"], true),
    ("java/util/Set", None, &["java/util/Collection"], true),
    ("java/util/Map", None, &[], true),
    (
        "java/lang/String",
        Some("java/lang/Object"),
        &[
            "java/io/Serializable",
            "java/lang/Comparable",
            "java/lang/CharSequence",
        ],
        false,
    ),
    (
        "java/lang/Number",
        Some("java/lang/Object"),
        &["java/io/Serializable"],
        false,
    ),
    (
        "java/lang/Integer",
        Some("java/lang/Number"),
        &["java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Long",
        Some("java/lang/Number"),
        &["java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Short",
        Some("java/lang/Number"),
        &["java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Byte",
        Some("java/lang/Number"),
        &["java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Float",
        Some("java/lang/Number"),
        &["java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Double",
        Some("java/lang/Number"),
        &["java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Boolean",
        Some("java/lang/Object"),
        &["java/io/Serializable", "java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Character",
        Some("java/lang/Object"),
        &["java/io/Serializable", "java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Class",
        Some("java/lang/Object"),
        &["java/io/Serializable"],
        false,
    ),
    (
        "java/lang/Throwable",
        Some("java/lang/Object"),
        &["java/io/Serializable"],
        false,
    ),
    ("java/lang/Exception", Some("java/lang/Throwable"), &[], false),
    ("java/lang/Error", Some("java/lang/Throwable"), &[], false),
    (
        "java/lang/RuntimeException",
        Some("java/lang/Exception"),
        &[],
        false,
    ),
];

/// Resolver backed by classes found on the analysis classpath.
#[derive(Clone, Debug, Default)]
pub struct ClasspathResolver {
    classes: BTreeMap<String, ResolvedClass>,
    resolutions: usize,
}

impl ClasspathResolver {
    /// Resolver that knows nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver seeded with core JDK hierarchy facts.
    pub fn with_jdk_core() -> Self {
        let mut resolver = Self::new();
        for (name, superclass, interfaces, is_interface) in JDK_CORE {
            resolver.insert(
                *name,
                ResolvedClass {
                    superclass: superclass.map(str::to_string),
                    interfaces: interfaces.iter().map(|name| name.to_string()).collect(),
                    is_interface: *is_interface,
                },
            );
        }
        resolver
    }

    /// JDK core facts plus every scanned class; scanned classes win.
    pub fn from_classes<'a>(classes: impl IntoIterator<Item = &'a Class>) -> Self {
        let mut resolver = Self::with_jdk_core();
        for class in classes {
            resolver.insert(
                class.name.clone(),
                ResolvedClass {
                    superclass: class.super_name.clone(),
                    interfaces: class.interfaces.clone(),
                    is_interface: class.is_interface,
                },
            );
        }
        resolver
    }

    pub fn insert(&mut self, name: impl Into<String>, class: ResolvedClass) {
        self.classes.insert(name.into(), class);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Number of `resolve` calls served so far, failed ones included.
    pub fn resolution_count(&self) -> usize {
        self.resolutions
    }
}

impl ClassResolver for ClasspathResolver {
    fn resolve(&mut self, class_name: &str) -> Result<ResolvedClass, ClassNotFoundError> {
        self.resolutions += 1;
        match self.classes.get(class_name) {
            Some(class) => Ok(class.clone()),
            None => {
                debug!("class {} is not on the classpath", class_name);
                Err(ClassNotFoundError::new(class_name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jdk_core_knows_string_hierarchy() {
        let mut resolver = ClasspathResolver::with_jdk_core();

        let string = resolver.resolve("java/lang/String").expect("resolve String");

        assert_eq!(Some("java/lang/Object".to_string()), string.superclass);
        assert!(string.interfaces.contains(&"java/lang/CharSequence".to_string()));
        assert!(!string.is_interface);
        assert_eq!(1, resolver.resolution_count());
    }

    #[test]
    fn unknown_class_fails_with_its_name() {
        let mut resolver = ClasspathResolver::new();

        let err = resolver.resolve("com/example/Missing").expect_err("missing class");

        assert_eq!("com/example/Missing", err.class_name);
        assert_eq!("class not found: com/example/Missing", err.to_string());
    }

    #[test]
    fn scanned_classes_override_seeded_facts() {
        let mut resolver = ClasspathResolver::with_jdk_core();
        resolver.insert(
            "java/lang/Number",
            ResolvedClass::class("java/lang/Object", &[]),
        );

        let number = resolver.resolve("java/lang/Number").expect("resolve Number");

        assert!(number.interfaces.is_empty());
    }
}

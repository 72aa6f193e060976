//! Flyweight type repository and lazily resolved inheritance graph.
//!
//! Every type is interned once per signature and addressed by a [`TypeId`].
//! Class hierarchy facts are pulled from a [`ClassResolver`] the first time a
//! subtype query needs them. A failed resolution is cached on the node and
//! never retried.
//!
//! [`TypeRepository::is_subtype`] is lenient: classes that cannot be resolved
//! are recorded in the query's missing-class list and the answer is the best
//! one available from the rest of the graph. Direct hierarchy accessors such
//! as [`TypeRepository::get_superclass`] report the failure instead.

mod graph;
mod resolver;

use std::collections::{BTreeSet, HashMap, VecDeque};

use log::debug;
use thiserror::Error;

pub use graph::{Edge, EdgeKind, InheritanceGraph};
pub use resolver::{ClassNotFoundError, ClassResolver, ClasspathResolver, ResolvedClass};

pub const OBJECT_CLASS: &str = "java/lang/Object";
pub const SERIALIZABLE_CLASS: &str = "java/io/Serializable";
pub const CLONEABLE_CLASS: &str = "java/lang/Cloneable";

/// Handle of an interned type. Equal ids mean equal types.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BasicType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl BasicType {
    pub fn from_code(code: char) -> Option<Self> {
        let basic = match code {
            'Z' => BasicType::Boolean,
            'B' => BasicType::Byte,
            'C' => BasicType::Char,
            'S' => BasicType::Short,
            'I' => BasicType::Int,
            'J' => BasicType::Long,
            'F' => BasicType::Float,
            'D' => BasicType::Double,
            'V' => BasicType::Void,
            _ => return None,
        };
        Some(basic)
    }

    pub fn code(self) -> char {
        match self {
            BasicType::Boolean => 'Z',
            BasicType::Byte => 'B',
            BasicType::Char => 'C',
            BasicType::Short => 'S',
            BasicType::Int => 'I',
            BasicType::Long => 'J',
            BasicType::Float => 'F',
            BasicType::Double => 'D',
            BasicType::Void => 'V',
        }
    }
}

/// Structure of an interned type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Type {
    Basic(BasicType),
    /// Class or interface, by internal (slashed) name.
    Class { name: String },
    /// Array with a non-array element type.
    Array { dimensions: u32, element: TypeId },
}

/// Whether a node's direct supertypes are available.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resolution {
    Unresolved,
    Known,
    Failed(ClassNotFoundError),
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid type signature {0:?}")]
pub struct SignatureError(pub String);

/// Ancestors of one subtype, computed by the first query against it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubtypeQueryResult {
    ancestors: BTreeSet<TypeId>,
    missing_classes: Vec<String>,
}

impl SubtypeQueryResult {
    pub fn contains(&self, ty: TypeId) -> bool {
        self.ancestors.contains(&ty)
    }

    /// Every type reached from the subtype, the subtype included.
    pub fn ancestors(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.ancestors.iter().copied()
    }

    /// Classes that failed to resolve during the search, in visit order.
    pub fn missing_classes(&self) -> &[String] {
        &self.missing_classes
    }
}

#[derive(Clone, Debug)]
struct Node {
    ty: Type,
    signature: String,
    resolution: Resolution,
    is_interface: Option<bool>,
    query: Option<SubtypeQueryResult>,
}

/// Interned types plus the inheritance graph connecting them.
///
/// One repository serves a whole analysis session and only grows. Queries
/// take `&mut self` because they may resolve classes and cache results; share
/// it across threads only behind a lock.
#[derive(Clone, Debug)]
pub struct TypeRepository {
    nodes: Vec<Node>,
    by_signature: HashMap<String, TypeId>,
    graph: InheritanceGraph,
    object: TypeId,
}

impl Default for TypeRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRepository {
    /// Repository holding only `java.lang.Object`, which is the root and
    /// needs no resolution.
    pub fn new() -> Self {
        let mut repository = Self {
            nodes: Vec::new(),
            by_signature: HashMap::new(),
            graph: InheritanceGraph::new(),
            object: TypeId(0),
        };
        let object = repository.class_type_from_name(OBJECT_CLASS);
        let node = &mut repository.nodes[object.index()];
        node.resolution = Resolution::Known;
        node.is_interface = Some(false);
        repository.object = object;
        repository
    }

    pub fn object_type(&self) -> TypeId {
        self.object
    }

    /// Number of interned types.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn graph(&self) -> &InheritanceGraph {
        &self.graph
    }

    pub fn lookup(&self, signature: &str) -> Option<TypeId> {
        self.by_signature.get(signature).copied()
    }

    pub fn get_type(&self, id: TypeId) -> &Type {
        &self.nodes[id.index()].ty
    }

    pub fn signature(&self, id: TypeId) -> &str {
        &self.nodes[id.index()].signature
    }

    pub fn resolution(&self, id: TypeId) -> &Resolution {
        &self.nodes[id.index()].resolution
    }

    /// Class-vs-interface, known once the class is resolved. Arrays and
    /// basic types are never interfaces.
    pub fn is_interface(&self, id: TypeId) -> Option<bool> {
        match self.nodes[id.index()].ty {
            Type::Class { .. } => self.nodes[id.index()].is_interface,
            Type::Array { .. } | Type::Basic(_) => Some(false),
        }
    }

    /// Record class-vs-interface for a class whose links are added by hand.
    pub fn mark_interface(&mut self, id: TypeId, is_interface: bool) {
        self.nodes[id.index()].is_interface = Some(is_interface);
    }

    /// Cached result of the first [`is_subtype`](Self::is_subtype) query
    /// against `sub`.
    pub fn subtype_query_result(&self, sub: TypeId) -> Option<&SubtypeQueryResult> {
        self.nodes[sub.index()].query.as_ref()
    }

    /// Class or interface type for a slashed internal name.
    pub fn class_type_from_name(&mut self, name: &str) -> TypeId {
        let signature = format!("L{name};");
        self.intern(signature, || Type::Class {
            name: name.to_string(),
        })
    }

    /// Class or interface type for a dotted binary name.
    pub fn class_type_from_dotted_name(&mut self, name: &str) -> TypeId {
        self.class_type_from_name(&name.replace('.', "/"))
    }

    pub fn array_type_from_signature(&mut self, signature: &str) -> Result<TypeId, SignatureError> {
        let element_signature = signature.trim_start_matches('[');
        let dimensions = (signature.len() - element_signature.len()) as u32;
        if dimensions == 0 {
            return Err(SignatureError(signature.to_string()));
        }
        let element = self.element_type_from_signature(element_signature)?;
        Ok(self.array_type_from_dimensions_and_element(dimensions, element))
    }

    /// Array of `dimensions` over `element`. An array element is flattened
    /// into its own base type, and zero dimensions yield `element` itself.
    pub fn array_type_from_dimensions_and_element(
        &mut self,
        dimensions: u32,
        element: TypeId,
    ) -> TypeId {
        let (dimensions, element) = match self.nodes[element.index()].ty {
            Type::Array {
                dimensions: inner,
                element: base,
            } => (dimensions + inner, base),
            _ => (dimensions, element),
        };
        if dimensions == 0 {
            return element;
        }
        let signature = format!(
            "{}{}",
            "[".repeat(dimensions as usize),
            self.nodes[element.index()].signature
        );
        self.intern(signature, || Type::Array {
            dimensions,
            element,
        })
    }

    pub fn basic_type_from_signature(&mut self, signature: &str) -> Result<TypeId, SignatureError> {
        let mut chars = signature.chars();
        let basic = match (chars.next(), chars.next()) {
            (Some(code), None) => BasicType::from_code(code),
            _ => None,
        }
        .ok_or_else(|| SignatureError(signature.to_string()))?;
        Ok(self.intern(signature.to_string(), || Type::Basic(basic)))
    }

    /// Any field signature, or `V`.
    pub fn type_from_signature(&mut self, signature: &str) -> Result<TypeId, SignatureError> {
        if signature.starts_with('[') {
            self.array_type_from_signature(signature)
        } else if signature == "V" {
            self.basic_type_from_signature(signature)
        } else {
            self.element_type_from_signature(signature)
        }
    }

    fn element_type_from_signature(&mut self, signature: &str) -> Result<TypeId, SignatureError> {
        match signature.strip_prefix('L').and_then(|rest| rest.strip_suffix(';')) {
            Some(name) if !name.is_empty() && !name.contains(';') => {
                Ok(self.class_type_from_name(name))
            }
            Some(_) => Err(SignatureError(signature.to_string())),
            None if signature == "V" => Err(SignatureError(signature.to_string())),
            None => self.basic_type_from_signature(signature),
        }
        .map_err(|_| SignatureError(signature.to_string()))
    }

    fn intern(&mut self, signature: String, make: impl FnOnce() -> Type) -> TypeId {
        if let Some(id) = self.by_signature.get(&signature) {
            return *id;
        }
        let id = TypeId(self.nodes.len() as u32);
        let ty = make();
        let resolution = match &ty {
            Type::Basic(_) => Resolution::Known,
            _ => Resolution::Unresolved,
        };
        self.nodes.push(Node {
            ty,
            signature: signature.clone(),
            resolution,
            is_interface: None,
            query: None,
        });
        self.by_signature.insert(signature, id);
        self.graph.add_node(id);
        id
    }

    /// Record `sub extends superclass`. The caller supplies the facts, so
    /// `sub` counts as resolved.
    pub fn add_superclass_link(&mut self, sub: TypeId, superclass: TypeId) {
        self.graph.add_edge(sub, superclass, EdgeKind::Class);
        self.nodes[sub.index()].resolution = Resolution::Known;
    }

    /// Record `sub implements interface`. The caller supplies the facts, so
    /// `sub` counts as resolved.
    pub fn add_interface_link(&mut self, sub: TypeId, interface: TypeId) {
        self.graph.add_edge(sub, interface, EdgeKind::Interface);
        self.nodes[sub.index()].resolution = Resolution::Known;
    }

    /// Whether `sub` is `superclass` or one of its descendants.
    ///
    /// The first query against `sub` walks every ancestor breadth-first and
    /// caches the full ancestor set on `sub`; later queries against `sub`
    /// only test membership. The cache is never invalidated, so links added
    /// after the first query are not seen by it.
    pub fn is_subtype(
        &mut self,
        sub: TypeId,
        superclass: TypeId,
        resolver: &mut dyn ClassResolver,
    ) -> bool {
        if let Some(result) = &self.nodes[sub.index()].query {
            return result.contains(superclass);
        }
        let result = self.search_ancestors(sub, resolver);
        let answer = result.contains(superclass);
        self.nodes[sub.index()].query = Some(result);
        answer
    }

    fn search_ancestors(
        &mut self,
        start: TypeId,
        resolver: &mut dyn ClassResolver,
    ) -> SubtypeQueryResult {
        let mut ancestors = BTreeSet::from([start]);
        let mut missing_classes: Vec<String> = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            if let Err(err) = self.resolve(current, resolver) {
                if !missing_classes.contains(&err.class_name) {
                    missing_classes.push(err.class_name);
                }
                continue;
            }
            let targets = self
                .graph
                .edges(current)
                .iter()
                .map(|edge| edge.target)
                .collect::<Vec<_>>();
            for target in targets {
                if ancestors.insert(target) {
                    queue.push_back(target);
                }
            }
        }
        SubtypeQueryResult {
            ancestors,
            missing_classes,
        }
    }

    /// Unique superclass of `ty`, `None` for `java.lang.Object` and basic
    /// types. Resolution failures are returned, cached ones included.
    pub fn get_superclass(
        &mut self,
        ty: TypeId,
        resolver: &mut dyn ClassResolver,
    ) -> Result<Option<TypeId>, ClassNotFoundError> {
        self.resolve(ty, resolver)?;
        Ok(self.graph.superclass(ty))
    }

    pub fn get_interfaces(
        &mut self,
        ty: TypeId,
        resolver: &mut dyn ClassResolver,
    ) -> Result<Vec<TypeId>, ClassNotFoundError> {
        self.resolve(ty, resolver)?;
        Ok(self.graph.interfaces(ty).collect())
    }

    /// Superclass first, then interfaces.
    pub fn direct_supertypes(
        &mut self,
        ty: TypeId,
        resolver: &mut dyn ClassResolver,
    ) -> Result<Vec<TypeId>, ClassNotFoundError> {
        self.resolve(ty, resolver)?;
        let mut supertypes = self.graph.superclass(ty).into_iter().collect::<Vec<_>>();
        supertypes.extend(self.graph.interfaces(ty));
        Ok(supertypes)
    }

    /// Populate the direct supertypes of `ty` if that has not been tried yet.
    pub fn resolve(
        &mut self,
        ty: TypeId,
        resolver: &mut dyn ClassResolver,
    ) -> Result<(), ClassNotFoundError> {
        match &self.nodes[ty.index()].resolution {
            Resolution::Known => return Ok(()),
            Resolution::Failed(err) => return Err(err.clone()),
            Resolution::Unresolved => {}
        }
        let outcome = match self.nodes[ty.index()].ty.clone() {
            Type::Basic(_) => Ok(()),
            Type::Class { name } => self.resolve_class(ty, &name, resolver),
            Type::Array {
                dimensions,
                element,
            } => self.resolve_array(ty, dimensions, element, resolver),
        };
        let resolution = match &outcome {
            Ok(()) => Resolution::Known,
            Err(err) => {
                debug!("failed to resolve {}: {}", self.signature(ty), err);
                Resolution::Failed(err.clone())
            }
        };
        self.nodes[ty.index()].resolution = resolution;
        outcome
    }

    fn resolve_class(
        &mut self,
        ty: TypeId,
        name: &str,
        resolver: &mut dyn ClassResolver,
    ) -> Result<(), ClassNotFoundError> {
        let class = resolver.resolve(name)?;
        let superclass = match &class.superclass {
            Some(superclass) => self.class_type_from_name(superclass),
            // Interfaces (and anything else lacking a superclass) hang off Object.
            None => self.object,
        };
        if ty != self.object {
            self.graph.add_edge(ty, superclass, EdgeKind::Class);
        }
        for interface in &class.interfaces {
            let interface = self.class_type_from_name(interface);
            self.graph.add_edge(ty, interface, EdgeKind::Interface);
        }
        self.nodes[ty.index()].is_interface = Some(class.is_interface);
        Ok(())
    }

    fn resolve_array(
        &mut self,
        ty: TypeId,
        dimensions: u32,
        element: TypeId,
        resolver: &mut dyn ClassResolver,
    ) -> Result<(), ClassNotFoundError> {
        let object = self.object;
        match self.nodes[element.index()].ty.clone() {
            Type::Basic(_) | Type::Array { .. } => {
                self.graph.add_edge(ty, object, EdgeKind::Class);
            }
            Type::Class { .. } if element == object => {
                let superclass = self.array_type_from_dimensions_and_element(dimensions - 1, element);
                self.graph.add_edge(ty, superclass, EdgeKind::Class);
            }
            Type::Class { .. } => {
                self.resolve(element, resolver)?;
                if let Some(superclass) = self.graph.superclass(element) {
                    let superclass =
                        self.array_type_from_dimensions_and_element(dimensions, superclass);
                    self.graph.add_edge(ty, superclass, EdgeKind::Class);
                }
                let interfaces = self.graph.interfaces(element).collect::<Vec<_>>();
                for interface in interfaces {
                    let interface =
                        self.array_type_from_dimensions_and_element(dimensions, interface);
                    self.graph.add_edge(ty, interface, EdgeKind::Interface);
                }
            }
        }
        let serializable = self.class_type_from_name(SERIALIZABLE_CLASS);
        let cloneable = self.class_type_from_name(CLONEABLE_CLASS);
        self.graph.add_edge(ty, serializable, EdgeKind::Interface);
        self.graph.add_edge(ty, cloneable, EdgeKind::Interface);
        Ok(())
    }
}

//! Candidate objects: anything offered up for binding against a contract.
//!
//! A candidate publishes a [`TypeShape`] (its type name plus public members)
//! and answers calls by member name. There is no declared relationship
//! between a candidate and the contracts it may satisfy; the
//! [binder](crate::binder) decides that from the shape alone.
//!
//! [`DynamicObject`] is the generic backend used by scripted and
//! manifest-declared units: a table of named closures with declared
//! signatures.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{CallError, CallResult};
use crate::value::{Callable, Dynamic, Signature, ValueKind};

/// How a member is exposed on a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// An operation invoked through [`Candidate::invoke`].
    Method,
    /// A property holding a [`Callable`], read through [`Candidate::property`].
    Property,
}

/// One public member of a candidate type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberDescriptor {
    /// Member name as the candidate spells it.
    pub name: String,
    /// Method or property.
    pub kind: MemberKind,
    /// Signature of the operation (for properties: of the held callable).
    pub signature: Signature,
}

/// The static shape of a candidate type.
///
/// The type name identifies the shape: two candidates reporting the same
/// type name are assumed to expose the same members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeShape {
    type_name: String,
    members: Vec<MemberDescriptor>,
}

impl TypeShape {
    /// Create an empty shape.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            members: Vec::new(),
        }
    }

    /// Add a method.
    #[must_use]
    pub fn with_method(
        mut self,
        name: impl Into<String>,
        params: &[ValueKind],
        returns: ValueKind,
    ) -> Self {
        self.members.push(MemberDescriptor {
            name: name.into(),
            kind: MemberKind::Method,
            signature: Signature::new(params, returns),
        });
        self
    }

    /// Add a callable-valued property.
    #[must_use]
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        params: &[ValueKind],
        returns: ValueKind,
    ) -> Self {
        self.members.push(MemberDescriptor {
            name: name.into(),
            kind: MemberKind::Property,
            signature: Signature::new(params, returns),
        });
        self
    }

    /// The type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// All public members.
    #[must_use]
    pub fn members(&self) -> &[MemberDescriptor] {
        &self.members
    }

    /// Members whose name matches `name` case-insensitively.
    pub fn members_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a MemberDescriptor> + 'a {
        self.members
            .iter()
            .filter(move |m| m.name.eq_ignore_ascii_case(name))
    }
}

/// An object offered for binding.
pub trait Candidate: Send + Sync {
    /// The shape of this object's type.
    fn shape(&self) -> &TypeShape;

    /// Invoke a method by the name the shape declares.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the member is unknown or the call fails.
    fn invoke(&self, member: &str, args: Vec<Dynamic>) -> CallResult<Dynamic>;

    /// Read a callable-valued property. `None` if unset or unknown.
    fn property(&self, _name: &str) -> Option<Callable> {
        None
    }
}

impl fmt::Debug for dyn Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("type_name", &self.shape().type_name())
            .finish_non_exhaustive()
    }
}

/// A candidate built from named closures.
pub struct DynamicObject {
    shape: TypeShape,
    methods: HashMap<String, Callable>,
    properties: RwLock<HashMap<String, Option<Callable>>>,
}

impl DynamicObject {
    /// Start building an object of the given type.
    #[must_use]
    pub fn builder(type_name: impl Into<String>) -> DynamicObjectBuilder {
        DynamicObjectBuilder {
            shape: TypeShape::new(type_name),
            methods: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    /// Replace the callable held by a property.
    ///
    /// Returns `false` if the shape declares no such property.
    pub fn set_property(&self, name: &str, value: Option<Callable>) -> bool {
        let key = name.to_ascii_lowercase();
        let Ok(mut props) = self.properties.write() else {
            return false;
        };
        match props.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                true
            },
            None => false,
        }
    }
}

impl Candidate for DynamicObject {
    fn shape(&self) -> &TypeShape {
        &self.shape
    }

    fn invoke(&self, member: &str, args: Vec<Dynamic>) -> CallResult<Dynamic> {
        let method = self
            .methods
            .get(&member.to_ascii_lowercase())
            .ok_or_else(|| CallError::Unsupported(member.to_owned()))?;
        method(args)
    }

    fn property(&self, name: &str) -> Option<Callable> {
        let props = self.properties.read().ok()?;
        props.get(&name.to_ascii_lowercase()).cloned().flatten()
    }
}

impl fmt::Debug for DynamicObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicObject")
            .field("type_name", &self.shape.type_name())
            .field("members", &self.shape.members().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`DynamicObject`].
pub struct DynamicObjectBuilder {
    shape: TypeShape,
    methods: HashMap<String, Callable>,
    properties: HashMap<String, Option<Callable>>,
}

impl DynamicObjectBuilder {
    /// Add a method.
    #[must_use]
    pub fn method<F>(mut self, name: &str, params: &[ValueKind], returns: ValueKind, f: F) -> Self
    where
        F: Fn(Vec<Dynamic>) -> CallResult<Dynamic> + Send + Sync + 'static,
    {
        self.shape = self.shape.with_method(name, params, returns);
        self.methods.insert(name.to_ascii_lowercase(), Arc::new(f));
        self
    }

    /// Add a property holding a callable (or nothing yet).
    #[must_use]
    pub fn property(
        mut self,
        name: &str,
        params: &[ValueKind],
        returns: ValueKind,
        initial: Option<Callable>,
    ) -> Self {
        self.shape = self.shape.with_property(name, params, returns);
        self.properties.insert(name.to_ascii_lowercase(), initial);
        self
    }

    /// Finish the object.
    #[must_use]
    pub fn build(self) -> DynamicObject {
        DynamicObject {
            shape: self.shape,
            methods: self.methods,
            properties: RwLock::new(self.properties),
        }
    }
}

type Factory = Arc<dyn Fn() -> CallResult<Arc<dyn Candidate>> + Send + Sync>;

/// A type exported by a loaded unit: its shape plus a way to instantiate it.
#[derive(Clone)]
pub struct ExportedType {
    shape: TypeShape,
    factory: Factory,
}

impl ExportedType {
    /// Create an exported type from a shape and a factory.
    pub fn new<F>(shape: TypeShape, factory: F) -> Self
    where
        F: Fn() -> CallResult<Arc<dyn Candidate>> + Send + Sync + 'static,
    {
        Self {
            shape,
            factory: Arc::new(factory),
        }
    }

    /// Export a [`DynamicObject`]-backed type. The builder runs once up
    /// front to capture the shape, then once per instantiation.
    pub fn from_fn<F>(build: F) -> Self
    where
        F: Fn() -> DynamicObject + Send + Sync + 'static,
    {
        let shape = build().shape().clone();
        Self::new(shape, move || Ok(Arc::new(build()) as Arc<dyn Candidate>))
    }

    /// The exported type's shape.
    #[must_use]
    pub fn shape(&self) -> &TypeShape {
        &self.shape
    }

    /// Create an instance.
    ///
    /// # Errors
    ///
    /// Returns whatever error the factory reports.
    pub fn instantiate(&self) -> CallResult<Arc<dyn Candidate>> {
        (self.factory)()
    }
}

impl fmt::Debug for ExportedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedType")
            .field("type_name", &self.shape.type_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeter() -> DynamicObject {
        DynamicObject::builder("test.Greeter")
            .method("Greet", &[ValueKind::Str], ValueKind::Str, |args| {
                let who = args.first().and_then(Dynamic::as_str).unwrap_or("nobody");
                Ok(Dynamic::from(format!("hello {who}")))
            })
            .property("Farewell", &[], ValueKind::Str, None)
            .build()
    }

    #[test]
    fn invoke_is_case_insensitive() {
        let obj = greeter();
        let out = obj.invoke("greet", vec![Dynamic::from("zip")]).unwrap();
        assert_eq!(out.as_str(), Some("hello zip"));
    }

    #[test]
    fn unknown_method_is_unsupported() {
        let obj = greeter();
        let err = obj.invoke("Wave", Vec::new()).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn property_can_be_swapped() {
        let obj = greeter();
        assert!(obj.property("Farewell").is_none());

        let bye: Callable = Arc::new(|_| Ok(Dynamic::from("bye")));
        assert!(obj.set_property("farewell", Some(bye)));
        let f = obj.property("FAREWELL").unwrap();
        assert_eq!(f(Vec::new()).unwrap().as_str(), Some("bye"));

        assert!(!obj.set_property("Missing", None));
    }

    #[test]
    fn shape_lookup_by_name() {
        let obj = greeter();
        assert_eq!(obj.shape().members_named("GREET").count(), 1);
        assert_eq!(obj.shape().members_named("farewell").count(), 1);
        assert_eq!(obj.shape().members_named("nope").count(), 0);
    }

    #[test]
    fn exported_type_instantiates_fresh_objects() {
        let exported = ExportedType::from_fn(greeter);
        assert_eq!(exported.shape().type_name(), "test.Greeter");
        let a = exported.instantiate().unwrap();
        let b = exported.instantiate().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}

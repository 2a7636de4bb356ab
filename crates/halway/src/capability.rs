//! # Capability Model
//!
//! A contract is declared once through [`HalContract::declare`] and classified into an
//! immutable [`ResourceDescriptor`]. The [`Classifier`] memoizes descriptors per contract
//! type, so classification happens once and the result is shared read-only.
//!
//! # Multiplicity Adapters
//!
//! The cardinality of a relation is derived from the *shape* of its declared result type
//! (`Item`, `Option<Item>`, `Vec<Item>`, ...). Shapes are matched against an ordered list
//! of [`MultiplicityAdapter`]s, first match wins. A new wrapper shape is supported by
//! prepending an adapter with [`Classifier::with_adapter`]; the built-in adapters are never
//! modified. A shape no adapter accepts fails classification with a developer error.
//!
//! ```rust,ignore
//! struct Catalog;
//! struct Item;
//!
//! impl HalContract for Catalog {
//!     fn declare(contract: &mut ContractBuilder) {
//!         contract
//!             .state()
//!             .relation::<Vec<Item>>("item")
//!             .relation::<Option<Item>>("first")
//!             .templated_relation::<Option<Item>>("lookup", &["id"]);
//!     }
//! }
//! ```

use crate::client::HalHandle;
use crate::error::HalError;
use crate::model::HAL_JSON;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

/// A resource contract: the declared shape shared by servers and clients.
pub trait HalContract: Send + Sync + 'static {
    /// Declares content type, state and relations of the contract.
    fn declare(contract: &mut ContractBuilder);
}

/// How many related resources a relation yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Required,
    Optional,
    Multiple,
}

/// The declared result type of a relation accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultShape {
    /// Name of the wrapper type (`"Option"`, `"Vec"`, ...), `None` for a bare contract.
    pub wrapper: Option<&'static str>,
    pub target: TypeId,
    pub target_name: &'static str,
}

impl ResultShape {
    pub fn of<C: HalContract>(wrapper: Option<&'static str>) -> Self {
        Self {
            wrapper,
            target: TypeId::of::<C>(),
            target_name: short_type_name::<C>(),
        }
    }
}

impl fmt::Display for ResultShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.wrapper {
            Some(wrapper) => write!(f, "{}<{}>", wrapper, self.target_name),
            None => write!(f, "{}", self.target_name),
        }
    }
}

/// A type usable as the declared result of a relation.
///
/// `wrap` is the pure conversion from the resolved handles (already reduced to the
/// relation's cardinality) into the declared result; it returns `None` if the handles
/// cannot be represented by the shape.
pub trait RelationShape: 'static {
    type Target: HalContract;
    type Output: Send;

    fn shape() -> ResultShape;

    fn wrap(handles: Vec<HalHandle<Self::Target>>) -> Option<Self::Output>;
}

impl<C: HalContract> RelationShape for C {
    type Target = C;
    type Output = HalHandle<C>;

    fn shape() -> ResultShape {
        ResultShape::of::<C>(None)
    }

    fn wrap(handles: Vec<HalHandle<C>>) -> Option<Self::Output> {
        handles.into_iter().next()
    }
}

impl<C: HalContract> RelationShape for Option<C> {
    type Target = C;
    type Output = Option<HalHandle<C>>;

    fn shape() -> ResultShape {
        ResultShape::of::<C>(Some("Option"))
    }

    fn wrap(handles: Vec<HalHandle<C>>) -> Option<Self::Output> {
        Some(handles.into_iter().next())
    }
}

impl<C: HalContract> RelationShape for Vec<C> {
    type Target = C;
    type Output = Vec<HalHandle<C>>;

    fn shape() -> ResultShape {
        ResultShape::of::<C>(Some("Vec"))
    }

    fn wrap(handles: Vec<HalHandle<C>>) -> Option<Self::Output> {
        Some(handles)
    }
}

impl<C: HalContract> RelationShape for VecDeque<C> {
    type Target = C;
    type Output = VecDeque<HalHandle<C>>;

    fn shape() -> ResultShape {
        ResultShape::of::<C>(Some("VecDeque"))
    }

    fn wrap(handles: Vec<HalHandle<C>>) -> Option<Self::Output> {
        Some(handles.into())
    }
}

/// Declares a relation resolved as a stream of handles (zero-or-many).
pub struct HalStream<C>(PhantomData<C>);

impl<C: HalContract> RelationShape for HalStream<C> {
    type Target = C;
    type Output = BoxStream<'static, HalHandle<C>>;

    fn shape() -> ResultShape {
        ResultShape::of::<C>(Some("HalStream"))
    }

    fn wrap(handles: Vec<HalHandle<C>>) -> Option<Self::Output> {
        Some(stream::iter(handles).boxed())
    }
}

/// Maps a result shape to a cardinality.
pub trait MultiplicityAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn accepts(&self, shape: &ResultShape) -> bool;

    fn cardinality(&self) -> Cardinality;
}

/// Accepts bare contracts: exactly one related resource.
pub struct ExactlyOne;

impl MultiplicityAdapter for ExactlyOne {
    fn name(&self) -> &'static str {
        "exactly-one"
    }

    fn accepts(&self, shape: &ResultShape) -> bool {
        shape.wrapper.is_none()
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::Required
    }
}

/// Accepts a fixed set of wrapper names with a given cardinality.
pub struct WrapperAdapter {
    name: &'static str,
    wrappers: Vec<&'static str>,
    cardinality: Cardinality,
}

impl WrapperAdapter {
    pub fn new(name: &'static str, wrappers: &[&'static str], cardinality: Cardinality) -> Self {
        Self {
            name,
            wrappers: wrappers.to_vec(),
            cardinality,
        }
    }

    pub fn zero_or_one() -> Self {
        Self::new("zero-or-one", &["Option"], Cardinality::Optional)
    }

    pub fn zero_or_many() -> Self {
        Self::new("zero-or-many", &["Vec", "VecDeque", "HalStream"], Cardinality::Multiple)
    }
}

impl MultiplicityAdapter for WrapperAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn accepts(&self, shape: &ResultShape) -> bool {
        shape.wrapper.is_some_and(|w| self.wrappers.contains(&w))
    }

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
}

/// A relation of a classified contract.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationSpec {
    pub name: String,
    pub cardinality: Cardinality,
    pub shape: ResultShape,
    pub template_variables: Vec<String>,
    /// Name of the adapter that derived the cardinality.
    pub adapter: &'static str,
}

impl RelationSpec {
    pub fn target_name(&self) -> &'static str {
        self.shape.target_name
    }
}

/// Immutable description of a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub name: String,
    pub content_type: String,
    pub has_state: bool,
    pub relations: Vec<RelationSpec>,
}

impl ResourceDescriptor {
    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }
}

struct DeclaredRelation {
    name: String,
    shape: ResultShape,
    variables: Vec<String>,
}

/// Registration API filled in by [`HalContract::declare`].
pub struct ContractBuilder {
    name: String,
    content_type: String,
    has_state: bool,
    relations: Vec<DeclaredRelation>,
}

impl ContractBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            content_type: HAL_JSON.to_string(),
            has_state: false,
            relations: Vec::new(),
        }
    }

    /// Overrides the contract name used in messages and metrics (defaults to the type name).
    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = name.to_string();
        self
    }

    pub fn content_type(&mut self, content_type: &str) -> &mut Self {
        self.content_type = content_type.to_string();
        self
    }

    /// Declares a state accessor.
    pub fn state(&mut self) -> &mut Self {
        self.has_state = true;
        self
    }

    pub fn relation<S: RelationShape>(&mut self, name: &str) -> &mut Self {
        self.templated_relation::<S>(name, &[])
    }

    /// Declares a relation whose link template takes `variables`.
    pub fn templated_relation<S: RelationShape>(&mut self, name: &str, variables: &[&str]) -> &mut Self {
        self.relations.push(DeclaredRelation {
            name: name.to_string(),
            shape: S::shape(),
            variables: variables.iter().map(|v| v.to_string()).collect(),
        });
        self
    }
}

/// Classifies contracts and memoizes their descriptors.
pub struct Classifier {
    adapters: Vec<Arc<dyn MultiplicityAdapter>>,
    descriptors: RwLock<HashMap<TypeId, Arc<ResourceDescriptor>>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// A classifier with the built-in adapters: exactly-one, zero-or-one, zero-or-many.
    pub fn new() -> Self {
        Self {
            adapters: vec![
                Arc::new(ExactlyOne),
                Arc::new(WrapperAdapter::zero_or_one()),
                Arc::new(WrapperAdapter::zero_or_many()),
            ],
            descriptors: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide classifier used when none is injected.
    pub fn global() -> Arc<Classifier> {
        static GLOBAL: OnceLock<Arc<Classifier>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Classifier::new())).clone()
    }

    /// Adds an adapter in front of the existing ones.
    pub fn with_adapter(mut self, adapter: impl MultiplicityAdapter + 'static) -> Self {
        self.adapters.insert(0, Arc::new(adapter));
        self
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn classify<C: HalContract>(&self) -> Result<Arc<ResourceDescriptor>, HalError> {
        let key = TypeId::of::<C>();
        if let Some(descriptor) = self.descriptors.read().get(&key) {
            return Ok(descriptor.clone());
        }

        let mut builder = ContractBuilder::new(short_type_name::<C>());
        C::declare(&mut builder);
        let descriptor = Arc::new(self.build(builder)?);
        tracing::debug!(contract = %descriptor.name, relations = descriptor.relations.len(), "Classified");

        Ok(self
            .descriptors
            .write()
            .entry(key)
            .or_insert(descriptor)
            .clone())
    }

    fn build(&self, builder: ContractBuilder) -> Result<ResourceDescriptor, HalError> {
        let mut relations: Vec<RelationSpec> = Vec::with_capacity(builder.relations.len());
        for declared in builder.relations {
            if declared.name.is_empty() {
                return Err(HalError::developer(format!(
                    "{} declares a relation with an empty name",
                    builder.name
                )));
            }
            if relations.iter().any(|r| r.name == declared.name) {
                return Err(HalError::developer(format!(
                    "{} declares the relation '{}' more than once",
                    builder.name, declared.name
                )));
            }
            let adapter = self
                .adapters
                .iter()
                .find(|a| a.accepts(&declared.shape))
                .ok_or_else(|| {
                    HalError::developer(format!(
                        "the result type {} of relation '{}' in {} is not supported by any multiplicity adapter ({})",
                        declared.shape,
                        declared.name,
                        builder.name,
                        self.adapter_names().join(", ")
                    ))
                })?;
            relations.push(RelationSpec {
                name: declared.name,
                cardinality: adapter.cardinality(),
                shape: declared.shape,
                template_variables: declared.variables,
                adapter: adapter.name(),
            });
        }
        Ok(ResourceDescriptor {
            name: builder.name,
            content_type: builder.content_type,
            has_state: builder.has_state,
            relations,
        })
    }
}

/// A type-erased reference to a contract, used by server resources.
#[derive(Clone, Copy)]
pub struct ContractRef {
    id: TypeId,
    classify: fn(&Classifier) -> Result<Arc<ResourceDescriptor>, HalError>,
}

impl ContractRef {
    pub fn of<C: HalContract>() -> Self {
        Self {
            id: TypeId::of::<C>(),
            classify: |classifier| classifier.classify::<C>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn classify(&self, classifier: &Classifier) -> Result<Arc<ResourceDescriptor>, HalError> {
        (self.classify)(classifier)
    }
}

/// Last path segment of the type name, e.g. `Item` instead of `my_api::contracts::Item`.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
        .split('<')
        .next()
        .and_then(|path| path.split("::").last())
        .unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item;
    struct Catalog;
    struct Broken;
    struct Duplicated;

    /// A wrapper shape unknown to the built-in adapters.
    struct Page<C>(PhantomData<C>);

    impl<C: HalContract> RelationShape for Page<C> {
        type Target = C;
        type Output = Vec<HalHandle<C>>;

        fn shape() -> ResultShape {
            ResultShape::of::<C>(Some("Page"))
        }

        fn wrap(handles: Vec<HalHandle<C>>) -> Option<Self::Output> {
            Some(handles)
        }
    }

    impl HalContract for Item {
        fn declare(contract: &mut ContractBuilder) {
            contract.state().relation::<Catalog>("catalog");
        }
    }

    impl HalContract for Catalog {
        fn declare(contract: &mut ContractBuilder) {
            contract
                .name("ItemCatalog")
                .state()
                .relation::<Vec<Item>>("item")
                .relation::<Option<Item>>("first")
                .templated_relation::<Option<Item>>("lookup", &["id"]);
        }
    }

    impl HalContract for Broken {
        fn declare(contract: &mut ContractBuilder) {
            contract.relation::<Page<Item>>("page");
        }
    }

    impl HalContract for Duplicated {
        fn declare(contract: &mut ContractBuilder) {
            contract.relation::<Item>("a").relation::<Vec<Item>>("a");
        }
    }

    #[test]
    fn cardinality_is_derived_from_the_result_shape() {
        let descriptor = Classifier::new().classify::<Catalog>().unwrap();
        assert_eq!(descriptor.name, "ItemCatalog");
        assert!(descriptor.has_state);
        assert_eq!(descriptor.content_type, HAL_JSON);

        let item = descriptor.relation("item").unwrap();
        assert_eq!(item.cardinality, Cardinality::Multiple);
        assert_eq!(item.adapter, "zero-or-many");
        assert_eq!(item.target_name(), "Item");

        let first = descriptor.relation("first").unwrap();
        assert_eq!(first.cardinality, Cardinality::Optional);

        let lookup = descriptor.relation("lookup").unwrap();
        assert_eq!(lookup.template_variables, vec!["id"]);

        let back = Classifier::new().classify::<Item>().unwrap();
        assert_eq!(back.relation("catalog").unwrap().cardinality, Cardinality::Required);
    }

    #[test]
    fn descriptors_are_memoized() {
        let classifier = Classifier::new();
        let first = classifier.classify::<Catalog>().unwrap();
        let second = classifier.classify::<Catalog>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unsupported_shape_fails_at_classification_time() {
        let err = Classifier::new().classify::<Broken>().unwrap_err();
        assert!(err.is_developer_error());
        assert!(err.to_string().contains("Page<Item>"));
        assert!(err.to_string().contains("Broken"));
    }

    #[test]
    fn prepended_adapter_supports_new_shapes() {
        let classifier = Classifier::new().with_adapter(WrapperAdapter::new(
            "paged",
            &["Page"],
            Cardinality::Multiple,
        ));
        assert_eq!(classifier.adapter_names()[0], "paged");

        let descriptor = classifier.classify::<Broken>().unwrap();
        let page = descriptor.relation("page").unwrap();
        assert_eq!(page.cardinality, Cardinality::Multiple);
        assert_eq!(page.adapter, "paged");
    }

    #[test]
    fn duplicate_relations_are_rejected() {
        let err = Classifier::new().classify::<Duplicated>().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn contract_ref_classifies_through_the_given_classifier() {
        let contract = ContractRef::of::<Catalog>();
        assert_eq!(contract.id(), TypeId::of::<Catalog>());
        let descriptor = contract.classify(&Classifier::new()).unwrap();
        assert_eq!(descriptor.relations.len(), 3);
    }
}

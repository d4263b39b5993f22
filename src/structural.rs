//! Structural reflection over loaded targets.
//!
//! [`StructuralView`] is the capability interface the resolver validates
//! against. [`TypeModel`] implements it over statically extracted metadata;
//! a runtime-backed loader can supply its own implementation.

use crate::extract::ExportDescriptor;
use crate::signature::{EntityKind, Signature};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Reflection capabilities required to validate a target.
pub trait StructuralView: Send + Sync + fmt::Debug {
    fn kind(&self) -> EntityKind;

    /// Declared name of the entity.
    fn name(&self) -> &str;

    fn has_method(&self, name: &str) -> bool;

    fn has_property(&self, name: &str) -> bool;

    /// Whether `base` appears anywhere in the ancestor chain, by name.
    fn extends_type(&self, base: &str) -> bool;

    fn instance_of(&self, type_name: &str) -> bool {
        self.name() == type_name || self.extends_type(type_name)
    }

    /// Whether a decorator or attribute with this bare name is applied.
    fn has_decorator(&self, _name: &str) -> bool {
        false
    }

    /// A best-effort instance, available for zero-argument constructible types.
    fn instantiate(&self) -> Option<Arc<dyn StructuralView>> {
        None
    }
}

/// Metadata-backed view of a class, function, object or other entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeModel {
    kind: EntityKind,
    name: String,
    methods: BTreeSet<String>,
    properties: BTreeSet<String>,
    instance_properties: BTreeSet<String>,
    /// Nearest first.
    ancestors: Vec<String>,
    implements: BTreeSet<String>,
    decorators: BTreeSet<String>,
    constructor_arity: Option<usize>,
    is_instance: bool,
}

impl TypeModel {
    pub fn from_descriptor(descriptor: &ExportDescriptor) -> Self {
        Self {
            kind: descriptor.kind,
            name: descriptor.name.clone(),
            methods: descriptor.methods.clone(),
            properties: descriptor.properties.clone(),
            instance_properties: descriptor.instance_properties.clone(),
            ancestors: descriptor.extends.iter().cloned().collect(),
            implements: descriptor.implements.iter().cloned().collect(),
            decorators: descriptor.decorators.clone(),
            constructor_arity: descriptor.constructor_arity,
            is_instance: false,
        }
    }

    /// Folds a resolved parent's members and ancestry into this model.
    pub fn inherit(&mut self, parent: &TypeModel) {
        self.methods.extend(parent.methods.iter().cloned());
        self.properties.extend(parent.properties.iter().cloned());
        self.instance_properties
            .extend(parent.instance_properties.iter().cloned());
        self.implements.extend(parent.implements.iter().cloned());
        for ancestor in std::iter::once(&parent.name).chain(&parent.ancestors) {
            if !self.ancestors.contains(ancestor) {
                self.ancestors.push(ancestor.clone());
            }
        }
        if self.constructor_arity.is_none() {
            self.constructor_arity = parent.constructor_arity;
        }
    }

    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    pub fn is_constructible(&self) -> bool {
        !self.is_instance && self.kind == EntityKind::Class && self.constructor_arity == Some(0)
    }
}

impl StructuralView for TypeModel {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn has_method(&self, name: &str) -> bool {
        self.methods.contains(name)
    }

    fn has_property(&self, name: &str) -> bool {
        self.properties.contains(name)
            || (self.is_instance && self.instance_properties.contains(name))
    }

    fn extends_type(&self, base: &str) -> bool {
        self.ancestors.iter().any(|a| a == base)
    }

    fn instance_of(&self, type_name: &str) -> bool {
        self.name == type_name
            || self.extends_type(type_name)
            || self.implements.contains(type_name)
    }

    fn has_decorator(&self, name: &str) -> bool {
        self.decorators.contains(name)
    }

    fn instantiate(&self) -> Option<Arc<dyn StructuralView>> {
        if !self.is_constructible() {
            return None;
        }
        let mut instance = self.clone();
        instance.kind = EntityKind::Object;
        instance.is_instance = true;
        Some(Arc::new(instance))
    }
}

/// One unmet signature constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintFailure {
    Kind {
        expected: EntityKind,
        actual: EntityKind,
    },
    Name {
        expected: String,
        actual: String,
    },
    Export {
        expected: String,
        actual: String,
    },
    MissingMethod(String),
    MissingProperty(String),
    MissingDecorator(String),
    Extends(String),
    InstanceOf(String),
}

impl fmt::Display for ConstraintFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kind { expected, actual } => write!(f, "expected a {expected}, found a {actual}"),
            Self::Name { expected, actual } => {
                write!(f, "name '{actual}' does not match {expected}")
            }
            Self::Export { expected, actual } => {
                write!(f, "exported as '{actual}', expected '{expected}'")
            }
            Self::MissingMethod(name) => write!(f, "missing method '{name}'"),
            Self::MissingProperty(name) => write!(f, "missing property '{name}'"),
            Self::MissingDecorator(name) => write!(f, "missing decorator '@{name}'"),
            Self::Extends(base) => write!(f, "does not extend '{base}'"),
            Self::InstanceOf(type_name) => write!(f, "is not an instance of '{type_name}'"),
        }
    }
}

/// Whether a target of kind `actual` can satisfy a request for `expected`.
///
/// Callables, plain values and constructor-bearing types are kept apart.
pub fn kind_compatible(expected: EntityKind, actual: EntityKind) -> bool {
    match expected {
        EntityKind::Class | EntityKind::Function => actual == expected,
        EntityKind::Interface => matches!(actual, EntityKind::Interface | EntityKind::Class),
        EntityKind::Enum => matches!(actual, EntityKind::Enum | EntityKind::Object),
        EntityKind::Object | EntityKind::Module => matches!(
            actual,
            EntityKind::Object | EntityKind::Module | EntityKind::Enum
        ),
    }
}

/// Checks every constraint of `signature` against `view`.
///
/// `exported_name` is how the target is reached from its module; the name
/// constraint accepts either it or the declared name. Returns a structural
/// score when all constraints hold, otherwise every failure found.
pub fn validate_target(
    view: &dyn StructuralView,
    exported_name: &str,
    signature: &Signature,
) -> Result<f64, Vec<ConstraintFailure>> {
    let mut failures = Vec::new();
    let mut score = 10.0;

    if let Some(expected) = signature.requested_kind() {
        if kind_compatible(expected, view.kind()) {
            score += 5.0;
        } else {
            failures.push(ConstraintFailure::Kind {
                expected,
                actual: view.kind(),
            });
        }
    }

    let matcher = signature.name();
    if matcher.literal() == Some(view.name()) {
        score += 10.0;
    } else if matcher.matches(view.name()) || matcher.matches(exported_name) {
        score += 5.0;
    } else {
        failures.push(ConstraintFailure::Name {
            expected: matcher.to_string(),
            actual: view.name().to_string(),
        });
    }

    if let Some(expected) = signature.export_name()
        && expected != exported_name
    {
        failures.push(ConstraintFailure::Export {
            expected: expected.to_string(),
            actual: exported_name.to_string(),
        });
    }

    let instance = view.instantiate();
    let on_instance = |check: fn(&dyn StructuralView, &str) -> bool, member: &str| {
        instance.as_deref().is_some_and(|i| check(i, member))
    };

    for method in signature.required_methods() {
        if view.has_method(method) || on_instance(|i, m| i.has_method(m), method) {
            score += 5.0;
        } else {
            failures.push(ConstraintFailure::MissingMethod(method.clone()));
        }
    }

    for property in signature.required_properties() {
        if view.has_property(property) || on_instance(|i, m| i.has_property(m), property) {
            score += 3.0;
        } else {
            failures.push(ConstraintFailure::MissingProperty(property.clone()));
        }
    }

    for decorator in signature.required_decorators() {
        if view.has_decorator(decorator) {
            score += 3.0;
        } else {
            failures.push(ConstraintFailure::MissingDecorator(decorator.clone()));
        }
    }

    if let Some(base) = signature.required_base() {
        if view.extends_type(base) {
            score += 5.0;
        } else {
            failures.push(ConstraintFailure::Extends(base.to_string()));
        }
    }

    if let Some(type_name) = signature.required_instance_of() {
        if view.instance_of(type_name) || on_instance(|i, m| i.instance_of(m), type_name) {
            score += 5.0;
        } else {
            failures.push(ConstraintFailure::InstanceOf(type_name.to_string()));
        }
    }

    if failures.is_empty() {
        Ok(score)
    } else {
        Err(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::AccessKind;
    use assert2::{check, let_assert};
    use rstest::{fixture, rstest};

    #[fixture]
    fn calculator() -> TypeModel {
        let mut descriptor =
            ExportDescriptor::new(AccessKind::Named, "Calculator", EntityKind::Class, "Calculator");
        descriptor.methods = ["add", "subtract"].map(String::from).into();
        descriptor.instance_properties = ["total"].map(String::from).into();
        descriptor.extends = Some("Base".to_string());
        descriptor.constructor_arity = Some(0);
        TypeModel::from_descriptor(&descriptor)
    }

    #[rstest]
    fn all_constraints_hold(calculator: TypeModel) {
        let signature = Signature::named("Calculator")
            .kind(EntityKind::Class)
            .methods(["add", "subtract"])
            .extends("Base");
        let_assert!(Ok(score) = validate_target(&calculator, "Calculator", &signature));
        check!(score > 10.0);
    }

    #[rstest]
    fn every_failure_is_reported(calculator: TypeModel) {
        let signature = Signature::named("Calculator")
            .kind(EntityKind::Function)
            .methods(["add", "multiply"])
            .properties(["precision"])
            .extends("Other");
        let_assert!(Err(failures) = validate_target(&calculator, "Calculator", &signature));
        check!(
            failures
                == [
                    ConstraintFailure::Kind {
                        expected: EntityKind::Function,
                        actual: EntityKind::Class
                    },
                    ConstraintFailure::MissingMethod("multiply".into()),
                    ConstraintFailure::MissingProperty("precision".into()),
                    ConstraintFailure::Extends("Other".into()),
                ]
        );
    }

    #[rstest]
    fn instance_properties_need_a_constructible_type(mut calculator: TypeModel) {
        let signature = Signature::named("Calculator").properties(["total"]);
        check!(validate_target(&calculator, "Calculator", &signature).is_ok());

        calculator.constructor_arity = Some(2);
        let_assert!(Err(failures) = validate_target(&calculator, "Calculator", &signature));
        check!(failures == [ConstraintFailure::MissingProperty("total".into())]);
    }

    #[rstest]
    fn pattern_names_and_export_names(calculator: TypeModel) {
        let signature = Signature::pattern("^Calc").unwrap();
        check!(validate_target(&calculator, "Calculator", &signature).is_ok());

        let signature = Signature::named("Calculator").exports("default");
        let_assert!(Err(failures) = validate_target(&calculator, "Calculator", &signature));
        check!(matches!(failures.as_slice(), [ConstraintFailure::Export { .. }]));
    }

    #[rstest]
    fn decorators_must_all_be_present(calculator: TypeModel) {
        let signature = Signature::named("Calculator").decorators(["@injectable"]);
        let_assert!(Err(failures) = validate_target(&calculator, "Calculator", &signature));
        check!(failures == [ConstraintFailure::MissingDecorator("injectable".into())]);

        let mut descriptor =
            ExportDescriptor::new(AccessKind::Named, "Calculator", EntityKind::Class, "Calculator");
        descriptor.decorators = ["injectable", "sealed"].map(String::from).into();
        let decorated = TypeModel::from_descriptor(&descriptor);
        check!(validate_target(&decorated, "Calculator", &signature).is_ok());
    }

    #[rstest]
    fn inheritance_merges_parent_members(mut calculator: TypeModel) {
        let mut parent =
            ExportDescriptor::new(AccessKind::Named, "Base", EntityKind::Class, "Base");
        parent.methods = ["reset"].map(String::from).into();
        parent.extends = Some("Root".to_string());
        calculator.inherit(&TypeModel::from_descriptor(&parent));

        check!(calculator.has_method("reset"));
        check!(calculator.extends_type("Root"));
        check!(calculator.instance_of("Base"));
        check!(calculator.ancestors() == ["Base", "Root"]);
    }

    #[rstest]
    #[case(EntityKind::Class, EntityKind::Class, true)]
    #[case(EntityKind::Class, EntityKind::Function, false)]
    #[case(EntityKind::Function, EntityKind::Object, false)]
    #[case(EntityKind::Object, EntityKind::Enum, true)]
    #[case(EntityKind::Interface, EntityKind::Class, true)]
    fn kind_compatibility(
        #[case] expected: EntityKind,
        #[case] actual: EntityKind,
        #[case] compatible: bool,
    ) {
        check!(kind_compatible(expected, actual) == compatible);
    }
}

//! Compiled selection trees handed over by the execution layer.
//!
//! The parser, validator and code generator live outside this crate. What
//! reaches the cache is a tree of fields with their declared types, argument
//! values (possibly variable references), `@skip`/`@include` conditions and
//! type-conditioned fragments. These types model exactly that boundary.

use crate::key::{storage_key, CacheKey};
use serde_json::{Map, Value};

/// Bound operation variables.
pub type Variables = Map<String, Value>;

/// Argument value as written in the document.
#[derive(Clone, Debug, PartialEq)]
pub enum InputValue {
    Literal(Value),
    /// `$name` reference, substituted from the operation variables.
    Variable(String),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
}

impl InputValue {
    pub fn variable(name: impl Into<String>) -> Self {
        InputValue::Variable(name.into())
    }

    /// Substitute variables. Unbound variables resolve to `null`.
    pub fn resolve(&self, variables: &Variables) -> Value {
        match self {
            InputValue::Literal(v) => v.clone(),
            InputValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            InputValue::List(items) => {
                Value::Array(items.iter().map(|i| i.resolve(variables)).collect())
            }
            InputValue::Object(entries) => {
                let mut map = Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.resolve(variables));
                }
                Value::Object(map)
            }
        }
    }
}

impl From<Value> for InputValue {
    fn from(v: Value) -> Self {
        InputValue::Literal(v)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: InputValue,
    /// Pagination arguments are left out of the field storage key so that
    /// every page of a connection lands on the same field.
    pub pagination: bool,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        Argument {
            name: name.into(),
            value: value.into(),
            pagination: false,
        }
    }

    pub fn pagination(mut self) -> Self {
        self.pagination = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Scalar,
    Enum,
    Object,
    Interface,
    Union,
}

impl TypeKind {
    pub fn is_composite(self) -> bool {
        matches!(self, TypeKind::Object | TypeKind::Interface | TypeKind::Union)
    }
}

/// Declared type of a field.
#[derive(Clone, Debug, PartialEq)]
pub enum CompiledType {
    Named { name: String, kind: TypeKind },
    List(Box<CompiledType>),
    NonNull(Box<CompiledType>),
}

impl CompiledType {
    pub fn scalar(name: impl Into<String>) -> Self {
        CompiledType::Named {
            name: name.into(),
            kind: TypeKind::Scalar,
        }
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        CompiledType::Named {
            name: name.into(),
            kind: TypeKind::Enum,
        }
    }

    pub fn object(name: impl Into<String>) -> Self {
        CompiledType::Named {
            name: name.into(),
            kind: TypeKind::Object,
        }
    }

    pub fn interface(name: impl Into<String>) -> Self {
        CompiledType::Named {
            name: name.into(),
            kind: TypeKind::Interface,
        }
    }

    pub fn union(name: impl Into<String>) -> Self {
        CompiledType::Named {
            name: name.into(),
            kind: TypeKind::Union,
        }
    }

    pub fn list(of: CompiledType) -> Self {
        CompiledType::List(Box::new(of))
    }

    pub fn non_null(of: CompiledType) -> Self {
        CompiledType::NonNull(Box::new(of))
    }

    /// Innermost named type.
    pub fn leaf(&self) -> (&str, TypeKind) {
        match self {
            CompiledType::Named { name, kind } => (name, *kind),
            CompiledType::List(inner) | CompiledType::NonNull(inner) => inner.leaf(),
        }
    }

    pub fn leaf_name(&self) -> &str {
        self.leaf().0
    }

    pub fn is_composite(&self) -> bool {
        self.leaf().1.is_composite()
    }
}

/// `@include(if: $var)` or, inverted, `@skip(if: $var)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub variable: String,
    pub inverted: bool,
}

impl Condition {
    fn holds(&self, variables: &Variables) -> bool {
        let value = variables
            .get(&self.variable)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        value != self.inverted
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledField {
    pub name: String,
    pub alias: Option<String>,
    pub field_type: CompiledType,
    pub arguments: Vec<Argument>,
    pub conditions: Vec<Condition>,
    pub selections: Vec<Selection>,
}

impl CompiledField {
    pub fn new(name: impl Into<String>, field_type: CompiledType) -> Self {
        CompiledField {
            name: name.into(),
            alias: None,
            field_type,
            arguments: Vec::new(),
            conditions: Vec::new(),
            selections: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn include_if(mut self, variable: impl Into<String>) -> Self {
        self.conditions.push(Condition {
            variable: variable.into(),
            inverted: false,
        });
        self
    }

    pub fn skip_if(mut self, variable: impl Into<String>) -> Self {
        self.conditions.push(Condition {
            variable: variable.into(),
            inverted: true,
        });
        self
    }

    pub fn selections(mut self, selections: Vec<Selection>) -> Self {
        self.selections = selections;
        self
    }

    /// Key of this field in response data.
    pub fn response_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_included(&self, variables: &Variables) -> bool {
        self.conditions.iter().all(|c| c.holds(variables))
    }

    /// All arguments with variables substituted.
    pub fn resolved_arguments(&self, variables: &Variables) -> Map<String, Value> {
        self.arguments
            .iter()
            .map(|a| (a.name.clone(), a.value.resolve(variables)))
            .collect()
    }

    /// Key under which this field is stored in its parent record.
    pub fn storage_key(&self, variables: &Variables) -> String {
        let arguments: Map<String, Value> = self
            .arguments
            .iter()
            .filter(|a| !a.pagination)
            .map(|a| (a.name.clone(), a.value.resolve(variables)))
            .collect();
        storage_key(&self.name, &arguments)
    }
}

/// Fragment (inline or named) applying to the listed possible types.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledFragment {
    pub possible_types: Vec<String>,
    pub selections: Vec<Selection>,
}

impl CompiledFragment {
    pub fn on<S: Into<String>>(possible_types: impl IntoIterator<Item = S>, selections: Vec<Selection>) -> Self {
        CompiledFragment {
            possible_types: possible_types.into_iter().map(Into::into).collect(),
            selections,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Field(CompiledField),
    Fragment(CompiledFragment),
}

impl From<CompiledField> for Selection {
    fn from(f: CompiledField) -> Self {
        Selection::Field(f)
    }
}

impl From<CompiledFragment> for Selection {
    fn from(f: CompiledFragment) -> Self {
        Selection::Fragment(f)
    }
}

/// One response key with every selection merged under it.
pub(crate) struct FieldGroup<'a> {
    pub field: &'a CompiledField,
    pub selections: Vec<&'a Selection>,
}

/// Flatten selections for an object of type `typename`.
///
/// Fragments apply when `typename` is one of their possible types. Fields
/// sharing a response name are grouped and their sub-selections
/// concatenated, in document order.
pub(crate) fn collect_fields<'a>(
    selections: &[&'a Selection],
    typename: &str,
    variables: &Variables,
) -> Vec<FieldGroup<'a>> {
    let mut groups: Vec<FieldGroup<'a>> = Vec::new();
    collect_into(selections.iter().copied(), typename, variables, &mut groups);
    groups
}

fn collect_into<'a>(
    selections: impl Iterator<Item = &'a Selection>,
    typename: &str,
    variables: &Variables,
    groups: &mut Vec<FieldGroup<'a>>,
) {
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                if !field.is_included(variables) {
                    continue;
                }
                let subs = field.selections.iter();
                match groups
                    .iter_mut()
                    .find(|g| g.field.response_name() == field.response_name())
                {
                    Some(group) => group.selections.extend(subs),
                    None => groups.push(FieldGroup {
                        field,
                        selections: subs.collect(),
                    }),
                }
            }
            Selection::Fragment(fragment) => {
                if fragment.possible_types.iter().any(|t| t == typename) {
                    collect_into(fragment.selections.iter(), typename, variables, groups);
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// A typed operation: root type, selection tree and bound variables.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    pub name: String,
    pub kind: OperationKind,
    pub root_type: String,
    pub selections: Vec<Selection>,
    pub variables: Variables,
}

impl Operation {
    pub fn query(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Operation {
            name: name.into(),
            kind: OperationKind::Query,
            root_type: "Query".to_string(),
            selections,
            variables: Variables::new(),
        }
    }

    pub fn mutation(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Operation {
            name: name.into(),
            kind: OperationKind::Mutation,
            root_type: "Mutation".to_string(),
            selections,
            variables: Variables::new(),
        }
    }

    pub fn subscription(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Operation {
            name: name.into(),
            kind: OperationKind::Subscription,
            root_type: "Subscription".to_string(),
            selections,
            variables: Variables::new(),
        }
    }

    /// A selection set on an arbitrary type, read or written at a caller-given key.
    pub fn fragment(type_name: impl Into<String>, selections: Vec<Selection>) -> Self {
        let type_name = type_name.into();
        Operation {
            name: type_name.clone(),
            kind: OperationKind::Query,
            root_type: type_name,
            selections,
            variables: Variables::new(),
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn root_key(&self) -> CacheKey {
        match self.kind {
            OperationKind::Query => CacheKey::root(),
            OperationKind::Mutation => CacheKey::new(CacheKey::MUTATION_ROOT),
            OperationKind::Subscription => CacheKey::new(CacheKey::SUBSCRIPTION_ROOT),
        }
    }

    pub(crate) fn selection_refs(&self) -> Vec<&Selection> {
        self.selections.iter().collect()
    }
}

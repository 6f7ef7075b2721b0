//! Static query cost.
//!
//! [`schema`] walks the introspected schema once and produces the immutable
//! weight table; [`static_cost`] walks an executable document against that
//! table and the request variables and produces the complexity cost the gate
//! spends against the token bucket.

pub mod schema;
pub mod static_cost;

pub use schema::CostSchema;
pub use static_cost::Variables;
pub use static_cost::analyze;
pub use static_cost::measure_depth;

use apollo_compiler::Node;
use apollo_compiler::ast;

use crate::configuration::Configuration;
use crate::configuration::TypeWeights;
use crate::configuration::default_list_size;
use crate::configuration::default_slicing_arguments;

/// Raised while building the weight table. Fatal at setup.
#[derive(Debug, thiserror::Error)]
pub enum WeightTableError {
    #[error("type `{0}` is referenced by a field but missing from the schema")]
    UnresolvedType(String),

    #[error(
        "list field `{type_name}.{field_name}` has no slicing argument and bounded lists are enforced"
    )]
    UnboundedList {
        type_name: String,
        field_name: String,
    },

    #[error(
        "slicing argument `{argument}` of `{type_name}.{field_name}` has a non-integer default"
    )]
    InvalidSlicingDefault {
        type_name: String,
        field_name: String,
        argument: String,
    },
}

/// Raised while analyzing one document. Per-request.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("type `{0}` has no entry in the weight table")]
    UnknownType(String),

    #[error("no weight recorded for field `{field}` of type `{type_name}`")]
    UnknownField { type_name: String, field: String },

    /// The slicing argument resolved to something other than a non-negative
    /// integer: a malformed literal, or a variable carrying a float, string,
    /// or negative value.
    #[error("slicing argument of field `{field}` is not a non-negative integer")]
    InvalidSlicingValue { field: String },

    #[error("{0} selections are not supported")]
    UnsupportedSelection(&'static str),
}

/// Options consumed by the weight-table builder, split out of
/// [`Configuration`] so the table can be built without a full gate setup.
#[derive(Debug, Clone)]
pub struct CostOptions {
    pub type_weights: TypeWeights,
    pub slicing_arguments: Vec<String>,
    pub enforce_bounded_lists: bool,
    pub default_list_size: u64,
}

impl Default for CostOptions {
    fn default() -> Self {
        CostOptions {
            type_weights: TypeWeights::default(),
            slicing_arguments: default_slicing_arguments(),
            enforce_bounded_lists: false,
            default_list_size: default_list_size(),
        }
    }
}

impl From<&Configuration> for CostOptions {
    fn from(configuration: &Configuration) -> Self {
        CostOptions {
            type_weights: configuration.type_weights,
            slicing_arguments: configuration.slicing_arguments.clone(),
            enforce_bounded_lists: configuration.enforce_bounded_lists,
            default_list_size: configuration.default_list_size,
        }
    }
}

/// Upper bound of a list field for one selection.
///
/// Implementations are pure: the bound is a function of the selection's AST
/// arguments, the operation's variable definitions, and the request
/// variables, nothing else.
pub trait Multiplier: std::fmt::Debug + Send + Sync {
    fn bound(
        &self,
        field_name: &str,
        arguments: &[Node<ast::Argument>],
        variable_definitions: &[Node<ast::VariableDefinition>],
        variables: &Variables,
    ) -> Result<u64, AnalyzeError>;
}

/// Bound taken from a slicing argument (`first`, `last`, `limit`, ...).
///
/// Resolution order: the literal value when the selection supplies one; the
/// request variable when the selection references one, falling back to the
/// variable definition's default; the field's schema-declared default when
/// the argument is absent; the configured fallback otherwise. A variable
/// that merely shares a slicing keyword's name never influences a field
/// whose AST does not reference it.
#[derive(Debug, Clone)]
pub struct SlicingRule {
    pub(crate) argument: String,
    pub(crate) schema_default: Option<u64>,
    pub(crate) fallback: u64,
}

impl Multiplier for SlicingRule {
    fn bound(
        &self,
        field_name: &str,
        arguments: &[Node<ast::Argument>],
        variable_definitions: &[Node<ast::VariableDefinition>],
        variables: &Variables,
    ) -> Result<u64, AnalyzeError> {
        let supplied = arguments
            .iter()
            .find(|argument| argument.name.as_str() == self.argument);
        match supplied.map(|argument| argument.value.as_ref()) {
            Some(ast::Value::Variable(name)) => {
                if let Some(value) = variables.get(name.as_str()) {
                    value
                        .as_u64()
                        .ok_or_else(|| invalid_slicing_value(field_name))
                } else if let Some(default) =
                    variable_default(name.as_str(), variable_definitions)
                {
                    non_negative(default, field_name)
                } else if let Some(default) = self.schema_default {
                    Ok(default)
                } else {
                    Ok(self.fallback)
                }
            }
            Some(literal @ ast::Value::Int(_)) => {
                let value = literal
                    .to_i32()
                    .ok_or_else(|| invalid_slicing_value(field_name))?;
                non_negative(value, field_name)
            }
            Some(_) => Err(invalid_slicing_value(field_name)),
            None => Ok(self.schema_default.unwrap_or(self.fallback)),
        }
    }
}

/// Fixed bound for lists the schema does not slice.
#[derive(Debug, Clone, Copy)]
pub struct AssumedSize(pub u64);

impl Multiplier for AssumedSize {
    fn bound(
        &self,
        _field_name: &str,
        _arguments: &[Node<ast::Argument>],
        _variable_definitions: &[Node<ast::VariableDefinition>],
        _variables: &Variables,
    ) -> Result<u64, AnalyzeError> {
        Ok(self.0)
    }
}

fn variable_default(
    name: &str,
    variable_definitions: &[Node<ast::VariableDefinition>],
) -> Option<i32> {
    variable_definitions
        .iter()
        .find(|definition| definition.name.as_str() == name)
        .and_then(|definition| definition.default_value.as_deref())
        .and_then(ast::Value::to_i32)
}

fn non_negative(value: i32, field_name: &str) -> Result<u64, AnalyzeError> {
    u64::try_from(value).map_err(|_| invalid_slicing_value(field_name))
}

fn invalid_slicing_value(field_name: &str) -> AnalyzeError {
    AnalyzeError::InvalidSlicingValue {
        field: field_name.to_string(),
    }
}

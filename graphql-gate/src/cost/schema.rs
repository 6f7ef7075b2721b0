//! Weight table construction.
//!
//! The table is built once at startup from the introspected schema and is
//! immutable afterwards; the gate shares it across requests behind an `Arc`.

use ahash::HashMap;
use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::FieldDefinition;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::ObjectType;

use super::AssumedSize;
use super::CostOptions;
use super::Multiplier;
use super::SlicingRule;
use super::WeightTableError;

/// Weight descriptor for one field.
#[derive(Debug)]
pub enum FieldWeight {
    /// Scalar or enum leaf.
    Leaf { weight: u64 },
    /// Reference to another type in the table.
    Ref { type_name: String },
    /// List whose cardinality a multiplier rule bounds.
    BoundedList {
        type_name: String,
        rule: Box<dyn Multiplier>,
    },
}

/// One type's entry in the weight table.
#[derive(Debug)]
pub struct TypeWeight {
    /// Cost of materializing one value of the type.
    pub weight: u64,
    /// Per-field descriptors, keyed by field name.
    pub fields: HashMap<String, FieldWeight>,
}

/// The weight table: lowercased type name to [`TypeWeight`], plus the
/// mapping from operation kind to its root type.
#[derive(Debug)]
pub struct CostSchema {
    types: HashMap<String, TypeWeight>,
    roots: HashMap<&'static str, String>,
}

impl CostSchema {
    /// Walks every named type of `schema` and builds the table.
    pub fn build(schema: &Schema, options: &CostOptions) -> Result<Self, WeightTableError> {
        let mut types: HashMap<String, TypeWeight> = HashMap::default();
        for (name, ty) in &schema.types {
            if name.as_str().starts_with("__") {
                continue;
            }
            let weight = base_weight(name, ty, schema, options);
            let fields = match ty {
                ExtendedType::Object(object) => {
                    field_weights(name, &object.fields, schema, options)?
                }
                ExtendedType::Interface(interface) => {
                    field_weights(name, &interface.fields, schema, options)?
                }
                _ => HashMap::default(),
            };
            types.insert(type_key(name), TypeWeight { weight, fields });
        }

        let mut roots = HashMap::default();
        for operation_type in [
            ast::OperationType::Query,
            ast::OperationType::Mutation,
            ast::OperationType::Subscription,
        ] {
            if let Some(root) = schema.root_operation(operation_type) {
                roots.insert(operation_key(operation_type), type_key(root));
            }
        }

        Ok(CostSchema { types, roots })
    }

    /// Looks up a type by its lowercased name.
    pub fn type_weight(&self, key: &str) -> Option<&TypeWeight> {
        self.types.get(key)
    }

    /// The table key of the root type serving `operation_type`.
    pub fn root(&self, operation_type: ast::OperationType) -> Option<&str> {
        self.roots
            .get(operation_key(operation_type))
            .map(String::as_str)
    }
}

pub(crate) fn operation_key(operation_type: ast::OperationType) -> &'static str {
    match operation_type {
        ast::OperationType::Query => "query",
        ast::OperationType::Mutation => "mutation",
        ast::OperationType::Subscription => "subscription",
    }
}

fn type_key(name: &Name) -> String {
    name.as_str().to_ascii_lowercase()
}

fn base_weight(name: &Name, ty: &ExtendedType, schema: &Schema, options: &CostOptions) -> u64 {
    let weights = &options.type_weights;
    match ty {
        ExtendedType::Object(object) => {
            if schema.root_operation(ast::OperationType::Mutation) == Some(name) {
                weights.mutation
            } else if is_connection(name, object) {
                weights.connection
            } else {
                weights.object
            }
        }
        ExtendedType::Interface(_) | ExtendedType::Union(_) => weights.object,
        ExtendedType::Scalar(_) | ExtendedType::Enum(_) | ExtendedType::InputObject(_) => {
            weights.scalar
        }
    }
}

/// Relay-style connection detection: the conventional name suffix, or the
/// `edges` + `pageInfo` field pair.
fn is_connection(name: &Name, object: &ObjectType) -> bool {
    name.as_str().ends_with("Connection")
        || (object.fields.contains_key("edges") && object.fields.contains_key("pageInfo"))
}

fn field_weights(
    type_name: &Name,
    fields: &apollo_compiler::collections::IndexMap<Name, Component<FieldDefinition>>,
    schema: &Schema,
    options: &CostOptions,
) -> Result<HashMap<String, FieldWeight>, WeightTableError> {
    let mut out: HashMap<String, FieldWeight> = HashMap::default();
    for (field_name, field) in fields {
        let element = field.ty.inner_named_type();
        let target = schema
            .types
            .get(element)
            .ok_or_else(|| WeightTableError::UnresolvedType(element.to_string()))?;

        let descriptor = if field.ty.is_list() {
            let rule: Box<dyn Multiplier> =
                match slicing_rule(type_name, field_name, field, options)? {
                    Some(rule) => Box::new(rule),
                    None if options.enforce_bounded_lists => {
                        return Err(WeightTableError::UnboundedList {
                            type_name: type_name.to_string(),
                            field_name: field_name.to_string(),
                        });
                    }
                    None => Box::new(AssumedSize(options.default_list_size)),
                };
            FieldWeight::BoundedList {
                type_name: type_key(element),
                rule,
            }
        } else {
            match target {
                ExtendedType::Scalar(_) | ExtendedType::Enum(_) => FieldWeight::Leaf {
                    weight: options.type_weights.scalar,
                },
                _ => FieldWeight::Ref {
                    type_name: type_key(element),
                },
            }
        };
        out.insert(field_name.as_str().to_string(), descriptor);
    }
    Ok(out)
}

fn slicing_rule(
    type_name: &Name,
    field_name: &Name,
    field: &FieldDefinition,
    options: &CostOptions,
) -> Result<Option<SlicingRule>, WeightTableError> {
    let Some(argument) = field.arguments.iter().find(|argument| {
        options
            .slicing_arguments
            .iter()
            .any(|slicing| slicing == argument.name.as_str())
    }) else {
        return Ok(None);
    };

    let schema_default = match argument.default_value.as_deref() {
        None | Some(ast::Value::Null) => None,
        Some(value) => {
            let default = value
                .to_i32()
                .and_then(|default| u64::try_from(default).ok())
                .ok_or_else(|| WeightTableError::InvalidSlicingDefault {
                    type_name: type_name.to_string(),
                    field_name: field_name.to_string(),
                    argument: argument.name.to_string(),
                })?;
            Some(default)
        }
    };

    Ok(Some(SlicingRule {
        argument: argument.name.to_string(),
        schema_default,
        fallback: options.default_list_size,
    }))
}

#[cfg(test)]
mod tests {
    use apollo_compiler::validation::Valid;

    use super::*;

    fn parse(sdl: &str) -> Valid<Schema> {
        Schema::parse_and_validate(sdl, "schema.graphql").expect("test schema is valid")
    }

    fn build(sdl: &str, options: &CostOptions) -> CostSchema {
        CostSchema::build(&parse(sdl), options).expect("weight table builds")
    }

    const SCHEMA: &str = r#"
        type Query {
            hero: Character
            heroes(first: Int = 5): [Character]
            names: [String]
        }

        type Mutation {
            rename(id: ID!, name: String): Character
        }

        type Character {
            id: ID
            name: String
            appearsIn: [Episode]
        }

        type CharacterConnection {
            edges: [CharacterEdge]
            pageInfo: PageInfo
        }

        type CharacterEdge {
            node: Character
        }

        type PageInfo {
            hasNextPage: Boolean
        }

        enum Episode {
            NEWHOPE
            EMPIRE
        }
    "#;

    #[test]
    fn base_weights_follow_type_kind() {
        let table = build(SCHEMA, &CostOptions::default());
        assert_eq!(table.type_weight("query").unwrap().weight, 1);
        assert_eq!(table.type_weight("mutation").unwrap().weight, 10);
        assert_eq!(table.type_weight("character").unwrap().weight, 1);
        assert_eq!(table.type_weight("episode").unwrap().weight, 0);
        assert_eq!(table.type_weight("characterconnection").unwrap().weight, 2);
    }

    #[test]
    fn root_operations_are_keyed_by_kind() {
        let table = build(SCHEMA, &CostOptions::default());
        assert_eq!(table.root(ast::OperationType::Query), Some("query"));
        assert_eq!(table.root(ast::OperationType::Mutation), Some("mutation"));
        assert_eq!(table.root(ast::OperationType::Subscription), None);
    }

    #[test]
    fn introspection_types_are_skipped() {
        let table = build(SCHEMA, &CostOptions::default());
        assert!(table.type_weight("__schema").is_none());
        assert!(table.type_weight("__type").is_none());
    }

    #[test]
    fn fields_are_classified() {
        let table = build(SCHEMA, &CostOptions::default());
        let query = table.type_weight("query").unwrap();
        assert!(matches!(
            query.fields.get("hero"),
            Some(FieldWeight::Ref { type_name }) if type_name == "character"
        ));
        assert!(matches!(
            query.fields.get("heroes"),
            Some(FieldWeight::BoundedList { type_name, .. }) if type_name == "character"
        ));
        let character = table.type_weight("character").unwrap();
        assert!(matches!(
            character.fields.get("name"),
            Some(FieldWeight::Leaf { weight: 0 })
        ));
    }

    #[test]
    fn slicing_defaults_come_from_the_schema() {
        let table = build(SCHEMA, &CostOptions::default());
        let query = table.type_weight("query").unwrap();
        let Some(FieldWeight::BoundedList { rule, .. }) = query.fields.get("heroes") else {
            panic!("heroes is a bounded list");
        };
        let bound = rule.bound("heroes", &[], &[], &Default::default()).unwrap();
        assert_eq!(bound, 5);
    }

    #[test]
    fn unbounded_lists_fall_back_to_the_assumed_size() {
        let options = CostOptions {
            default_list_size: 25,
            ..CostOptions::default()
        };
        let table = build(SCHEMA, &options);
        let query = table.type_weight("query").unwrap();
        let Some(FieldWeight::BoundedList { rule, .. }) = query.fields.get("names") else {
            panic!("names is a list");
        };
        let bound = rule.bound("names", &[], &[], &Default::default()).unwrap();
        assert_eq!(bound, 25);
    }

    #[test]
    fn strict_mode_rejects_unbounded_lists() {
        let options = CostOptions {
            enforce_bounded_lists: true,
            ..CostOptions::default()
        };
        let error = CostSchema::build(&parse(SCHEMA), &options).unwrap_err();
        assert!(matches!(
            error,
            WeightTableError::UnboundedList { ref type_name, .. } if type_name == "Query" || type_name == "Character" || type_name == "CharacterConnection"
        ));
    }

    #[test]
    fn custom_slicing_argument_names_are_honored() {
        let options = CostOptions {
            slicing_arguments: vec!["count".to_string()],
            enforce_bounded_lists: true,
            ..CostOptions::default()
        };
        let table = build(
            r#"
            type Query {
                items(count: Int = 3): [Item]
            }
            type Item {
                id: ID
            }
            "#,
            &options,
        );
        let query = table.type_weight("query").unwrap();
        let Some(FieldWeight::BoundedList { rule, .. }) = query.fields.get("items") else {
            panic!("items is a bounded list");
        };
        assert_eq!(rule.bound("items", &[], &[], &Default::default()).unwrap(), 3);
    }

    #[test]
    fn built_in_scalars_resolve_as_leaves() {
        let table = build(SCHEMA, &CostOptions::default());
        assert_eq!(table.type_weight("string").unwrap().weight, 0);
        assert_eq!(table.type_weight("id").unwrap().weight, 0);
    }
}

//! Static complexity analysis.
//!
//! The analyzer is pure and reentrant: the cost of a document is a function
//! of the document, the request variables, and the weight table, and nothing
//! else. The model is the number of values the query can materialize: an
//! object-typed field costs its type's weight plus its selections, and a
//! bounded list costs its multiplier times the per-element cost.

use apollo_compiler::executable::ExecutableDocument;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use tracing::debug;

use super::AnalyzeError;
use super::schema::CostSchema;
use super::schema::FieldWeight;
use super::schema::TypeWeight;
use super::schema::operation_key;

/// Request variables, as sent by the client next to the query.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Computes the static complexity cost of `document`.
pub fn analyze(
    document: &ExecutableDocument,
    variables: &Variables,
    weights: &CostSchema,
) -> Result<u64, AnalyzeError> {
    let mut cost = 0u64;
    if let Some(operation) = &document.operations.anonymous {
        cost = cost.saturating_add(score_operation(operation, variables, weights)?);
    }
    for operation in document.operations.named.values() {
        cost = cost.saturating_add(score_operation(operation, variables, weights)?);
    }
    Ok(cost)
}

fn score_operation(
    operation: &Operation,
    variables: &Variables,
    weights: &CostSchema,
) -> Result<u64, AnalyzeError> {
    let kind = operation_key(operation.operation_type);
    let root_key = weights
        .root(operation.operation_type)
        .ok_or_else(|| AnalyzeError::UnknownType(kind.to_string()))?;
    let root = lookup(weights, root_key)?;
    let selections =
        score_selection_set(&operation.selection_set, root_key, operation, variables, weights)?;
    Ok(root.weight.saturating_add(selections))
}

fn score_selection_set(
    selection_set: &SelectionSet,
    parent: &str,
    operation: &Operation,
    variables: &Variables,
    weights: &CostSchema,
) -> Result<u64, AnalyzeError> {
    let mut cost = 0u64;
    for selection in &selection_set.selections {
        let contribution = match selection {
            Selection::Field(field) => {
                score_field(field, parent, operation, variables, weights)?
            }
            Selection::FragmentSpread(_) => {
                return Err(AnalyzeError::UnsupportedSelection("fragment spread"));
            }
            Selection::InlineFragment(_) => {
                return Err(AnalyzeError::UnsupportedSelection("inline fragment"));
            }
        };
        cost = cost.saturating_add(contribution);
    }
    Ok(cost)
}

fn score_field(
    field: &Field,
    parent: &str,
    operation: &Operation,
    variables: &Variables,
    weights: &CostSchema,
) -> Result<u64, AnalyzeError> {
    if field.name.as_str() == "__typename" {
        return Ok(0);
    }

    // An object-typed field is costed under its own type's table entry; the
    // table keys field names and type names identically (lowercased), so the
    // lookup by field name settles both root fields and nested references.
    let field_key = field.name.as_str().to_ascii_lowercase();
    if let Some(object) = weights.type_weight(&field_key) {
        let selections =
            score_selection_set(&field.selection_set, &field_key, operation, variables, weights)?;
        return Ok(object.weight.saturating_add(selections));
    }

    let parent_entry = lookup(weights, parent)?;
    let descriptor = parent_entry.fields.get(field.name.as_str()).ok_or_else(|| {
        AnalyzeError::UnknownField {
            type_name: parent.to_string(),
            field: field.name.to_string(),
        }
    })?;

    match descriptor {
        FieldWeight::Leaf { weight } => Ok(*weight),
        FieldWeight::Ref { type_name } => {
            let target = lookup(weights, type_name)?;
            let selections =
                score_selection_set(&field.selection_set, type_name, operation, variables, weights)?;
            Ok(target.weight.saturating_add(selections))
        }
        FieldWeight::BoundedList { type_name, rule } => {
            let bound = rule.bound(
                field.name.as_str(),
                &field.arguments,
                &operation.variables,
                variables,
            )?;
            let target = lookup(weights, type_name)?;
            let selections =
                score_selection_set(&field.selection_set, type_name, operation, variables, weights)?;
            let cost = bound.saturating_mul(target.weight.saturating_add(selections));
            debug!(
                field = field.name.as_str(),
                bound, cost, "scored bounded list field"
            );
            Ok(cost)
        }
    }
}

fn lookup<'a>(weights: &'a CostSchema, key: &str) -> Result<&'a TypeWeight, AnalyzeError> {
    weights
        .type_weight(key)
        .ok_or_else(|| AnalyzeError::UnknownType(key.to_string()))
}

/// Maximum selection nesting across the document's operations.
///
/// Fragment boundaries are transparent; only fields add depth.
pub fn measure_depth(document: &ExecutableDocument) -> u64 {
    let mut depth = 0;
    if let Some(operation) = &document.operations.anonymous {
        depth = depth.max(selection_depth(&operation.selection_set, document));
    }
    for operation in document.operations.named.values() {
        depth = depth.max(selection_depth(&operation.selection_set, document));
    }
    depth
}

fn selection_depth(selection_set: &SelectionSet, document: &ExecutableDocument) -> u64 {
    selection_set
        .selections
        .iter()
        .map(|selection| match selection {
            Selection::Field(field) => 1 + selection_depth(&field.selection_set, document),
            Selection::InlineFragment(inline) => {
                selection_depth(&inline.selection_set, document)
            }
            Selection::FragmentSpread(spread) => document
                .fragments
                .get(&spread.fragment_name)
                .map(|fragment| selection_depth(&fragment.selection_set, document))
                .unwrap_or(0),
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;
    use apollo_compiler::validation::Valid;
    use serde_json::json;

    use super::super::CostOptions;
    use super::*;

    const SCHEMA: &str = include_str!("fixtures/gate_schema.graphql");

    fn schema() -> Valid<Schema> {
        Schema::parse_and_validate(SCHEMA, "gate_schema.graphql").expect("fixture schema is valid")
    }

    fn weights() -> CostSchema {
        CostSchema::build(&schema(), &CostOptions::default()).expect("weight table builds")
    }

    fn document(query: &str) -> ExecutableDocument {
        ExecutableDocument::parse_and_validate(&schema(), query, "query.graphql")
            .expect("test query is valid")
            .into_inner()
    }

    fn cost_with(query: &str, variables: serde_json::Value) -> u64 {
        let variables = match variables {
            serde_json::Value::Object(map) => map,
            _ => panic!("variables must be an object"),
        };
        analyze(&document(query), &variables, &weights()).expect("analysis succeeds")
    }

    fn cost(query: &str) -> u64 {
        cost_with(query, json!({}))
    }

    #[test]
    fn leaf_selection_costs_one_object() {
        assert_eq!(cost("query { scalars { num } }"), 2);
    }

    #[test]
    fn nested_objects_accumulate() {
        assert_eq!(
            cost("query { scalars { num, test { name, scalars { id } } } }"),
            4
        );
    }

    #[test]
    fn aliases_do_not_affect_cost() {
        assert_eq!(cost("query { foo: scalars { num } bar: scalars { id } }"), 3);
    }

    #[test]
    fn list_cost_uses_the_literal_slicing_argument() {
        assert_eq!(
            cost("query { reviews(episode: NEWHOPE, first: 3) { stars, episode } }"),
            4
        );
    }

    #[test]
    fn list_cost_falls_back_to_the_schema_default() {
        assert_eq!(
            cost("query { reviews(episode: NEWHOPE) { stars, episode } }"),
            6
        );
    }

    #[test]
    fn referenced_variable_wins_over_unrelated_slicing_names() {
        assert_eq!(
            cost_with(
                "query ($items: Int) { heroes(episode: NEWHOPE, first: $items) { stars, episode } }",
                json!({ "items": 7, "first": 4 }),
            ),
            8
        );
    }

    #[test]
    fn nested_lists_multiply() {
        assert_eq!(
            cost(
                "query { human(id: 1) { name, friends(first: 5) { name, friends(first: 3) { name } } } }"
            ),
            22
        );
    }

    #[test]
    fn variable_definition_defaults_apply() {
        assert_eq!(
            cost_with(
                "query ($items: Int = 2) { heroes(first: $items) { stars } }",
                json!({}),
            ),
            3
        );
    }

    #[test]
    fn unsliced_lists_assume_the_configured_size() {
        assert_eq!(cost("query { heroes { stars } }"), 101);
    }

    #[test]
    fn mutations_compose_like_queries() {
        assert_eq!(
            cost("mutation { createReview(episode: NEWHOPE, review: { stars: 5 }) { stars } }"),
            11
        );
    }

    #[test]
    fn typename_is_free() {
        assert_eq!(cost("query { __typename scalars { num __typename } }"), 2);
    }

    #[test]
    fn analysis_is_deterministic() {
        let query = "query { human(id: 1) { name, friends(first: 5) { name } } }";
        assert_eq!(cost(query), cost(query));
    }

    #[test]
    fn variable_insertion_order_is_irrelevant() {
        let query = "query ($items: Int) { heroes(first: $items) { stars } }";
        assert_eq!(
            cost_with(query, json!({ "items": 4, "first": 9 })),
            cost_with(query, json!({ "first": 9, "items": 4 })),
        );
    }

    #[test]
    fn non_integer_variable_is_an_invalid_slicing_value() {
        let query = "query ($items: Int) { heroes(first: $items) { stars } }";
        let variables = match json!({ "items": 2.5 }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let error = analyze(&document(query), &variables, &weights()).unwrap_err();
        assert!(matches!(
            error,
            AnalyzeError::InvalidSlicingValue { ref field } if field == "heroes"
        ));
    }

    #[test]
    fn negative_variable_is_an_invalid_slicing_value() {
        let query = "query ($items: Int) { heroes(first: $items) { stars } }";
        let variables = match json!({ "items": -3 }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(matches!(
            analyze(&document(query), &variables, &weights()),
            Err(AnalyzeError::InvalidSlicingValue { .. })
        ));
    }

    #[test]
    fn fragment_spreads_are_unsupported() {
        let query = "query { human(id: 1) { ...props } } fragment props on Human { name }";
        assert!(matches!(
            analyze(&document(query), &Variables::default(), &weights()),
            Err(AnalyzeError::UnsupportedSelection("fragment spread"))
        ));
    }

    #[test]
    fn unknown_fields_are_structural_errors() {
        // Parsed without validation so the selection can miss the table.
        let document =
            ExecutableDocument::parse(&schema(), "query { scalars { bogus } }", "query.graphql")
                .expect("parses");
        let error = analyze(&document, &Variables::default(), &weights()).unwrap_err();
        assert!(matches!(
            error,
            AnalyzeError::UnknownField { ref field, .. } if field == "bogus"
        ));
    }

    #[test]
    fn depth_counts_field_nesting() {
        assert_eq!(measure_depth(&document("query { scalars { num } }")), 2);
        assert_eq!(
            measure_depth(&document(
                "query { human(id: 1) { name, friends(first: 5) { name, friends(first: 3) { name } } } }"
            )),
            4
        );
    }
}

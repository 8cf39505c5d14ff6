//! Selection sets compiled into map projections.
//!
//! Every nested field that needs a traversal gets its own `CALL` subquery
//! returning one value per parent row, so the parent projection only reads
//! variables and never fans out.

use serde_json::Value;
use theseus_cypher::{
    Clause, Expr, MapProjectionItem, MatchClause, NodePattern, ProjectionItem, ReturnClause,
    SubqueryClause, WithClause,
};

use super::context::Context;
use super::filter::{node_filter, targets};
use super::options::{page_node, page_projection, sort_key, ListOptions};
use super::{aggregate, auth, connection, cypher_field, property, traversal};
use crate::operation::ResolveTree;
use crate::prelude::*;
use crate::schema::{
    AuthOperation, CypherField, Entity, Field, FieldKind, ListLimit, Node, PrimitiveField,
    RelationshipField, RelationshipProperties, ScalarKind, TargetKind, ValidationPhase,
};

pub(crate) const TYPENAME: &str = "__typename";

#[derive(Debug, Default)]
pub(crate) struct Projection {
    /// Subqueries and validations that must run before the map is built.
    pub subqueries: Vec<Clause>,
    pub items: Vec<MapProjectionItem>,
}

impl Projection {
    /// The subqueries followed by `WITH var { ... } AS var`.
    pub fn into_clauses(self, var: &str) -> Vec<Clause> {
        let mut clauses = self.subqueries;
        clauses.push(Clause::With(WithClause::new(vec![ProjectionItem::aliased(
            Expr::MapProjection {
                variable: var.to_string(),
                items: self.items,
            },
            var,
        )])));
        clauses
    }
}

/// Options for how a node's map is shaped beyond the user's selection.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Extras<'o> {
    /// Emit `__typename` even when not selected; set in polymorphic branches.
    pub typename: bool,
    /// Fields whose values are carried under `__sort_<field>` for sorting
    /// after projection.
    pub sort: &'o [&'o str],
}

pub(crate) fn aggregate_rows(expr: Expr, list: bool) -> Expr {
    let collected = Expr::call("collect", vec![expr]);
    if list {
        collected
    } else {
        Expr::call("head", vec![collected])
    }
}

pub(crate) fn project_node(
    cx: &mut Context,
    node: &Node,
    var: &str,
    tree: &ResolveTree,
    extras: Extras,
) -> Result<Projection> {
    let selection = tree.fields_for(&node.type_names());
    let selected: Vec<&str> = selection
        .values()
        .filter(|field| node.field(&field.name).is_some())
        .map(|field| field.name.as_str())
        .collect();

    let mut projection = Projection {
        subqueries: auth::validate(
            cx,
            node,
            var,
            AuthOperation::Read,
            ValidationPhase::Before,
            &selected,
        )?,
        items: Vec::new(),
    };
    let mut keys: Vec<String> = Vec::new();

    if extras.typename && !selection.values().any(|f| f.name == TYPENAME) {
        projection
            .items
            .push(MapProjectionItem::Entry(TYPENAME.to_string(), Expr::string(&node.name)));
        keys.push(TYPENAME.to_string());
    }

    for (key, field_tree) in &selection {
        if field_tree.name == TYPENAME {
            projection
                .items
                .push(MapProjectionItem::Entry(key.clone(), Expr::string(&node.name)));
            keys.push(key.clone());
            continue;
        }
        let Some(field) = node.field(&field_tree.name) else {
            if let Some((_, rel)) =
                relationship_by(node, |r| r.names.connection_field == field_tree.name)
            {
                let (subquery, result) =
                    connection::connection_subquery(cx, var, rel, field_tree)?;
                projection.subqueries.push(subquery);
                projection
                    .items
                    .push(MapProjectionItem::Entry(key.clone(), Expr::var(result)));
                keys.push(key.clone());
            } else if let Some((_, rel)) =
                relationship_by(node, |r| r.names.aggregate_field == field_tree.name)
            {
                let (subquery, result) =
                    aggregate::relationship_aggregate(cx, var, rel, field_tree)?;
                projection.subqueries.push(subquery);
                projection
                    .items
                    .push(MapProjectionItem::Entry(key.clone(), Expr::var(result)));
                keys.push(key.clone());
            }
            // Not a field of this concrete type.
            continue;
        };
        if let Some(item) = project_field(cx, node, var, key, field, field_tree, &mut projection)? {
            projection.items.push(item);
            keys.push(key.clone());
        }
    }

    for name in extras.sort {
        let key = sort_key(name);
        let field = node.field(name).ok_or_else(|| {
            TheseusError::validation(format!("Cannot sort {} by unknown field {name}", node.name))
        })?;
        let value = match &field.kind {
            FieldKind::Primitive(primitive) => property(var, primitive),
            FieldKind::Cypher(cypher) if cypher.scalar.is_some() => {
                let (subquery, result) = cypher_field::scalar_subquery(
                    cx,
                    var,
                    &node.name,
                    field,
                    cypher,
                    &serde_json::Map::new(),
                )?;
                projection.subqueries.push(subquery);
                Expr::var(result)
            }
            _ => {
                return Err(TheseusError::validation(format!(
                    "Cannot sort {} by {name}",
                    node.name
                )))
            }
        };
        projection.items.push(MapProjectionItem::Entry(key.clone(), value));
        keys.push(key);
    }

    // Fields an external resolver depends on travel with the row.
    for field in node.fields.values() {
        let FieldKind::Ignored(ignored) = &field.kind else {
            continue;
        };
        if !selection.values().any(|f| f.name == field.name) {
            continue;
        }
        for required in &ignored.requires {
            if keys.iter().any(|k| k == required) {
                continue;
            }
            if let Some(primitive) = node.field(required).and_then(Field::as_primitive) {
                projection.items.push(primitive_item(var, required, primitive, None));
                keys.push(required.clone());
            }
        }
    }
    Ok(projection)
}

fn relationship_by<'n>(
    node: &'n Node,
    predicate: impl Fn(&RelationshipField) -> bool,
) -> Option<(&'n Field, &'n RelationshipField)> {
    node.fields
        .values()
        .find_map(|field| field.as_relationship().filter(|r| predicate(r)).map(|r| (field, r)))
}

fn project_field(
    cx: &mut Context,
    node: &Node,
    var: &str,
    key: &str,
    field: &Field,
    tree: &ResolveTree,
    projection: &mut Projection,
) -> Result<Option<MapProjectionItem>> {
    Ok(match &field.kind {
        FieldKind::Primitive(primitive) => {
            Some(primitive_item(var, key, primitive, Some((field, tree))))
        }
        FieldKind::Relationship(rel) => {
            let (subquery, result) = relationship_subquery(cx, var, rel, tree)?;
            projection.subqueries.push(subquery);
            Some(MapProjectionItem::Entry(key.to_string(), Expr::var(result)))
        }
        FieldKind::Cypher(cypher) => {
            let (subquery, result) = match cypher.target_kind {
                Some(_) => cypher_entity_subquery(cx, var, field, cypher, tree)?,
                None => cypher_field::scalar_subquery(cx, var, &node.name, field, cypher, &tree.args)?,
            };
            projection.subqueries.push(subquery);
            let value = match &cypher.scalar {
                Some(scalar) => present_scalar(Expr::var(result), scalar, field.type_ref.list, tree),
                None => Expr::var(result),
            };
            Some(MapProjectionItem::Entry(key.to_string(), value))
        }
        FieldKind::Computed(computed) => {
            let text = computed
                .template
                .replace("$source", var)
                .replace("$field", &field.name);
            Some(MapProjectionItem::Entry(key.to_string(), Expr::Raw(text)))
        }
        FieldKind::Ignored(_) => None,
    })
}

fn primitive_item(
    var: &str,
    key: &str,
    primitive: &PrimitiveField,
    selection: Option<(&Field, &ResolveTree)>,
) -> MapProjectionItem {
    let list = selection.is_some_and(|(field, _)| field.type_ref.list);
    let plain = !primitive.scalar.is_temporal() && !primitive.scalar.is_spatial();
    if plain && primitive.coalesce.is_none() && key == primitive.db_property {
        return MapProjectionItem::Property(key.to_string());
    }
    let read = property(var, primitive);
    let value = match selection {
        Some((_, tree)) => present_scalar(read, &primitive.scalar, list, tree),
        None => read,
    };
    MapProjectionItem::Entry(key.to_string(), value)
}

/// Map of the selected relationship properties of `var`.
pub(crate) fn edge_projection(
    var: &str,
    properties: &RelationshipProperties,
    tree: &ResolveTree,
) -> Expr {
    let mut items = Vec::new();
    for (key, field_tree) in tree.fields_for(&[properties.name.as_str()]) {
        if field_tree.name == TYPENAME {
            items.push(MapProjectionItem::Entry(key, Expr::string(&properties.name)));
            continue;
        }
        let Some(field) = properties.fields.get(&field_tree.name) else {
            continue;
        };
        if let Some(primitive) = field.as_primitive() {
            items.push(primitive_item(var, &key, primitive, Some((field, field_tree))));
        }
    }
    Expr::MapProjection {
        variable: var.to_string(),
        items,
    }
}

/// Converts a stored scalar into its response form: temporal values as ISO
/// strings, points as maps of the selected coordinates.
pub(crate) fn present_scalar(read: Expr, scalar: &ScalarKind, list: bool, tree: &ResolveTree) -> Expr {
    let single = |value: Expr| -> Expr {
        if scalar.is_temporal() {
            Expr::call("toString", vec![value])
        } else if scalar.is_spatial() {
            point_map(value, scalar, tree)
        } else {
            value
        }
    };
    if !scalar.is_temporal() && !scalar.is_spatial() {
        return read;
    }
    if list {
        let item = "item".to_string();
        Expr::ListComprehension {
            variable: item.clone(),
            list: Box::new(read),
            where_clause: None,
            map: Some(Box::new(single(Expr::var(item)))),
        }
    } else {
        single(read)
    }
}

fn point_map(read: Expr, scalar: &ScalarKind, tree: &ResolveTree) -> Expr {
    let selected = tree.fields_for(&["Point", "CartesianPoint"]);
    let mut entries: Vec<(String, Expr)> = selected
        .iter()
        .filter(|(_, f)| f.name != TYPENAME)
        .map(|(key, f)| (key.clone(), read.clone().property(&f.name)))
        .collect();
    if entries.is_empty() {
        let defaults: &[&str] = match scalar {
            ScalarKind::CartesianPoint => &["x", "y", "z", "crs", "srid"],
            _ => &["longitude", "latitude", "height", "crs", "srid"],
        };
        entries = defaults
            .iter()
            .map(|name| (name.to_string(), read.clone().property(*name)))
            .collect();
    }
    Expr::Case {
        base: None,
        alternatives: vec![(Expr::is_null(read), Expr::null())],
        else_expr: Some(Box::new(Expr::map(entries))),
    }
}

/// `CALL { ... }` returning the projected targets of a relationship field.
pub(crate) fn relationship_subquery(
    cx: &mut Context,
    source: &str,
    rel: &RelationshipField,
    tree: &ResolveTree,
) -> Result<(Clause, String)> {
    let options = ListOptions::resolve(tree.arg("options"), rel.default_options.as_ref())?;
    let direction = rel.read_direction(tree.arg("directed").and_then(Value::as_bool));
    let where_value = tree.arg("where").cloned().unwrap_or(Value::Null);
    let polymorphic = rel.target_kind != TargetKind::Node;
    let post_sort = polymorphic || options.distinct;
    let sort_fields: Vec<&str> = if post_sort {
        options.sort_keys().into_iter().map(|(name, _)| name).collect()
    } else {
        Vec::new()
    };
    let result = cx.value_var();

    let mut branches = Vec::new();
    let mut last_node = None;
    for (node, branch_where) in targets(cx, rel, &where_value)? {
        let target = cx.node_var();
        let pattern = traversal(
            source,
            rel,
            None,
            NodePattern::labelled(&target, &node.labels),
            direction,
        );
        let read = auth::read_filter(cx, node, &target)?;
        let filter = node_filter(cx, node, &target, &branch_where)?.and_predicate(read);

        let mut clauses = vec![Clause::with_vars([source])];
        clauses.extend(filter.apply(MatchClause::new(pattern)));
        if !post_sort && rel.is_list() {
            let limit = options.effective_limit(node.limit, cx.config);
            clauses.extend(page_node(cx, node, &target, &options, limit)?);
        }
        let extras = Extras {
            typename: polymorphic,
            sort: &sort_fields,
        };
        clauses.extend(project_node(cx, node, &target, tree, extras)?.into_clauses(&target));
        if polymorphic {
            clauses.push(Clause::Return(ReturnClause::single(Expr::var(&target), &result)));
        }
        branches.push(clauses);
        last_node = Some((node, target));
    }

    let list_limit = match (polymorphic, last_node.as_ref()) {
        (false, Some((node, _))) => node.limit,
        _ => ListLimit::default(),
    };
    let limit = if rel.is_list() {
        options.effective_limit(list_limit, cx.config)
    } else {
        None
    };

    let clauses = match (polymorphic, last_node) {
        (false, Some((_, target))) => {
            let mut clauses = branches.pop().unwrap_or_default();
            if post_sort && rel.is_list() {
                clauses.extend(page_projection(cx, &target, &options, limit));
            }
            clauses.push(Clause::Return(ReturnClause::single(
                aggregate_rows(Expr::var(&target), rel.is_list()),
                &result,
            )));
            clauses
        }
        (_, None) => {
            vec![
                Clause::with_vars([source]),
                Clause::Return(ReturnClause::single(
                    if rel.is_list() {
                        Expr::list(Vec::new())
                    } else {
                        Expr::null()
                    },
                    &result,
                )),
            ]
        }
        (true, Some(_)) => {
            let mut clauses = vec![
                Clause::with_vars([source]),
                Clause::Subquery(SubqueryClause::union(branches)),
                Clause::with_vars([result.as_str()]),
            ];
            if rel.is_list() {
                clauses.extend(page_projection(cx, &result, &options, limit));
            }
            clauses.push(Clause::Return(ReturnClause::single(
                aggregate_rows(Expr::var(&result), rel.is_list()),
                &result,
            )));
            clauses
        }
    };
    Ok((Clause::Subquery(SubqueryClause::new(clauses)), result))
}

/// Projects the value bound to `var` as an object of `type_name`; afterwards
/// `var` holds the projected map. Rows the reader may not see are dropped.
pub(crate) fn project_bound(
    cx: &mut Context,
    type_name: &str,
    var: &str,
    tree: &ResolveTree,
) -> Result<Vec<Clause>> {
    let entity = cx
        .schema
        .entity(type_name)
        .ok_or_else(|| TheseusError::schema(format!("Unknown type {type_name}")))?;
    if let Entity::Node(node) = entity {
        let mut clauses = Vec::new();
        if let Some(read) = auth::read_filter(cx, node, var)? {
            clauses.push(Clause::With(WithClause::star().filtered(Some(read))));
        }
        clauses.extend(project_node(cx, node, var, tree, Extras::default())?.into_clauses(var));
        return Ok(clauses);
    }

    let projected = cx.value_var();
    let mut branches = Vec::new();
    for node in cx.schema.concrete_nodes(type_name) {
        let label = Expr::HasLabel {
            expr: Box::new(Expr::var(var)),
            labels: vec![node.main_label().to_string()],
        };
        let read = auth::read_filter(cx, node, var)?;
        let mut clauses = vec![
            Clause::with_vars([var]),
            Clause::With(
                WithClause::new(vec![ProjectionItem::new(Expr::var(var))])
                    .filtered(Expr::and_all([label].into_iter().chain(read))),
            ),
        ];
        let extras = Extras {
            typename: true,
            sort: &[],
        };
        let projection = project_node(cx, node, var, tree, extras)?;
        clauses.extend(projection.subqueries);
        clauses.push(Clause::Return(ReturnClause::single(
            Expr::MapProjection {
                variable: var.to_string(),
                items: projection.items,
            },
            &projected,
        )));
        branches.push(clauses);
    }
    Ok(vec![
        Clause::Subquery(SubqueryClause::union(branches)),
        Clause::With(WithClause::new(vec![ProjectionItem::aliased(
            Expr::var(projected),
            var,
        )])),
    ])
}

fn cypher_entity_subquery(
    cx: &mut Context,
    source: &str,
    field: &Field,
    cypher: &CypherField,
    tree: &ResolveTree,
) -> Result<(Clause, String)> {
    let result = cx.value_var();
    let row = cx.node_var();
    let mut clauses = vec![
        Clause::with_vars([source]),
        cypher_field::statement_call(cx, Some(source), cypher, &tree.args),
        Clause::With(WithClause::new(vec![ProjectionItem::aliased(
            Expr::var(&cypher.column_name),
            &row,
        )])),
    ];
    clauses.extend(project_bound(cx, &field.type_ref.name, &row, tree)?);
    clauses.push(Clause::Return(ReturnClause::single(
        aggregate_rows(Expr::var(&row), field.type_ref.list),
        &result,
    )));
    Ok((Clause::Subquery(SubqueryClause::new(clauses)), result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::AuthContext;
    use crate::config::Config;
    use crate::schema::{SchemaDocument, SchemaModel};
    use serde_json::json;
    use theseus_cypher::render_clauses;

    fn schema() -> SchemaModel {
        let document: SchemaDocument = serde_json::from_value(json!({
            "nodes": [
                {
                    "name": "Movie",
                    "fields": [
                        {"name": "title", "type": "String"},
                        {"name": "released", "type": "Int"},
                        {
                            "name": "label",
                            "type": "String",
                            "computed": {"template": "$source.title + ' (' + toString($source.released) + ')'"}
                        },
                        {
                            "name": "actors",
                            "type": "Actor",
                            "list": true,
                            "relationship": {"type": "ACTED_IN", "direction": "IN"}
                        }
                    ]
                },
                {
                    "name": "Actor",
                    "fields": [
                        {"name": "name", "type": "String"},
                        {
                            "name": "credits",
                            "type": "Int",
                            "cypher": {
                                "statement": "MATCH (this)-[:ACTED_IN]->(m:Movie) RETURN count(m) AS total",
                                "columnName": "total"
                            }
                        }
                    ]
                }
            ]
        }))
        .unwrap();
        SchemaModel::build(&document, &Config::default()).unwrap()
    }

    fn nested_actors(fields: &[&str]) -> ResolveTree {
        ResolveTree::new("actors").with_fields(
            "Actor",
            fields.iter().map(|field| ResolveTree::new(*field)).collect(),
        )
    }

    #[test]
    fn cypher_fields_inside_relationships_run_per_related_node() {
        let schema = schema();
        let config = Config::default();
        let auth = AuthContext::anonymous();
        let mut cx = Context::new(&schema, &config, &auth);
        let movie = schema.node("Movie").unwrap();
        let rel = movie.field("actors").and_then(Field::as_relationship).unwrap();

        let (subquery, result) =
            relationship_subquery(&mut cx, "this", rel, &nested_actors(&["name", "credits"])).unwrap();
        let text = render_clauses(&[subquery], 0);
        assert_eq!(result, "var0");
        assert!(text.contains("MATCH (this)<-[:ACTED_IN]-(this1:Actor)"), "{text}");
        assert!(text.contains("WITH this1\n"), "{text}");
        assert!(text.contains("WITH this1 AS this\n"), "{text}");
        assert!(
            text.contains("MATCH (this)-[:ACTED_IN]->(m:Movie) RETURN count(m) AS total"),
            "{text}"
        );
        assert!(text.contains("WITH total AS var2"), "{text}");
        assert!(text.contains("RETURN head(collect(var2)) AS var2"), "{text}");
        assert!(text.contains("WITH this1 { .name, credits: var2 } AS this1"), "{text}");
        assert!(text.contains("RETURN collect(this1) AS var0"), "{text}");
    }

    #[test]
    fn computed_fields_expand_their_template() {
        let schema = schema();
        let config = Config::default();
        let auth = AuthContext::anonymous();
        let mut cx = Context::new(&schema, &config, &auth);
        let movie = schema.node("Movie").unwrap();
        let tree = ResolveTree::new("movies")
            .with_fields("Movie", vec![ResolveTree::new("label")]);

        let projection = project_node(&mut cx, movie, "this", &tree, Extras::default()).unwrap();
        let text = render_clauses(&projection.into_clauses("this"), 0);
        assert_eq!(
            text,
            "WITH this { label: this.title + ' (' + toString(this.released) + ')' } AS this"
        );
    }
}

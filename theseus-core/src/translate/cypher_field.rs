//! User supplied `@cypher` statements embedded as subqueries.

use serde_json::{Map, Value};
use theseus_cypher::{Clause, Expr, ProjectionItem, ReturnClause, SubqueryClause, WithClause};

use super::context::Context;
use crate::prelude::*;
use crate::schema::{CypherField, Field};

/// Rewrites every `$name` outside of string literals through `f`; names `f`
/// returns `None` for are kept.
pub(crate) fn rewrite_parameters(
    statement: &str,
    mut f: impl FnMut(&str) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(statement.len());
    let mut chars = statement.char_indices().peekable();
    let mut quote: Option<char> = None;
    while let Some((idx, c)) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                out.push(c);
            }
            (Some(_), '\\') => {
                out.push(c);
                if let Some((_, escaped)) = chars.next() {
                    out.push(escaped);
                }
            }
            (Some(_), c) => out.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                out.push(c);
            }
            (None, '$') => {
                let start = idx + 1;
                let mut end = start;
                while let Some((i, next)) = chars.peek() {
                    if next.is_alphanumeric() || *next == '_' {
                        end = i + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &statement[start..end];
                match f(name) {
                    Some(replacement) if !name.is_empty() => {
                        out.push('$');
                        out.push_str(&replacement);
                    }
                    _ => {
                        out.push('$');
                        out.push_str(name);
                    }
                }
            }
            (None, c) => out.push(c),
        }
    }
    out
}

/// The statement text with declared arguments bound to fresh parameters and
/// `$jwt` / `$context` bound to the request's claims and context.
pub(crate) fn bind_statement(cx: &mut Context, cypher: &CypherField, args: &Map<String, Value>) -> String {
    rewrite_parameters(&cypher.statement, |name| {
        if let Some(argument) = cypher.arguments.iter().find(|a| a.name == name) {
            let value = args
                .get(name)
                .filter(|v| !v.is_null())
                .or(argument.default.as_ref())
                .cloned()
                .unwrap_or(Value::Null);
            return Some(cx.env.param_name(value));
        }
        match name {
            "jwt" => {
                cx.jwt();
                Some(name.to_string())
            }
            "context" => {
                cx.context_param();
                Some(name.to_string())
            }
            _ => None,
        }
    })
}

/// `CALL { ... }` running the user statement, with `this` bound to `source`
/// when there is one.
pub(crate) fn statement_call(
    cx: &mut Context,
    source: Option<&str>,
    cypher: &CypherField,
    args: &Map<String, Value>,
) -> Clause {
    let statement = bind_statement(cx, cypher, args);
    let mut clauses = Vec::new();
    if let Some(source) = source {
        clauses.push(Clause::with_vars([source]));
        if source != "this" {
            clauses.push(Clause::With(WithClause::new(vec![ProjectionItem::aliased(
                Expr::var(source),
                "this",
            )])));
        }
    }
    clauses.push(Clause::Raw(statement));
    Clause::Subquery(SubqueryClause::new(clauses))
}

/// Wraps `statement_call` so it yields one value per source row: the first
/// row for scalar fields, the collected rows for list fields.
pub(crate) fn scalar_subquery(
    cx: &mut Context,
    source: &str,
    owner: &str,
    field: &Field,
    cypher: &CypherField,
    args: &Map<String, Value>,
) -> Result<(Clause, String)> {
    if cypher.target_kind.is_some() {
        return Err(TheseusError::validation(format!(
            "{owner}.{} returns objects, not a scalar",
            field.name
        )));
    }
    let result = cx.value_var();
    let call = statement_call(cx, Some(source), cypher, args);
    let collected = Expr::call("collect", vec![Expr::var(&result)]);
    let value = if field.type_ref.list {
        collected
    } else {
        Expr::call("head", vec![collected])
    };
    let clauses = vec![
        Clause::with_vars([source]),
        call,
        Clause::With(WithClause::new(vec![ProjectionItem::aliased(
            Expr::var(&cypher.column_name),
            &result,
        )])),
        Clause::Return(ReturnClause::single(value, &result)),
    ];
    Ok((Clause::Subquery(SubqueryClause::new(clauses)), result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_parameters_outside_strings() {
        let out = rewrite_parameters(
            "MATCH (m) WHERE m.title = $title AND m.tag = '$title' RETURN $limit, $jwt.sub",
            |name| match name {
                "title" => Some("param0".to_string()),
                "jwt" => Some("jwt".to_string()),
                _ => None,
            },
        );
        assert_eq!(
            out,
            "MATCH (m) WHERE m.title = $param0 AND m.tag = '$title' RETURN $limit, $jwt.sub"
        );
    }
}

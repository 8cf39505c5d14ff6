use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::ast::*;
use crate::CypherError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    ReadOnly,
    ReadWrite,
}

/// Checks a generated statement before it leaves the compiler: it must end
/// with `RETURN`, read-only statements may not write, and every referenced
/// parameter must be bound.
pub fn validate_statement(
    statement: &Statement,
    params: &BTreeMap<String, Value>,
    mode: ValidationMode,
) -> Result<(), CypherError> {
    let Some(last) = statement.clauses.last() else {
        return Err(CypherError::semantic("statement contains no clauses"));
    };
    if !matches!(last, Clause::Return(_)) {
        return Err(CypherError::semantic("statement must end with RETURN"));
    }

    let mut visitor = Visitor::default();
    visitor.clauses(&statement.clauses);

    if mode == ValidationMode::ReadOnly {
        if let Some(kind) = visitor.updating.first() {
            return Err(CypherError::semantic(format!(
                "updating clause not allowed in read-only statement: {kind}"
            )));
        }
    }

    for name in &visitor.parameters {
        if !params.contains_key(name) {
            return Err(CypherError::UnboundParameter { name: name.clone() });
        }
    }
    Ok(())
}

#[derive(Default)]
struct Visitor {
    updating: Vec<&'static str>,
    parameters: BTreeSet<String>,
}

impl Visitor {
    fn clauses(&mut self, clauses: &[Clause]) {
        for clause in clauses {
            self.clause(clause);
        }
    }

    fn clause(&mut self, clause: &Clause) {
        match clause {
            Clause::Match(m) => {
                self.patterns(&m.patterns);
                self.opt(&m.where_clause);
            }
            Clause::Create(c) => {
                self.updating.push("CREATE");
                self.patterns(&c.patterns);
            }
            Clause::Merge(m) => {
                self.updating.push("MERGE");
                self.pattern(&m.pattern);
                self.set_items(&m.on_create);
                self.set_items(&m.on_match);
            }
            Clause::Set(s) => {
                self.updating.push("SET");
                self.set_items(&s.items);
            }
            Clause::Delete(d) => {
                self.updating.push("DELETE");
                d.items.iter().for_each(|e| self.expr(e));
            }
            Clause::Foreach(f) => {
                self.updating.push("FOREACH");
                self.expr(&f.list);
                self.clauses(&f.clauses);
            }
            Clause::Unwind(u) => self.expr(&u.expression),
            Clause::With(w) => {
                self.items(&w.items);
                self.window(&w.order, &w.skip, &w.limit);
                self.opt(&w.where_clause);
            }
            Clause::Return(r) => {
                self.items(&r.items);
                self.window(&r.order, &r.skip, &r.limit);
            }
            Clause::Call(c) => c.args.iter().for_each(|e| self.expr(e)),
            Clause::Subquery(s) => s.branches.iter().for_each(|b| self.clauses(b)),
            Clause::Raw(text) => self.raw(text),
        }
    }

    fn items(&mut self, items: &[ProjectionItem]) {
        items.iter().for_each(|item| self.expr(&item.expr));
    }

    fn set_items(&mut self, items: &[SetItem]) {
        for item in items {
            self.expr(&item.target);
            self.expr(&item.value);
        }
    }

    fn window(&mut self, order: &Option<OrderBy>, skip: &Option<Expr>, limit: &Option<Expr>) {
        if let Some(order) = order {
            order.items.iter().for_each(|item| self.expr(&item.expr));
        }
        self.opt(skip);
        self.opt(limit);
    }

    fn opt(&mut self, expr: &Option<Expr>) {
        if let Some(expr) = expr {
            self.expr(expr);
        }
    }

    fn patterns(&mut self, patterns: &[Pattern]) {
        patterns.iter().for_each(|p| self.pattern(p));
    }

    fn pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Node(node) => self.node(node),
            Pattern::Path(path) => {
                self.node(&path.start);
                for segment in &path.segments {
                    segment.rel.properties.iter().for_each(|(_, e)| self.expr(e));
                    self.node(&segment.node);
                }
            }
        }
    }

    fn node(&mut self, node: &NodePattern) {
        node.properties.iter().for_each(|(_, e)| self.expr(e));
    }

    fn raw(&mut self, text: &str) {
        for (idx, c) in text.char_indices() {
            if c != '$' {
                continue;
            }
            let rest = &text[idx + 1..];
            let len = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            if len > 0 && !rest.starts_with(|ch: char| ch.is_ascii_digit()) {
                self.parameters.insert(rest[..len].to_string());
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Parameter(name) => {
                self.parameters.insert(name.clone());
            }
            Expr::Raw(text) => self.raw(text),
            Expr::Literal(Literal::List(items)) => items.iter().for_each(|e| self.expr(e)),
            Expr::Literal(Literal::Map(entries)) => entries.iter().for_each(|(_, e)| self.expr(e)),
            Expr::Literal(_) | Expr::Variable(_) | Expr::Star | Expr::CountStar => {}
            Expr::PropertyAccess { expr, .. }
            | Expr::UnaryOp { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::HasLabel { expr, .. } => self.expr(expr),
            Expr::IndexAccess { expr, index } => {
                self.expr(expr);
                self.expr(index);
            }
            Expr::ListSlice { expr, start, end } => {
                self.expr(expr);
                if let Some(start) = start {
                    self.expr(start);
                }
                if let Some(end) = end {
                    self.expr(end);
                }
            }
            Expr::FunctionCall { args, .. } => args.iter().for_each(|e| self.expr(e)),
            Expr::BinaryOp { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::In { expr, list } => {
                self.expr(expr);
                self.expr(list);
            }
            Expr::Case {
                base,
                alternatives,
                else_expr,
            } => {
                if let Some(base) = base {
                    self.expr(base);
                }
                for (when, then) in alternatives {
                    self.expr(when);
                    self.expr(then);
                }
                if let Some(else_expr) = else_expr {
                    self.expr(else_expr);
                }
            }
            Expr::Exists { clauses } | Expr::CountSubquery { clauses } => {
                let before = self.updating.len();
                self.clauses(clauses);
                self.updating.truncate(before);
            }
            Expr::ListComprehension {
                list,
                where_clause,
                map,
                ..
            } => {
                self.expr(list);
                if let Some(predicate) = where_clause {
                    self.expr(predicate);
                }
                if let Some(map) = map {
                    self.expr(map);
                }
            }
            Expr::PatternComprehension {
                pattern,
                where_clause,
                map,
            } => {
                self.pattern(pattern);
                if let Some(predicate) = where_clause {
                    self.expr(predicate);
                }
                self.expr(map);
            }
            Expr::Quantifier {
                list, where_clause, ..
            } => {
                self.expr(list);
                if let Some(predicate) = where_clause {
                    self.expr(predicate);
                }
            }
            Expr::Reduce {
                init, list, expr, ..
            } => {
                self.expr(init);
                self.expr(list);
                self.expr(expr);
            }
            Expr::MapProjection { items, .. } => {
                for item in items {
                    if let MapProjectionItem::Entry(_, value) = item {
                        self.expr(value);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_statement(param: &str) -> Statement {
        Statement::new(vec![
            Clause::Match(
                MatchClause::new(Pattern::node(NodePattern::labelled(
                    "this",
                    &["Movie".to_string()],
                )))
                .filtered(Some(Expr::eq(
                    Expr::var("this").property("title"),
                    Expr::param(param),
                ))),
            ),
            Clause::Return(ReturnClause::single(Expr::var("this"), "this")),
        ])
    }

    #[test]
    fn accepts_bound_read_statement() {
        let params = BTreeMap::from([("param0".to_string(), json!("x"))]);
        validate_statement(&read_statement("param0"), &params, ValidationMode::ReadOnly).unwrap();
    }

    #[test]
    fn rejects_unbound_parameter() {
        let err = validate_statement(
            &read_statement("param7"),
            &BTreeMap::new(),
            ValidationMode::ReadOnly,
        )
        .unwrap_err();
        assert!(matches!(err, CypherError::UnboundParameter { name } if name == "param7"));
    }

    #[test]
    fn rejects_writes_in_read_only_mode() {
        let statement = Statement::new(vec![
            Clause::Create(CreateClause {
                patterns: vec![Pattern::node(NodePattern::named("this0"))],
            }),
            Clause::Return(ReturnClause::single(Expr::var("this0"), "this")),
        ]);
        assert!(
            validate_statement(&statement, &BTreeMap::new(), ValidationMode::ReadOnly).is_err()
        );
        validate_statement(&statement, &BTreeMap::new(), ValidationMode::ReadWrite).unwrap();
    }

    #[test]
    fn collects_parameters_from_raw_text() {
        let statement = Statement::new(vec![
            Clause::Raw("MATCH (n) WHERE n.id = $param3 RETURN n".to_string()),
            Clause::Return(ReturnClause::single(Expr::var("n"), "this")),
        ]);
        let err =
            validate_statement(&statement, &BTreeMap::new(), ValidationMode::ReadOnly).unwrap_err();
        assert!(matches!(err, CypherError::UnboundParameter { name } if name == "param3"));
    }

    #[test]
    fn requires_trailing_return() {
        let statement = Statement::new(vec![Clause::with_star()]);
        assert!(
            validate_statement(&statement, &BTreeMap::new(), ValidationMode::ReadOnly).is_err()
        );
    }
}

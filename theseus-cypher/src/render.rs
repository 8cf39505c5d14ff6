use std::fmt;

use crate::ast::*;

const INDENT: &str = "    ";

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_clauses(&self.clauses, 0))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_expr(self, 0))
    }
}

/// Quotes a label, relationship type or property key when it is not a plain
/// identifier.
pub fn escape_name(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if plain {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

pub fn render_clauses(clauses: &[Clause], depth: usize) -> String {
    clauses
        .iter()
        .map(|clause| render_clause(clause, depth))
        .collect::<Vec<_>>()
        .join("\n")
}

fn pad(depth: usize) -> String {
    INDENT.repeat(depth)
}

fn render_clause(clause: &Clause, depth: usize) -> String {
    let p = pad(depth);
    match clause {
        Clause::Match(m) => {
            let keyword = if m.optional { "OPTIONAL MATCH" } else { "MATCH" };
            let mut out = format!("{p}{keyword} {}", render_patterns(&m.patterns, depth));
            if let Some(predicate) = &m.where_clause {
                out.push_str(&format!("\n{p}WHERE {}", render_expr(predicate, depth)));
            }
            out
        }
        Clause::Create(c) => format!("{p}CREATE {}", render_patterns(&c.patterns, depth)),
        Clause::Merge(m) => {
            let mut out = format!("{p}MERGE {}", render_pattern(&m.pattern, depth));
            if !m.on_create.is_empty() {
                out.push_str(&format!(
                    "\n{p}ON CREATE SET {}",
                    render_set_items(&m.on_create, depth)
                ));
            }
            if !m.on_match.is_empty() {
                out.push_str(&format!(
                    "\n{p}ON MATCH SET {}",
                    render_set_items(&m.on_match, depth)
                ));
            }
            out
        }
        Clause::Set(s) => format!("{p}SET {}", render_set_items(&s.items, depth)),
        Clause::Delete(d) => {
            let keyword = if d.detach { "DETACH DELETE" } else { "DELETE" };
            let items = d
                .items
                .iter()
                .map(|item| render_expr(item, depth))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{p}{keyword} {items}")
        }
        Clause::Foreach(f) => {
            let inner = f
                .clauses
                .iter()
                .map(|clause| render_clause(clause, 0).replace('\n', " "))
                .collect::<Vec<_>>()
                .join(" ");
            format!(
                "{p}FOREACH ({} IN {} | {inner})",
                f.variable,
                render_expr(&f.list, depth)
            )
        }
        Clause::Unwind(u) => format!(
            "{p}UNWIND {} AS {}",
            render_expr(&u.expression, depth),
            u.variable
        ),
        Clause::With(w) => {
            let mut out = format!(
                "{p}WITH {}{}",
                if w.distinct { "DISTINCT " } else { "" },
                render_items(&w.items, depth)
            );
            push_window(&mut out, &p, depth, &w.order, &w.skip, &w.limit);
            if let Some(predicate) = &w.where_clause {
                out.push_str(&format!("\n{p}WHERE {}", render_expr(predicate, depth)));
            }
            out
        }
        Clause::Return(r) => {
            let mut out = format!(
                "{p}RETURN {}{}",
                if r.distinct { "DISTINCT " } else { "" },
                render_items(&r.items, depth)
            );
            push_window(&mut out, &p, depth, &r.order, &r.skip, &r.limit);
            out
        }
        Clause::Call(c) => {
            let args = c
                .args
                .iter()
                .map(|arg| render_expr(arg, depth))
                .collect::<Vec<_>>()
                .join(", ");
            let mut out = format!("{p}CALL {}({args})", c.name);
            if let Some(yields) = &c.yields {
                let items = yields
                    .iter()
                    .map(|item| match &item.alias {
                        Some(alias) => format!("{} AS {alias}", item.name),
                        None => item.name.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!(" YIELD {items}"));
            }
            out
        }
        Clause::Subquery(s) => {
            let separator = format!("\n{}UNION\n", pad(depth + 1));
            let body = s
                .branches
                .iter()
                .map(|branch| render_clauses(branch, depth + 1))
                .collect::<Vec<_>>()
                .join(&separator);
            format!("{p}CALL {{\n{body}\n{p}}}")
        }
        Clause::Raw(text) => text
            .trim()
            .lines()
            .map(|line| format!("{p}{line}"))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn push_window(
    out: &mut String,
    p: &str,
    depth: usize,
    order: &Option<OrderBy>,
    skip: &Option<Expr>,
    limit: &Option<Expr>,
) {
    if let Some(order) = order {
        let items = order
            .items
            .iter()
            .map(|item| {
                let direction = match item.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("{} {direction}", render_expr(&item.expr, depth))
            })
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("\n{p}ORDER BY {items}"));
    }
    if let Some(skip) = skip {
        out.push_str(&format!("\n{p}SKIP {}", render_expr(skip, depth)));
    }
    if let Some(limit) = limit {
        out.push_str(&format!("\n{p}LIMIT {}", render_expr(limit, depth)));
    }
}

fn render_items(items: &[ProjectionItem], depth: usize) -> String {
    items
        .iter()
        .map(|item| {
            let expr = render_expr(&item.expr, depth);
            match &item.alias {
                Some(alias) if *alias != expr => format!("{expr} AS {alias}"),
                _ => expr,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_set_items(items: &[SetItem], depth: usize) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "{} = {}",
                render_expr(&item.target, depth),
                render_expr(&item.value, depth)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_patterns(patterns: &[Pattern], depth: usize) -> String {
    patterns
        .iter()
        .map(|pattern| render_pattern(pattern, depth))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_pattern(pattern: &Pattern, depth: usize) -> String {
    match pattern {
        Pattern::Node(node) => render_node(node, depth),
        Pattern::Path(path) => {
            let mut out = render_node(&path.start, depth);
            for segment in &path.segments {
                out.push_str(&render_relationship(&segment.rel, depth));
                out.push_str(&render_node(&segment.node, depth));
            }
            out
        }
    }
}

fn render_node(node: &NodePattern, depth: usize) -> String {
    let mut out = String::from("(");
    if let Some(variable) = &node.variable {
        out.push_str(variable);
    }
    for label in &node.labels {
        out.push(':');
        out.push_str(&escape_name(label));
    }
    if !node.properties.is_empty() {
        if node.variable.is_some() || !node.labels.is_empty() {
            out.push(' ');
        }
        out.push_str(&render_map(&node.properties, depth));
    }
    out.push(')');
    out
}

fn render_relationship(rel: &RelationshipDetail, depth: usize) -> String {
    let mut detail = String::new();
    if let Some(variable) = &rel.variable {
        detail.push_str(variable);
    }
    if !rel.types.is_empty() {
        detail.push(':');
        detail.push_str(
            &rel.types
                .iter()
                .map(|t| escape_name(t))
                .collect::<Vec<_>>()
                .join("|"),
        );
    }
    if !rel.properties.is_empty() {
        if !detail.is_empty() {
            detail.push(' ');
        }
        detail.push_str(&render_map(&rel.properties, depth));
    }
    let body = if detail.is_empty() {
        String::new()
    } else {
        format!("[{detail}]")
    };
    match rel.direction {
        RelationshipDirection::LeftToRight => format!("-{body}->"),
        RelationshipDirection::RightToLeft => format!("<-{body}-"),
        RelationshipDirection::Undirected => format!("-{body}-"),
    }
}

fn render_map(entries: &[(String, Expr)], depth: usize) -> String {
    if entries.is_empty() {
        return "{}".to_string();
    }
    let body = entries
        .iter()
        .map(|(key, value)| format!("{}: {}", escape_name(key), render_expr(value, depth)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{ {body} }}")
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::BinaryOp { op, .. } => match op {
            BinaryOp::Or => 1,
            BinaryOp::Xor => 2,
            BinaryOp::And => 3,
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::Lt
            | BinaryOp::Gt
            | BinaryOp::Lte
            | BinaryOp::Gte
            | BinaryOp::StartsWith
            | BinaryOp::EndsWith
            | BinaryOp::Contains
            | BinaryOp::RegexMatch => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 7,
            BinaryOp::Pow => 8,
        },
        Expr::UnaryOp { op: UnaryOp::Not, .. } => 4,
        Expr::IsNull { .. } | Expr::In { .. } => 5,
        Expr::UnaryOp { .. } => 9,
        _ => 10,
    }
}

fn is_boolean(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Or | BinaryOp::Xor | BinaryOp::And)
}

fn associative(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Or | BinaryOp::Xor | BinaryOp::And | BinaryOp::Add | BinaryOp::Mul
    )
}

fn operand(parent: BinaryOp, child: &Expr, right: bool, depth: usize) -> String {
    let parent_prec = precedence(&Expr::binary(parent, Expr::Star, Expr::Star));
    let child_prec = precedence(child);
    let mixed_boolean = matches!(child, Expr::BinaryOp { op, .. } if is_boolean(*op) && is_boolean(parent) && *op != parent);
    let wrap = child_prec < parent_prec
        || mixed_boolean
        || (child_prec == parent_prec && (parent_prec == 5 || (right && !associative(parent))));
    let rendered = render_expr(child, depth);
    if wrap {
        format!("({rendered})")
    } else {
        rendered
    }
}

fn wrap_below(expr: &Expr, threshold: u8, depth: usize) -> String {
    let rendered = render_expr(expr, depth);
    if precedence(expr) < threshold {
        format!("({rendered})")
    } else {
        rendered
    }
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "OR",
        BinaryOp::Xor => "XOR",
        BinaryOp::And => "AND",
        BinaryOp::Eq => "=",
        BinaryOp::Neq => "<>",
        BinaryOp::Lt => "<",
        BinaryOp::Gt => ">",
        BinaryOp::Lte => "<=",
        BinaryOp::Gte => ">=",
        BinaryOp::StartsWith => "STARTS WITH",
        BinaryOp::EndsWith => "ENDS WITH",
        BinaryOp::Contains => "CONTAINS",
        BinaryOp::RegexMatch => "=~",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "^",
    }
}

fn render_block(keyword: &str, clauses: &[Clause], depth: usize) -> String {
    format!(
        "{keyword} {{\n{}\n{}}}",
        render_clauses(clauses, depth + 1),
        pad(depth)
    )
}

fn render_expr(expr: &Expr, depth: usize) -> String {
    match expr {
        Expr::Literal(literal) => render_literal(literal, depth),
        Expr::Variable(name) => name.clone(),
        Expr::Star => "*".to_string(),
        Expr::PropertyAccess { expr, key } => {
            format!("{}.{}", wrap_below(expr, 10, depth), escape_name(key))
        }
        Expr::IndexAccess { expr, index } => format!(
            "{}[{}]",
            wrap_below(expr, 10, depth),
            render_expr(index, depth)
        ),
        Expr::ListSlice { expr, start, end } => format!(
            "{}[{}..{}]",
            wrap_below(expr, 10, depth),
            start
                .as_ref()
                .map(|e| render_expr(e, depth))
                .unwrap_or_default(),
            end.as_ref()
                .map(|e| render_expr(e, depth))
                .unwrap_or_default()
        ),
        Expr::FunctionCall { name, args } => format!(
            "{name}({})",
            args.iter()
                .map(|arg| render_expr(arg, depth))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Expr::CountStar => "count(*)".to_string(),
        Expr::UnaryOp { op, expr } => match op {
            UnaryOp::Not => format!("NOT ({})", render_expr(expr, depth)),
            UnaryOp::Neg => format!("-{}", wrap_below(expr, 9, depth)),
            UnaryOp::Pos => format!("+{}", wrap_below(expr, 9, depth)),
        },
        Expr::BinaryOp { op, left, right } => format!(
            "{} {} {}",
            operand(*op, left, false, depth),
            binary_symbol(*op),
            operand(*op, right, true, depth)
        ),
        Expr::IsNull { expr, negated } => format!(
            "{} IS {}NULL",
            wrap_below(expr, 6, depth),
            if *negated { "NOT " } else { "" }
        ),
        Expr::In { expr, list } => format!(
            "{} IN {}",
            wrap_below(expr, 6, depth),
            wrap_below(list, 6, depth)
        ),
        Expr::HasLabel { expr, labels } => format!(
            "{}{}",
            wrap_below(expr, 10, depth),
            labels
                .iter()
                .map(|label| format!(":{}", escape_name(label)))
                .collect::<String>()
        ),
        Expr::Case {
            base,
            alternatives,
            else_expr,
        } => {
            let mut out = String::from("CASE");
            if let Some(base) = base {
                out.push_str(&format!(" {}", render_expr(base, depth)));
            }
            for (when, then) in alternatives {
                out.push_str(&format!(
                    " WHEN {} THEN {}",
                    render_expr(when, depth),
                    render_expr(then, depth)
                ));
            }
            if let Some(else_expr) = else_expr {
                out.push_str(&format!(" ELSE {}", render_expr(else_expr, depth)));
            }
            out.push_str(" END");
            out
        }
        Expr::Exists { clauses } => render_block("EXISTS", clauses, depth),
        Expr::CountSubquery { clauses } => render_block("COUNT", clauses, depth),
        Expr::ListComprehension {
            variable,
            list,
            where_clause,
            map,
        } => {
            let mut out = format!("[{variable} IN {}", render_expr(list, depth));
            if let Some(predicate) = where_clause {
                out.push_str(&format!(" WHERE {}", render_expr(predicate, depth)));
            }
            if let Some(map) = map {
                out.push_str(&format!(" | {}", render_expr(map, depth)));
            }
            out.push(']');
            out
        }
        Expr::PatternComprehension {
            pattern,
            where_clause,
            map,
        } => {
            let mut out = format!("[{}", render_pattern(pattern, depth));
            if let Some(predicate) = where_clause {
                out.push_str(&format!(" WHERE {}", render_expr(predicate, depth)));
            }
            out.push_str(&format!(" | {}]", render_expr(map, depth)));
            out
        }
        Expr::Quantifier {
            kind,
            variable,
            list,
            where_clause,
        } => {
            let name = match kind {
                QuantifierKind::Any => "any",
                QuantifierKind::All => "all",
                QuantifierKind::None => "none",
                QuantifierKind::Single => "single",
            };
            let mut out = format!("{name}({variable} IN {}", render_expr(list, depth));
            if let Some(predicate) = where_clause {
                out.push_str(&format!(" WHERE {}", render_expr(predicate, depth)));
            }
            out.push(')');
            out
        }
        Expr::Reduce {
            accumulator,
            init,
            variable,
            list,
            expr,
        } => format!(
            "reduce({accumulator} = {}, {variable} IN {} | {})",
            render_expr(init, depth),
            render_expr(list, depth),
            render_expr(expr, depth)
        ),
        Expr::MapProjection { variable, items } => {
            if items.is_empty() {
                return format!("{variable} {{ }}");
            }
            let body = items
                .iter()
                .map(|item| match item {
                    MapProjectionItem::Property(key) => format!(".{}", escape_name(key)),
                    MapProjectionItem::Entry(key, value) => {
                        format!("{}: {}", escape_name(key), render_expr(value, depth))
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{variable} {{ {body} }}")
        }
        Expr::Parameter(name) => format!("${name}"),
        Expr::Raw(text) => text.clone(),
    }
}

fn render_literal(literal: &Literal, depth: usize) -> String {
    match literal {
        Literal::String(value) => {
            let mut out = String::with_capacity(value.len() + 2);
            out.push('"');
            for c in value.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    other => out.push(other),
                }
            }
            out.push('"');
            out
        }
        Literal::Integer(value) => value.to_string(),
        Literal::Float(value) => format!("{value:?}"),
        Literal::Boolean(value) => value.to_string(),
        Literal::Null => "NULL".to_string(),
        Literal::List(items) => format!(
            "[{}]",
            items
                .iter()
                .map(|item| render_expr(item, depth))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Literal::Map(entries) => render_map(entries, depth),
    }
}

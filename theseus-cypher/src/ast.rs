#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub clauses: Vec<Clause>,
}

impl Statement {
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match(MatchClause),
    Create(CreateClause),
    Merge(MergeClause),
    Set(SetClause),
    Delete(DeleteClause),
    Foreach(ForeachClause),
    Unwind(UnwindClause),
    With(WithClause),
    Return(ReturnClause),
    Call(CallClause),
    Subquery(SubqueryClause),
    Raw(String),
}

impl Clause {
    pub fn with_star() -> Self {
        Clause::With(WithClause::star())
    }

    pub fn with_vars<I, S>(vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Clause::With(WithClause::new(
            vars.into_iter()
                .map(|v| ProjectionItem::new(Expr::Variable(v.into())))
                .collect(),
        ))
    }

    pub fn is_updating(&self) -> bool {
        matches!(
            self,
            Clause::Create(_)
                | Clause::Merge(_)
                | Clause::Set(_)
                | Clause::Delete(_)
                | Clause::Foreach(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub optional: bool,
    pub patterns: Vec<Pattern>,
    pub where_clause: Option<Expr>,
}

impl MatchClause {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            optional: false,
            patterns: vec![pattern],
            where_clause: None,
        }
    }

    pub fn optional(pattern: Pattern) -> Self {
        Self {
            optional: true,
            ..Self::new(pattern)
        }
    }

    pub fn filtered(mut self, predicate: Option<Expr>) -> Self {
        self.where_clause = predicate;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateClause {
    pub patterns: Vec<Pattern>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeClause {
    pub pattern: Pattern,
    pub on_create: Vec<SetItem>,
    pub on_match: Vec<SetItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetClause {
    pub items: Vec<SetItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetItem {
    pub target: Expr,
    pub value: Expr,
}

impl SetItem {
    pub fn new(target: Expr, value: Expr) -> Self {
        Self { target, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteClause {
    pub detach: bool,
    pub items: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeachClause {
    pub variable: String,
    pub list: Expr,
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnwindClause {
    pub expression: Expr,
    pub variable: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WithClause {
    pub distinct: bool,
    pub items: Vec<ProjectionItem>,
    pub order: Option<OrderBy>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
    pub where_clause: Option<Expr>,
}

impl WithClause {
    pub fn new(items: Vec<ProjectionItem>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    pub fn star() -> Self {
        Self::new(vec![ProjectionItem::new(Expr::Star)])
    }

    pub fn filtered(mut self, predicate: Option<Expr>) -> Self {
        self.where_clause = predicate;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnClause {
    pub distinct: bool,
    pub items: Vec<ProjectionItem>,
    pub order: Option<OrderBy>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
}

impl ReturnClause {
    pub fn new(items: Vec<ProjectionItem>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    pub fn single(expr: Expr, alias: impl Into<String>) -> Self {
        Self::new(vec![ProjectionItem::aliased(expr, alias)])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallClause {
    pub name: String,
    pub args: Vec<Expr>,
    pub yields: Option<Vec<YieldItem>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YieldItem {
    pub name: String,
    pub alias: Option<String>,
}

/// `CALL { ... }` subquery. Every branch carries its own importing `WITH`;
/// more than one branch renders as a `UNION`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryClause {
    pub branches: Vec<Vec<Clause>>,
}

impl SubqueryClause {
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self {
            branches: vec![clauses],
        }
    }

    pub fn union(branches: Vec<Vec<Clause>>) -> Self {
        Self { branches }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl ProjectionItem {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Node(NodePattern),
    Path(PathPattern),
}

impl Pattern {
    pub fn node(node: NodePattern) -> Self {
        Pattern::Node(node)
    }

    pub fn relationship(start: NodePattern, rel: RelationshipDetail, end: NodePattern) -> Self {
        Pattern::Path(PathPattern {
            start,
            segments: vec![PathSegment { rel, node: end }],
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expr)>,
}

impl NodePattern {
    pub fn named(variable: impl Into<String>) -> Self {
        Self {
            variable: Some(variable.into()),
            ..Default::default()
        }
    }

    pub fn labelled(variable: impl Into<String>, labels: &[String]) -> Self {
        Self {
            variable: Some(variable.into()),
            labels: labels.to_vec(),
            properties: Vec::new(),
        }
    }

    pub fn with_properties(mut self, properties: Vec<(String, Expr)>) -> Self {
        self.properties = properties;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub start: NodePattern,
    pub segments: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub rel: RelationshipDetail,
    pub node: NodePattern,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDetail {
    pub variable: Option<String>,
    pub types: Vec<String>,
    pub direction: RelationshipDirection,
    pub properties: Vec<(String, Expr)>,
}

impl RelationshipDetail {
    pub fn new(
        variable: Option<String>,
        rel_type: impl Into<String>,
        direction: RelationshipDirection,
    ) -> Self {
        Self {
            variable,
            types: vec![rel_type.into()],
            direction,
            properties: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipDirection {
    LeftToRight,
    RightToLeft,
    Undirected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapProjectionItem {
    Property(String),
    Entry(String, Expr),
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Variable(String),
    Star,
    PropertyAccess {
        expr: Box<Expr>,
        key: String,
    },
    IndexAccess {
        expr: Box<Expr>,
        index: Box<Expr>,
    },
    ListSlice {
        expr: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
    },
    CountStar,
    UnaryOp {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    In {
        expr: Box<Expr>,
        list: Box<Expr>,
    },
    HasLabel {
        expr: Box<Expr>,
        labels: Vec<String>,
    },
    Case {
        base: Option<Box<Expr>>,
        alternatives: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    Exists {
        clauses: Vec<Clause>,
    },
    CountSubquery {
        clauses: Vec<Clause>,
    },
    ListComprehension {
        variable: String,
        list: Box<Expr>,
        where_clause: Option<Box<Expr>>,
        map: Option<Box<Expr>>,
    },
    PatternComprehension {
        pattern: Pattern,
        where_clause: Option<Box<Expr>>,
        map: Box<Expr>,
    },
    Quantifier {
        kind: QuantifierKind,
        variable: String,
        list: Box<Expr>,
        where_clause: Option<Box<Expr>>,
    },
    Reduce {
        accumulator: String,
        init: Box<Expr>,
        variable: String,
        list: Box<Expr>,
        expr: Box<Expr>,
    },
    MapProjection {
        variable: String,
        items: Vec<MapProjectionItem>,
    },
    Parameter(String),
    Raw(String),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Parameter(name.into())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Integer(value))
    }

    pub fn float(value: f64) -> Self {
        Expr::Literal(Literal::Float(value))
    }

    pub fn bool(value: bool) -> Self {
        Expr::Literal(Literal::Boolean(value))
    }

    pub fn null() -> Self {
        Expr::Literal(Literal::Null)
    }

    pub fn list(items: Vec<Expr>) -> Self {
        Expr::Literal(Literal::List(items))
    }

    pub fn map(entries: Vec<(String, Expr)>) -> Self {
        Expr::Literal(Literal::Map(entries))
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::FunctionCall {
            name: name.into(),
            args,
        }
    }

    pub fn property(self, key: impl Into<String>) -> Self {
        Expr::PropertyAccess {
            expr: Box::new(self),
            key: key.into(),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn is_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    pub fn is_not_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: true,
        }
    }

    pub fn in_list(expr: Expr, list: Expr) -> Self {
        Expr::In {
            expr: Box::new(expr),
            list: Box::new(list),
        }
    }

    pub fn exists(clauses: Vec<Clause>) -> Self {
        Expr::Exists { clauses }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Expr::Literal(Literal::Boolean(value)) => Some(*value),
            _ => None,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        match expr.as_bool() {
            Some(value) => Expr::bool(!value),
            None => Expr::UnaryOp {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            },
        }
    }

    /// Conjunction of the given predicates with literal folding. `None` when
    /// nothing constrains the result.
    pub fn and_all<I: IntoIterator<Item = Expr>>(predicates: I) -> Option<Expr> {
        Self::fold(BinaryOp::And, predicates)
    }

    pub fn or_all<I: IntoIterator<Item = Expr>>(predicates: I) -> Option<Expr> {
        Self::fold(BinaryOp::Or, predicates)
    }

    fn fold<I: IntoIterator<Item = Expr>>(op: BinaryOp, predicates: I) -> Option<Expr> {
        let absorbing = op == BinaryOp::Or;
        let mut acc: Option<Expr> = None;
        for predicate in predicates {
            match predicate.as_bool() {
                Some(value) if value == absorbing => return Some(Expr::bool(absorbing)),
                Some(_) => continue,
                None => {}
            }
            acc = Some(match acc {
                None => predicate,
                Some(left) => Expr::binary(op, left, predicate),
            });
        }
        acc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    Any,
    All,
    None,
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    Xor,
    And,
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    StartsWith,
    EndsWith,
    Contains,
    RegexMatch,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
}

use ai_core::Value;

use crate::functions::Builtin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathBase {
    Variable(String),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentKind {
    Field(String),
    Index(Box<Expr>),
}

/// One postfix access; `null_safe` marks `?.`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub null_safe: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Path {
        base: PathBase,
        segments: Vec<Segment>,
    },
    Call {
        function: Builtin,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Coalesce {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// Root variable names referenced anywhere in the expression.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::List(items) => items.iter().for_each(|e| e.collect_variables(out)),
            Expr::Path { base, segments } => {
                match base {
                    PathBase::Variable(name) => out.push(name),
                    PathBase::Expr(expr) => expr.collect_variables(out),
                }
                for segment in segments {
                    if let SegmentKind::Index(index) = &segment.kind {
                        index.collect_variables(out);
                    }
                }
            }
            Expr::Call { args, .. } => args.iter().for_each(|e| e.collect_variables(out)),
            Expr::Unary { operand, .. } => operand.collect_variables(out),
            Expr::Binary { left, right, .. }
            | Expr::Logical { left, right, .. }
            | Expr::Coalesce { left, right } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_variables(out);
                then.collect_variables(out);
                otherwise.collect_variables(out);
            }
        }
    }
}

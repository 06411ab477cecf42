use itertools::Itertools;

use crate::frontend::lexer::SourceLocation;

/// Name given to the zero-argument function wrapped around a bare
/// top-level expression.
pub const ANONYMOUS_FUNCTION_NAME: &str = "__anonymous_expr";

/// An expression node plus where its first token sat in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: SourceLocation,
}

impl Expr {
    pub fn new(kind: ExprKind, loc: SourceLocation) -> Self {
        Self { kind, loc }
    }
}

// Enum dispatch over node kinds; lowering and printing both match on this
// directly instead of going through vtables.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Variable(String),
    Unary {
        op: char,
        operand: Box<Expr>,
    },
    Binary {
        op: char,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    For {
        varname: String,
        start: Box<Expr>,
        end: Box<Expr>,
        step: Option<Box<Expr>>,
        body: Box<Expr>,
    },
    Let {
        bindings: Vec<(String, Option<Expr>)>,
        body: Box<Expr>,
    },
}

/// Whether a prototype declares a plain function or overloads an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    None,
    Unary,
    Binary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    pub name: String,
    pub params: Vec<String>,
    pub operator_kind: OperatorKind,
    /// Declared binding strength of a binary operator; `None` when omitted
    /// or when this is not a binary operator at all.
    pub precedence: Option<u32>,
}

impl Prototype {
    pub fn new(name: String, params: Vec<String>) -> Self {
        Self {
            name,
            params,
            operator_kind: OperatorKind::None,
            precedence: None,
        }
    }

    /// The character a `unary`/`binary` declaration overloads. Synthesized
    /// names end in the operator char, so it is always the final char.
    pub fn operator_char(&self) -> Option<char> {
        match self.operator_kind {
            OperatorKind::None => None,
            OperatorKind::Unary | OperatorKind::Binary => self.name.chars().last(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub proto: Prototype,
    pub body: Expr,
}

impl Function {
    pub fn new(proto: Prototype, body: Expr) -> Self {
        Self { proto, body }
    }
}

/// Renders a node in the compact tree form used by `--inspect-tree` and
/// the parser tests. `depth` is the indentation level for the nodes that
/// break across lines.
pub trait Describe {
    fn describe(&self, depth: usize) -> String;
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

impl Describe for Expr {
    fn describe(&self, depth: usize) -> String {
        match &self.kind {
            ExprKind::Number(value) => format!("Number({value})"),

            ExprKind::Variable(name) => format!("Variable({name})"),

            ExprKind::Unary { op, operand } => {
                format!("Unary({op}, {})", operand.describe(depth))
            }

            ExprKind::Binary { op, left, right } => format!(
                "Binary({op}, {}, {})",
                left.describe(depth),
                right.describe(depth)
            ),

            ExprKind::Call { callee, args } => format!(
                "Call({callee}({}))",
                args.iter().map(|arg| arg.describe(depth)).format(", ")
            ),

            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let pad = indent(depth + 1);
                format!(
                    "If({}\n{pad}? {}\n{pad}: {})",
                    cond.describe(depth + 1),
                    then_branch.describe(depth + 1),
                    else_branch.describe(depth + 1)
                )
            }

            ExprKind::For {
                varname,
                start,
                end,
                step,
                body,
            } => {
                let pad = indent(depth + 1);
                let mut head = format!(
                    "For({varname} = {}, {}",
                    start.describe(depth + 1),
                    end.describe(depth + 1)
                );
                if let Some(step) = step {
                    head.push_str(&format!(", {}", step.describe(depth + 1)));
                }
                format!("{head}\n{pad}{})", body.describe(depth + 1))
            }

            ExprKind::Let { bindings, body } => {
                let pad = indent(depth + 1);
                let bound = bindings
                    .iter()
                    .map(|(name, init)| match init {
                        Some(init) => format!("{pad}{name} = {}", init.describe(depth + 1)),
                        None => format!("{pad}{name}"),
                    })
                    .format(",\n");
                format!("Let(\n{bound};\n{pad}{})", body.describe(depth + 1))
            }
        }
    }
}

impl Describe for Prototype {
    fn describe(&self, _depth: usize) -> String {
        let params = self.params.iter().format(", ");
        match self.precedence {
            Some(precedence) if self.operator_kind == OperatorKind::Binary => {
                format!("Prototype({}({params}) prec {precedence})", self.name)
            }
            _ => format!("Prototype({}({params}))", self.name),
        }
    }
}

impl Describe for Function {
    fn describe(&self, depth: usize) -> String {
        let pad = indent(depth + 1);
        format!(
            "Function(\n{pad}{},\n{pad}{})",
            self.proto.describe(depth + 1),
            self.body.describe(depth + 1)
        )
    }
}

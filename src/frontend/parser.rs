use thiserror::Error;

use crate::frontend::ast::{
    Expr, ExprKind, Function, OperatorKind, Prototype, ANONYMOUS_FUNCTION_NAME,
};
use crate::frontend::lexer::{Lex, Lexer, SourceLocation, Token};
use crate::frontend::ops::{OperatorTable, DEFAULT_PRECEDENCE};

// What went wrong during parsing, and where. Every variant captures the
// offending token so drivers can print one line and resynchronize.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("{loc}: expected {expected} but found {found}")]
    Expected {
        expected: &'static str,
        found: Token,
        loc: SourceLocation,
    },

    #[error("{loc}: found {found} when expecting an expression")]
    ExpectedExpression { found: Token, loc: SourceLocation },

    #[error("{loc}: invalid operator precedence {value}, expected a number from 1 to 100")]
    InvalidPrecedence { value: f64, loc: SourceLocation },

    #[error("{loc}: operator function '{name}' must take exactly {expected} parameters, found {actual}")]
    WrongOperatorArity {
        name: String,
        expected: usize,
        actual: usize,
        loc: SourceLocation,
    },
}

/// Recursive-descent parser with one token of lookahead. Binary expression
/// tails are parsed by precedence climbing against the shared
/// [`OperatorTable`], which `def binary` declarations extend mid-parse.
pub struct Parser<'src, 'ops> {
    lexer: Lexer<'src>,
    ops: &'ops OperatorTable,
    cur: Token,
    loc: SourceLocation,
}

impl<'src, 'ops> Parser<'src, 'ops> {
    pub fn new(source: &'src str, ops: &'ops OperatorTable) -> Self {
        let mut lexer = source.lex();
        let (cur, loc) = lexer.next_token();
        Self {
            lexer,
            ops,
            cur,
            loc,
        }
    }

    /// The token the next parse call would start from.
    pub fn current(&self) -> &Token {
        &self.cur
    }

    /// Advance the lookahead by one token. Public so drivers can skip the
    /// offending token when recovering from a parse error.
    pub fn next_token(&mut self) {
        (self.cur, self.loc) = self.lexer.next_token();
    }

    fn current_op(&self) -> Option<char> {
        match self.cur {
            Token::Op(op) => Some(op),
            _ => None,
        }
    }

    fn error_expected(&self, expected: &'static str) -> ParserError {
        ParserError::Expected {
            expected,
            found: self.cur.clone(),
            loc: self.loc,
        }
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), ParserError> {
        if self.cur == token {
            self.next_token();
            Ok(())
        } else {
            Err(self.error_expected(expected))
        }
    }

    /// definition ::= 'def' prototype expression
    pub fn parse_definition(&mut self) -> Result<Function, ParserError> {
        self.next_token(); // eat 'def'

        let proto = self.parse_prototype()?;

        // a binary declaration is parseable from this point on, which is
        // what lets the body below use the operator it is defining
        if proto.operator_kind == OperatorKind::Binary {
            if let Some(op) = proto.operator_char() {
                self.ops
                    .install(op, proto.precedence.unwrap_or(DEFAULT_PRECEDENCE));
            }
        }

        let body = self.parse_expression()?;
        Ok(Function::new(proto, body))
    }

    /// external ::= 'extern' prototype
    pub fn parse_extern(&mut self) -> Result<Prototype, ParserError> {
        self.next_token(); // eat 'extern'
        self.parse_prototype()
    }

    /// toplevelexpr ::= expression
    ///
    /// The expression is wrapped in a zero-argument function so the rest of
    /// the pipeline only ever sees functions.
    pub fn parse_top_level_expr(&mut self) -> Result<Function, ParserError> {
        let body = self.parse_expression()?;
        let proto = Prototype::new(ANONYMOUS_FUNCTION_NAME.to_owned(), Vec::new());
        Ok(Function::new(proto, body))
    }

    /// prototype
    ///   ::= identifier '(' identifier* ')'
    ///   ::= 'unary' op '(' identifier ')'
    ///   ::= 'binary' op number? '(' identifier identifier ')'
    fn parse_prototype(&mut self) -> Result<Prototype, ParserError> {
        let loc = self.loc;

        let (name, operator_kind, precedence) = match self.cur.clone() {
            Token::Identifier(name) => {
                self.next_token();
                (name, OperatorKind::None, None)
            }

            Token::Unary => {
                self.next_token();
                let op = self.parse_operator_char("an operator after 'unary'")?;
                (format!("unary{op}"), OperatorKind::Unary, None)
            }

            Token::Binary => {
                self.next_token();
                let op = self.parse_operator_char("an operator after 'binary'")?;
                let precedence = match self.cur {
                    Token::Number(value) => {
                        if !(1.0..=100.0).contains(&value) {
                            return Err(ParserError::InvalidPrecedence {
                                value,
                                loc: self.loc,
                            });
                        }
                        self.next_token();
                        Some(value as u32)
                    }
                    _ => None,
                };
                (format!("binary{op}"), OperatorKind::Binary, precedence)
            }

            _ => return Err(self.error_expected("a function name in prototype")),
        };

        self.expect(Token::Op('('), "'(' in prototype")?;
        let mut params = Vec::new();
        while let Token::Identifier(param) = self.cur.clone() {
            params.push(param);
            self.next_token();
        }
        self.expect(Token::Op(')'), "')' in prototype")?;

        let expected_params = match operator_kind {
            OperatorKind::None => params.len(),
            OperatorKind::Unary => 1,
            OperatorKind::Binary => 2,
        };
        if params.len() != expected_params {
            return Err(ParserError::WrongOperatorArity {
                name,
                expected: expected_params,
                actual: params.len(),
                loc,
            });
        }

        Ok(Prototype {
            name,
            params,
            operator_kind,
            precedence,
        })
    }

    fn parse_operator_char(&mut self, expected: &'static str) -> Result<char, ParserError> {
        match self.current_op() {
            Some(op) if op.is_ascii() => {
                self.next_token();
                Ok(op)
            }
            _ => Err(self.error_expected(expected)),
        }
    }

    /// expression ::= unary binoprhs
    pub fn parse_expression(&mut self) -> Result<Expr, ParserError> {
        let lhs = self.parse_unary()?;
        self.parse_binop_rhs(0, lhs)
    }

    /// unary
    ///   ::= primary
    ///   ::= op unary
    ///
    /// Any operator char except '(' and ',' can prefix an operand; whether
    /// an overload for it exists is lowering's problem, not the grammar's.
    fn parse_unary(&mut self) -> Result<Expr, ParserError> {
        match self.current_op() {
            Some(op) if op != '(' && op != ',' => {
                let loc = self.loc;
                self.next_token();
                let operand = self.parse_unary()?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    loc,
                ))
            }
            _ => self.parse_primary(),
        }
    }

    /// binoprhs ::= (op unary)*
    ///
    /// Consumes operators while they bind at least as tightly as
    /// `min_prec`; equal strengths associate to the left.
    fn parse_binop_rhs(&mut self, min_prec: u32, mut left: Expr) -> Result<Expr, ParserError> {
        loop {
            let Some(tok_prec) = self.ops.precedence_of(&self.cur) else {
                return Ok(left);
            };
            if tok_prec < min_prec {
                return Ok(left);
            }

            // precedence_of only answers for operator tokens
            let Some(op) = self.current_op() else {
                return Ok(left);
            };
            let loc = self.loc;
            self.next_token();

            let mut right = self.parse_unary()?;

            // a tighter operator on the right owns that operand first
            if let Some(next_prec) = self.ops.precedence_of(&self.cur) {
                if tok_prec < next_prec {
                    right = self.parse_binop_rhs(tok_prec + 1, right)?;
                }
            }

            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                loc,
            );
        }
    }

    /// primary
    ///   ::= numberexpr
    ///   ::= identifierexpr
    ///   ::= parenexpr
    ///   ::= ifexpr
    ///   ::= forexpr
    ///   ::= letexpr
    fn parse_primary(&mut self) -> Result<Expr, ParserError> {
        let loc = self.loc;
        match self.cur.clone() {
            Token::Number(value) => {
                self.next_token();
                Ok(Expr::new(ExprKind::Number(value), loc))
            }

            Token::Identifier(name) => {
                self.next_token();
                self.parse_identifier_expr(name, loc)
            }

            Token::Op('(') => self.parse_paren_expr(),

            Token::If => self.parse_if_expr(loc),

            Token::For => self.parse_for_expr(loc),

            Token::Let => self.parse_let_expr(loc),

            found => Err(ParserError::ExpectedExpression { found, loc }),
        }
    }

    /// identifierexpr
    ///   ::= identifier
    ///   ::= identifier '(' expression (',' expression)* ')'
    fn parse_identifier_expr(
        &mut self,
        name: String,
        loc: SourceLocation,
    ) -> Result<Expr, ParserError> {
        if self.cur != Token::Op('(') {
            return Ok(Expr::new(ExprKind::Variable(name), loc));
        }

        self.next_token(); // eat '('
        let mut args = Vec::new();
        if self.cur != Token::Op(')') {
            loop {
                args.push(self.parse_expression()?);
                match self.cur {
                    Token::Op(')') => break,
                    Token::Op(',') => self.next_token(),
                    _ => return Err(self.error_expected("')' or ',' in argument list")),
                }
            }
        }
        self.next_token(); // eat ')'

        Ok(Expr::new(ExprKind::Call { callee: name, args }, loc))
    }

    /// parenexpr ::= '(' expression ')'
    ///
    /// Grouping only; no node of its own.
    fn parse_paren_expr(&mut self) -> Result<Expr, ParserError> {
        self.next_token(); // eat '('
        let inner = self.parse_expression()?;
        self.expect(Token::Op(')'), "')'")?;
        Ok(inner)
    }

    /// ifexpr ::= 'if' expression 'then' expression 'else' expression
    fn parse_if_expr(&mut self, loc: SourceLocation) -> Result<Expr, ParserError> {
        self.next_token(); // eat 'if'

        let cond = self.parse_expression()?;
        self.expect(Token::Then, "'then'")?;
        let then_branch = self.parse_expression()?;
        self.expect(Token::Else, "'else'")?;
        let else_branch = self.parse_expression()?;

        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            loc,
        ))
    }

    /// forexpr ::= 'for' identifier '=' expression ',' expression
    ///             (',' expression)? 'in' expression
    fn parse_for_expr(&mut self, loc: SourceLocation) -> Result<Expr, ParserError> {
        self.next_token(); // eat 'for'

        let Token::Identifier(varname) = self.cur.clone() else {
            return Err(self.error_expected("an identifier after 'for'"));
        };
        self.next_token();

        self.expect(Token::Op('='), "'=' after the loop variable")?;
        let start = self.parse_expression()?;
        self.expect(Token::Op(','), "',' after the start value")?;
        let end = self.parse_expression()?;

        let step = if self.cur == Token::Op(',') {
            self.next_token();
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };

        self.expect(Token::In, "'in' after the loop header")?;
        let body = self.parse_expression()?;

        Ok(Expr::new(
            ExprKind::For {
                varname,
                start: Box::new(start),
                end: Box::new(end),
                step,
                body: Box::new(body),
            },
            loc,
        ))
    }

    /// letexpr ::= 'let' identifier ('=' expression)?
    ///             (',' identifier ('=' expression)?)* 'in' expression
    fn parse_let_expr(&mut self, loc: SourceLocation) -> Result<Expr, ParserError> {
        self.next_token(); // eat 'let'

        let mut bindings = Vec::new();
        loop {
            let Token::Identifier(name) = self.cur.clone() else {
                return Err(self.error_expected("an identifier after 'let'"));
            };
            self.next_token();

            let init = if self.cur == Token::Op('=') {
                self.next_token();
                Some(self.parse_expression()?)
            } else {
                None
            };
            bindings.push((name, init));

            if self.cur != Token::Op(',') {
                break;
            }
            self.next_token(); // eat ',' and bind another name
        }

        self.expect(Token::In, "'in' after the let bindings")?;
        let body = self.parse_expression()?;

        Ok(Expr::new(
            ExprKind::Let {
                bindings,
                body: Box::new(body),
            },
            loc,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::Describe;

    fn parse_expr(source: &str) -> Result<Expr, ParserError> {
        let ops = OperatorTable::new();
        let mut parser = Parser::new(source, &ops);
        parser.parse_expression()
    }

    fn describe_expr(source: &str) -> String {
        parse_expr(source).expect("parse failed").describe(0)
    }

    fn parse_def(source: &str) -> Result<Function, ParserError> {
        let ops = OperatorTable::new();
        let mut parser = Parser::new(source, &ops);
        parser.parse_definition()
    }

    #[test]
    fn parsing_literals_and_variables() {
        assert_eq!(describe_expr("5"), "Number(5)");
        assert_eq!(describe_expr(".25"), "Number(0.25)");
        assert_eq!(describe_expr("x"), "Variable(x)");
        assert_eq!(describe_expr("(x)"), "Variable(x)");
    }

    #[test]
    fn parsing_left_associative_chains() {
        assert_eq!(
            describe_expr("a - b - c"),
            "Binary(-, Binary(-, Variable(a), Variable(b)), Variable(c))"
        );
    }

    #[test]
    fn parsing_respects_precedence() {
        assert_eq!(
            describe_expr("a + b * c"),
            "Binary(+, Variable(a), Binary(*, Variable(b), Variable(c)))"
        );
        assert_eq!(
            describe_expr("a * b + c"),
            "Binary(+, Binary(*, Variable(a), Variable(b)), Variable(c))"
        );
        assert_eq!(
            describe_expr("(a + b) * c"),
            "Binary(*, Binary(+, Variable(a), Variable(b)), Variable(c))"
        );
        assert_eq!(
            describe_expr("a < b + 1"),
            "Binary(<, Variable(a), Binary(+, Variable(b), Number(1)))"
        );
        assert_eq!(
            describe_expr("x = y + 1"),
            "Binary(=, Variable(x), Binary(+, Variable(y), Number(1)))"
        );
    }

    #[test]
    fn parsing_unary_operators() {
        assert_eq!(describe_expr("!x"), "Unary(!, Variable(x))");
        assert_eq!(describe_expr("!!x"), "Unary(!, Unary(!, Variable(x)))");

        // a prefix operator binds tighter than any binary tail
        assert_eq!(
            describe_expr("-a + b"),
            "Binary(+, Unary(-, Variable(a)), Variable(b))"
        );

        // every operator char except '(' and ',' may prefix an operand,
        // even ones that can never resolve
        assert_eq!(describe_expr(")x"), "Unary(), Variable(x))");
    }

    #[test]
    fn parsing_calls() {
        assert_eq!(
            describe_expr("f(3, n + 1)"),
            "Call(f(Number(3), Binary(+, Variable(n), Number(1))))"
        );
        assert_eq!(describe_expr("ready()"), "Call(ready())");
    }

    #[test]
    fn parsing_branches() {
        assert_eq!(
            describe_expr("if x < 2 then 1 else 0"),
            "If(Binary(<, Variable(x), Number(2))\n  ? Number(1)\n  : Number(0))"
        );
    }

    #[test]
    fn parsing_loops() {
        assert_eq!(
            describe_expr("for i = 1, i < n, 2 in f(i)"),
            "For(i = Number(1), Binary(<, Variable(i), Variable(n)), Number(2)\n  Call(f(Variable(i))))"
        );
        assert_eq!(
            describe_expr("for i = 1, i < n in f(i)"),
            "For(i = Number(1), Binary(<, Variable(i), Variable(n))\n  Call(f(Variable(i))))"
        );
    }

    #[test]
    fn parsing_lets() {
        assert_eq!(
            describe_expr("let a = 1, b in a + b"),
            "Let(\n  a = Number(1),\n  b;\n  Binary(+, Variable(a), Variable(b)))"
        );
    }

    #[test]
    fn parsing_function_definitions() {
        let function = parse_def("def double(x) x * 2").unwrap();
        assert_eq!(
            function.describe(0),
            "Function(\n  Prototype(double(x)),\n  Binary(*, Variable(x), Number(2)))"
        );

        let nullary = parse_def("def zero() 0").unwrap();
        assert_eq!(
            nullary.describe(0),
            "Function(\n  Prototype(zero()),\n  Number(0))"
        );
    }

    #[test]
    fn parsing_externs() {
        let ops = OperatorTable::new();
        let mut parser = Parser::new("extern sin(angle)", &ops);
        let proto = parser.parse_extern().unwrap();
        assert_eq!(proto.describe(0), "Prototype(sin(angle))");
    }

    #[test]
    fn top_level_expressions_become_anonymous_functions() {
        let ops = OperatorTable::new();
        let mut parser = Parser::new("4 + 5", &ops);
        let function = parser.parse_top_level_expr().unwrap();
        assert_eq!(function.proto.name, ANONYMOUS_FUNCTION_NAME);
        assert!(function.proto.params.is_empty());
    }

    #[test]
    fn binary_definitions_extend_the_table() {
        let ops = OperatorTable::new();
        let mut parser = Parser::new("def binary | 5 (a b) a + b", &ops);
        let function = parser.parse_definition().unwrap();

        assert_eq!(function.proto.name, "binary|");
        assert_eq!(function.proto.operator_kind, OperatorKind::Binary);
        assert_eq!(function.proto.precedence, Some(5));
        assert_eq!(ops.precedence_of(&Token::Op('|')), Some(5));
    }

    #[test]
    fn binary_definitions_can_use_their_own_operator() {
        let ops = OperatorTable::new();
        let mut parser = Parser::new("def binary & 6 (a b) (a * b) & 1", &ops);
        let function = parser.parse_definition().unwrap();
        assert_eq!(
            function.body.describe(0),
            "Binary(&, Binary(*, Variable(a), Variable(b)), Number(1))"
        );
    }

    #[test]
    fn omitted_precedence_defaults() {
        let ops = OperatorTable::new();
        let mut parser = Parser::new("def binary & (a b) a", &ops);
        let function = parser.parse_definition().unwrap();
        assert_eq!(function.proto.precedence, None);
        assert_eq!(ops.precedence_of(&Token::Op('&')), Some(DEFAULT_PRECEDENCE));
    }

    #[test]
    fn parsing_unary_definitions() {
        let function = parse_def("def unary ! (v) if v then 0 else 1").unwrap();
        assert_eq!(function.proto.name, "unary!");
        assert_eq!(function.proto.operator_kind, OperatorKind::Unary);
        assert_eq!(function.proto.params, vec!["v"]);
    }

    #[test]
    fn missing_else_is_reported() {
        assert_eq!(
            parse_expr("if x then y"),
            Err(ParserError::Expected {
                expected: "'else'",
                found: Token::Eof,
                loc: SourceLocation {
                    line: 1,
                    column: 12
                },
            })
        );
    }

    #[test]
    fn unclosed_paren_is_reported() {
        let err = parse_expr("(a").unwrap_err();
        assert_eq!(err.to_string(), "1:3: expected ')' but found end of input");
    }

    #[test]
    fn call_arguments_must_be_comma_separated() {
        let err = parse_expr("f(a b)").unwrap_err();
        assert!(matches!(
            err,
            ParserError::Expected {
                expected: "')' or ',' in argument list",
                ..
            }
        ));
    }

    #[test]
    fn wrong_operator_arity_is_reported() {
        let err = parse_def("def unary & (a b) a").unwrap_err();
        assert_eq!(
            err,
            ParserError::WrongOperatorArity {
                name: "unary&".into(),
                expected: 1,
                actual: 2,
                loc: SourceLocation { line: 1, column: 5 },
            }
        );

        let err = parse_def("def binary % 40 (a) a").unwrap_err();
        assert!(matches!(
            err,
            ParserError::WrongOperatorArity {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn precedence_out_of_range_is_reported() {
        let err = parse_def("def binary % 101 (a b) a").unwrap_err();
        assert_eq!(
            err,
            ParserError::InvalidPrecedence {
                value: 101.0,
                loc: SourceLocation {
                    line: 1,
                    column: 14
                },
            }
        );

        assert!(parse_def("def binary % 0.5 (a b) a").is_err());
    }

    #[test]
    fn invalid_tokens_surface_in_errors() {
        let err = parse_expr("1 + 2.3.4").unwrap_err();
        assert_eq!(
            err,
            ParserError::ExpectedExpression {
                found: Token::Invalid("2.3".into()),
                loc: SourceLocation { line: 1, column: 5 },
            }
        );
    }

    #[test]
    fn failed_parses_leave_the_offending_token_current() {
        let ops = OperatorTable::new();
        let mut parser = Parser::new("def 5(x) x", &ops);
        assert!(parser.parse_definition().is_err());
        // drivers recover by skipping exactly one token
        assert_eq!(parser.current(), &Token::Number(5.0));
    }
}

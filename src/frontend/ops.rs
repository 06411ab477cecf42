use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::RangeInclusive;

use crate::frontend::lexer::Token;

/// Binding strength given to a user operator declared without one.
pub const DEFAULT_PRECEDENCE: u32 = 30;

/// Legal range for a declared precedence.
pub const PRECEDENCE_RANGE: RangeInclusive<u32> = 1..=100;

/// Operator-to-precedence table consulted while parsing binary expression
/// tails. The builtins are seeded up front; `def binary` declarations add
/// entries mid-parse, so reads and writes interleave while a parser holds
/// the table. Entries are never removed.
#[derive(Debug)]
pub struct OperatorTable {
    precedences: RefCell<HashMap<char, u32>>,
}

impl Default for OperatorTable {
    fn default() -> Self {
        OperatorTable::new()
    }
}

impl OperatorTable {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert('=', 2);
        map.insert('<', 10);
        map.insert('>', 10);
        map.insert('+', 20);
        map.insert('-', 20);
        map.insert('*', 40);
        map.insert('/', 40);
        Self {
            precedences: RefCell::new(map),
        }
    }

    /// Add or update an operator, returning the strength it now binds at.
    /// Callers validate the declared range; the table itself only insists
    /// on a positive value.
    pub fn install(&self, op: char, precedence: u32) -> u32 {
        debug_assert!(PRECEDENCE_RANGE.contains(&precedence));
        self.precedences.borrow_mut().insert(op, precedence);
        precedence
    }

    /// Binding strength of `token` if it can continue a binary expression,
    /// `None` for everything that cannot.
    pub fn precedence_of(&self, token: &Token) -> Option<u32> {
        let Token::Op(op) = token else { return None };
        if !op.is_ascii() {
            return None;
        }
        self.precedences
            .borrow()
            .get(op)
            .copied()
            .filter(|&precedence| precedence > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_ranked() {
        let ops = OperatorTable::new();
        let prec = |op| ops.precedence_of(&Token::Op(op));

        assert!(prec('=') < prec('<'));
        assert!(prec('<') < prec('+'));
        assert!(prec('+') < prec('*'));
        assert_eq!(prec('+'), prec('-'));
        assert_eq!(prec('*'), prec('/'));
        assert_eq!(prec('<'), prec('>'));
    }

    #[test]
    fn unregistered_chars_are_not_operators() {
        let ops = OperatorTable::new();
        assert_eq!(ops.precedence_of(&Token::Op('!')), None);
        assert_eq!(ops.precedence_of(&Token::Op('%')), None);
        assert_eq!(ops.precedence_of(&Token::Op('λ')), None);
    }

    #[test]
    fn non_operator_tokens_have_no_precedence() {
        let ops = OperatorTable::new();
        assert_eq!(ops.precedence_of(&Token::Identifier("x".into())), None);
        assert_eq!(ops.precedence_of(&Token::Number(5.0)), None);
        assert_eq!(ops.precedence_of(&Token::Eof), None);
    }

    #[test]
    fn installing_extends_and_updates() {
        let ops = OperatorTable::new();

        ops.install('|', 5);
        assert_eq!(ops.precedence_of(&Token::Op('|')), Some(5));

        // redeclaration takes the newest strength
        ops.install('|', 60);
        assert_eq!(ops.precedence_of(&Token::Op('|')), Some(60));
    }
}

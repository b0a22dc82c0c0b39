// =============================================================================
// Recursive-descent parser — predicate DSL
// =============================================================================
//
//   expr    := or_expr
//   or_expr := and_expr ( "OR"  and_expr )*
//   and_expr:= cmp_expr ( "AND" cmp_expr )*
//   cmp_expr:= atom cmp_op atom | "(" expr ")"
//   atom    := identifier | number | time_literal
//
// Left-associative, OR binds looser than AND, comparisons bind tightest.
// Mixing a time literal with `price` (or a number with `time`) is rejected
// here rather than deferred to evaluation — evaluation cannot fail once a
// predicate has parsed successfully.
// =============================================================================

use super::ast::{Atom, CmpOp, LogicOp, Predicate};
use super::lexer::{tokenize, Spanned, Token};
use super::ParseError;

pub fn parse(src: &str) -> Result<Predicate, ParseError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let predicate = parser.parse_or()?;
    parser.expect_eof()?;
    Ok(predicate)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn position(&self) -> usize {
        self.tokens[self.pos].position
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        if matches!(self.peek(), Token::Eof) {
            Ok(())
        } else {
            Err(ParseError {
                position: self.position(),
                reason: format!("unexpected trailing token {:?}", self.peek()),
            })
        }
    }

    fn parse_or(&mut self) -> Result<Predicate, ParseError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Predicate::Logic {
                op: LogicOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Predicate, ParseError> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Token::And) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Predicate::Logic {
                op: LogicOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Predicate, ParseError> {
        if matches!(self.peek(), Token::LParen) {
            self.advance();
            let inner = self.parse_or()?;
            match self.peek() {
                Token::RParen => {
                    self.advance();
                    return Ok(inner);
                }
                _ => {
                    return Err(ParseError {
                        position: self.position(),
                        reason: "expected ')'".to_string(),
                    })
                }
            }
        }

        let lhs_pos = self.position();
        let lhs = self.parse_atom()?;
        let op = self.parse_cmp_op()?;
        let rhs_pos = self.position();
        let rhs = self.parse_atom()?;

        if lhs.kind() != rhs.kind() {
            return Err(ParseError {
                position: lhs_pos.min(rhs_pos),
                reason: format!(
                    "cannot compare {:?} with {:?} — a time literal cannot be mixed with \
                     `price`/a number, and a bare number cannot be mixed with `time`",
                    lhs.kind(),
                    rhs.kind()
                ),
            });
        }

        Ok(Predicate::Cmp { lhs, op, rhs })
    }

    fn parse_cmp_op(&mut self) -> Result<CmpOp, ParseError> {
        let position = self.position();
        let op = match self.peek() {
            Token::Lt => CmpOp::Lt,
            Token::Le => CmpOp::Le,
            Token::Gt => CmpOp::Gt,
            Token::Ge => CmpOp::Ge,
            Token::EqEq => CmpOp::Eq,
            other => {
                return Err(ParseError {
                    position,
                    reason: format!("expected a comparison operator, found {other:?}"),
                })
            }
        };
        self.advance();
        Ok(op)
    }

    fn parse_atom(&mut self) -> Result<Atom, ParseError> {
        let position = self.position();
        let atom = match self.peek().clone() {
            Token::Ident(name) if name == "price" => Atom::Price,
            Token::Ident(name) if name == "time" => Atom::Time,
            Token::Number(n) => Atom::Number(n),
            Token::TimeLiteral(m) => Atom::TimeLiteral(m),
            other => {
                return Err(ParseError {
                    position,
                    reason: format!("expected price, time, a number, or a time literal, found {other:?}"),
                })
            }
        };
        self.advance();
        Ok(atom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::ast::Environment;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn env(price: &str, time: i64) -> Environment {
        Environment {
            price: Decimal::from_str(price).unwrap(),
            time,
        }
    }

    #[test]
    fn parses_simple_comparison() {
        let p = parse("price > 100").unwrap();
        assert!(p.eval(env("101", 0)));
        assert!(!p.eval(env("99", 0)));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        // price > 100 OR (time >= 15:00 AND price > 50)
        let p = parse("price > 1000 OR time >= 15:00 AND price > 50").unwrap();
        assert!(p.eval(env("60", 15 * 60)));
        assert!(!p.eval(env("60", 14 * 60)));
    }

    #[test]
    fn parentheses_override_precedence() {
        let p = parse("(price > 1000 OR time >= 15:00) AND price > 50").unwrap();
        assert!(p.eval(env("60", 15 * 60)));
        assert!(!p.eval(env("40", 15 * 60)));
    }

    #[test]
    fn time_literal_parses_to_minutes() {
        let p = parse("time >= 15:20").unwrap();
        assert!(p.eval(env("0", 15 * 60 + 20)));
        assert!(!p.eval(env("0", 15 * 60 + 19)));
    }

    #[test]
    fn rejects_mixed_kind_comparison() {
        let err = parse("price > 15:20").unwrap_err();
        assert!(err.reason.contains("cannot compare"));
    }

    #[test]
    fn rejects_unknown_identifier() {
        let err = parse("volume > 100").unwrap_err();
        assert!(err.reason.contains("unknown identifier"));
    }

    #[test]
    fn rejects_trailing_garbage() {
        let err = parse("price > 100 AND").unwrap_err();
        assert!(err.reason.contains("expected price"));
    }

    #[test]
    fn round_trip_through_display_preserves_semantics() {
        let original = parse("price > 100 AND time >= 15:20").unwrap();
        let rendered = original.to_string();
        let reparsed = parse(&rendered).unwrap();
        for (price, time) in [("50", 0), ("101", 15 * 60 + 30), ("200", 0)] {
            assert_eq!(
                original.eval(env(price, time)),
                reparsed.eval(env(price, time))
            );
        }
    }
}

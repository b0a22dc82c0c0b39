// =============================================================================
// Lexer — tokenizes predicate source strings
// =============================================================================

use rust_decimal::Decimal;
use std::str::FromStr;

use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(Decimal),
    TimeLiteral(i64),
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    And,
    Or,
    LParen,
    RParen,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, ParseError> {
    let bytes = src.as_bytes();
    let mut i = 0usize;
    let mut out = Vec::new();

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let start = i;

        match c {
            '(' => {
                out.push(Spanned {
                    token: Token::LParen,
                    position: start,
                });
                i += 1;
            }
            ')' => {
                out.push(Spanned {
                    token: Token::RParen,
                    position: start,
                });
                i += 1;
            }
            '<' => {
                i += 1;
                if i < bytes.len() && bytes[i] as char == '=' {
                    i += 1;
                    out.push(Spanned {
                        token: Token::Le,
                        position: start,
                    });
                } else {
                    out.push(Spanned {
                        token: Token::Lt,
                        position: start,
                    });
                }
            }
            '>' => {
                i += 1;
                if i < bytes.len() && bytes[i] as char == '=' {
                    i += 1;
                    out.push(Spanned {
                        token: Token::Ge,
                        position: start,
                    });
                } else {
                    out.push(Spanned {
                        token: Token::Gt,
                        position: start,
                    });
                }
            }
            '=' => {
                i += 1;
                if i < bytes.len() && bytes[i] as char == '=' {
                    i += 1;
                    out.push(Spanned {
                        token: Token::EqEq,
                        position: start,
                    });
                } else {
                    return Err(ParseError {
                        position: start,
                        reason: "expected '==', found single '='".to_string(),
                    });
                }
            }
            c if c.is_ascii_digit() => {
                let (token, next) = lex_number_or_time(src, i)?;
                i = next;
                out.push(Spanned {
                    token,
                    position: start,
                });
            }
            c if c.is_ascii_alphabetic() => {
                let next = advance_while(src, i, |c| c.is_ascii_alphanumeric() || c == '_');
                let word = &src[i..next];
                i = next;
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "PRICE" => Token::Ident("price".to_string()),
                    "TIME" => Token::Ident("time".to_string()),
                    other => {
                        return Err(ParseError {
                            position: start,
                            reason: format!("unknown identifier '{other}'"),
                        })
                    }
                };
                out.push(Spanned {
                    token,
                    position: start,
                });
            }
            other => {
                return Err(ParseError {
                    position: start,
                    reason: format!("unexpected character '{other}'"),
                })
            }
        }
    }

    out.push(Spanned {
        token: Token::Eof,
        position: bytes.len(),
    });
    Ok(out)
}

fn advance_while(src: &str, start: usize, pred: impl Fn(char) -> bool) -> usize {
    let bytes = src.as_bytes();
    let mut i = start;
    while i < bytes.len() && pred(bytes[i] as char) {
        i += 1;
    }
    i
}

/// Lex either a plain number (`101`, `0.002`) or an `HH:MM` time literal,
/// disambiguated by a `:` immediately following the digit run.
fn lex_number_or_time(src: &str, start: usize) -> Result<(Token, usize), ParseError> {
    let bytes = src.as_bytes();
    let mut i = advance_while(src, start, |c| c.is_ascii_digit());

    if i < bytes.len() && bytes[i] as char == ':' {
        let hh_end = i;
        let hh: &str = &src[start..hh_end];
        if hh.len() > 2 {
            return Err(ParseError {
                position: start,
                reason: "time literal hour must be 1-2 digits".to_string(),
            });
        }
        i += 1; // consume ':'
        let mm_start = i;
        let mm_end = advance_while(src, i, |c| c.is_ascii_digit());
        let mm: &str = &src[mm_start..mm_end];
        if mm.len() != 2 {
            return Err(ParseError {
                position: mm_start,
                reason: "time literal minutes must be exactly 2 digits".to_string(),
            });
        }
        let hours: i64 = hh
            .parse()
            .map_err(|_| ParseError {
                position: start,
                reason: "invalid time literal hour".to_string(),
            })?;
        let minutes: i64 = mm
            .parse()
            .map_err(|_| ParseError {
                position: mm_start,
                reason: "invalid time literal minutes".to_string(),
            })?;
        if hours > 23 || minutes > 59 {
            return Err(ParseError {
                position: start,
                reason: "time literal out of range".to_string(),
            });
        }
        return Ok((Token::TimeLiteral(hours * 60 + minutes), mm_end));
    }

    // Optional fractional part for a plain decimal number.
    if i < bytes.len() && bytes[i] as char == '.' {
        i = advance_while(src, i + 1, |c| c.is_ascii_digit());
    }

    let text = &src[start..i];
    let value = Decimal::from_str(text).map_err(|_| ParseError {
        position: start,
        reason: format!("invalid numeric literal '{text}'"),
    })?;
    Ok((Token::Number(value), i))
}

// =============================================================================
// Predicate AST
// =============================================================================
//
// `price` and `time` are the only variables. Literals are decimals, bare
// integers, or `HH:MM` time tokens (parsed to minutes since midnight at parse
// time). No other syntax exists — this is not a general expression language.
// =============================================================================

use std::fmt;

use rust_decimal::Decimal;

/// One side of a comparison, or an operand that has already been resolved
/// to a kind (so mixed-type comparisons can be rejected at parse time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Price,
    Time,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Price,
    Time,
    /// A bare decimal/integer literal, compared against `price`.
    Number(Decimal),
    /// An `HH:MM` literal, already converted to minutes since midnight,
    /// compared against `time`.
    TimeLiteral(i64),
}

impl Atom {
    pub fn kind(&self) -> Kind {
        match self {
            Atom::Price | Atom::Number(_) => Kind::Price,
            Atom::Time | Atom::TimeLiteral(_) => Kind::Time,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Price => write!(f, "price"),
            Atom::Time => write!(f, "time"),
            Atom::Number(n) => write!(f, "{n}"),
            Atom::TimeLiteral(minutes) => write!(f, "{:02}:{:02}", minutes / 60, minutes % 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

impl fmt::Display for LogicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicOp::And => write!(f, "AND"),
            LogicOp::Or => write!(f, "OR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Cmp {
        lhs: Atom,
        op: CmpOp,
        rhs: Atom,
    },
    Logic {
        op: LogicOp,
        lhs: Box<Predicate>,
        rhs: Box<Predicate>,
    },
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Cmp { lhs, op, rhs } => write!(f, "{lhs} {op} {rhs}"),
            Predicate::Logic { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
        }
    }
}

/// The variable environment a predicate is evaluated against on a tick.
#[derive(Debug, Clone, Copy)]
pub struct Environment {
    pub price: Decimal,
    pub time: i64,
}

impl Predicate {
    /// Evaluate against an environment. Cannot fail once parsing succeeded —
    /// every atom's kind was checked at parse time.
    pub fn eval(&self, env: Environment) -> bool {
        match self {
            Predicate::Cmp { lhs, op, rhs } => {
                let l = resolve(lhs, env);
                let r = resolve(rhs, env);
                match op {
                    CmpOp::Lt => l < r,
                    CmpOp::Le => l <= r,
                    CmpOp::Gt => l > r,
                    CmpOp::Ge => l >= r,
                    CmpOp::Eq => l == r,
                }
            }
            Predicate::Logic { op, lhs, rhs } => match op {
                LogicOp::And => lhs.eval(env) && rhs.eval(env),
                LogicOp::Or => lhs.eval(env) || rhs.eval(env),
            },
        }
    }

    /// True if this predicate contains an `==` comparison against `price`.
    /// Used to emit the hazard warning described in the spec's open
    /// questions — decimal equality on a continuously moving price rarely
    /// fires as the author intends.
    pub fn uses_price_equality(&self) -> bool {
        match self {
            Predicate::Cmp { lhs, op, rhs } => {
                *op == CmpOp::Eq && (lhs.kind() == Kind::Price) && (rhs.kind() == Kind::Price)
            }
            Predicate::Logic { lhs, rhs, .. } => {
                lhs.uses_price_equality() || rhs.uses_price_equality()
            }
        }
    }
}

fn resolve(atom: &Atom, env: Environment) -> Decimal {
    match atom {
        Atom::Price => env.price,
        Atom::Number(n) => *n,
        Atom::Time => Decimal::from(env.time),
        Atom::TimeLiteral(minutes) => Decimal::from(*minutes),
    }
}

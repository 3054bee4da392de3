//! Expression model for `#if` / `#elif` / `#ifdef` guards.
//!
//! Every guard evaluates against a [`SymbolTable`]: the preprocessor symbols
//! visible at that point of the source, mapped to their textual values.

use std::collections::HashMap;
use std::fmt;

/// Preprocessor environment: symbol name → textual value.
pub type SymbolTable = HashMap<String, String>;

/// Comparison operator of an arithmetic guard (`NUM_LIGHTS > 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    NotEqual,
    GreaterOrEqual,
    LessOrEqual,
    Less,
    Greater,
}

impl Comparator {
    /// Search order used when splitting `SYMBOL <op> VALUE`. Two-character
    /// operators come before their one-character prefixes.
    pub const SEARCH_ORDER: [Comparator; 6] = [
        Comparator::Equal,
        Comparator::NotEqual,
        Comparator::GreaterOrEqual,
        Comparator::LessOrEqual,
        Comparator::Less,
        Comparator::Greater,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Equal => "==",
            Comparator::NotEqual => "!=",
            Comparator::GreaterOrEqual => ">=",
            Comparator::LessOrEqual => "<=",
            Comparator::Less => "<",
            Comparator::Greater => ">",
        }
    }

    /// Apply the comparison. A side that failed to parse behaves like NaN:
    /// every comparison is false except `!=`.
    pub fn compare(&self, left: Option<i64>, right: Option<i64>) -> bool {
        let (Some(left), Some(right)) = (left, right) else {
            return *self == Comparator::NotEqual;
        };
        match self {
            Comparator::Equal => left == right,
            Comparator::NotEqual => left != right,
            Comparator::GreaterOrEqual => left >= right,
            Comparator::LessOrEqual => left <= right,
            Comparator::Less => left < right,
            Comparator::Greater => left > right,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `defined(SYMBOL)`, or `!defined(SYMBOL)` when negated.
    IsDefined { symbol: String, negated: bool },
    /// `SYMBOL <op> VALUE`, compared as integers.
    Arithmetic {
        symbol: String,
        comparator: Comparator,
        value: String,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn is_defined(symbol: &str) -> Self {
        Expr::IsDefined {
            symbol: symbol.to_string(),
            negated: false,
        }
    }

    pub fn is_not_defined(symbol: &str) -> Self {
        Expr::IsDefined {
            symbol: symbol.to_string(),
            negated: true,
        }
    }

    pub fn arithmetic(symbol: &str, comparator: Comparator, value: &str) -> Self {
        Expr::Arithmetic {
            symbol: symbol.to_string(),
            comparator,
            value: value.to_string(),
        }
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::Or(Box::new(left), Box::new(right))
    }

    /// Evaluate the guard. Both operands of `&&`/`||` are always evaluated;
    /// evaluation has no side effects.
    pub fn is_true(&self, symbols: &SymbolTable) -> bool {
        match self {
            Expr::IsDefined { symbol, negated } => symbols.contains_key(symbol) != *negated,
            Expr::Arithmetic {
                symbol,
                comparator,
                value,
            } => {
                // An unknown symbol is compared by its own text, so
                // `#if 3 > 2` works and `#if MISSING > 2` fails.
                let left = symbols.get(symbol).unwrap_or(symbol);
                comparator.compare(parse_int(left), parse_int(value))
            }
            Expr::And(left, right) => {
                let l = left.is_true(symbols);
                let r = right.is_true(symbols);
                l && r
            }
            Expr::Or(left, right) => {
                let l = left.is_true(symbols);
                let r = right.is_true(symbols);
                l || r
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IsDefined { symbol, negated } => {
                let bang = if *negated { "!" } else { "" };
                write!(f, "{bang}defined({symbol})")
            }
            Expr::Arithmetic {
                symbol,
                comparator,
                value,
            } => write!(f, "{symbol} {comparator} {value}"),
            Expr::And(left, right) => write!(f, "({left} && {right})"),
            Expr::Or(left, right) => write!(f, "({left} || {right})"),
        }
    }
}

/// Integer parsing with the leniency of a JavaScript `parseInt`: leading
/// whitespace, optional sign, optional `0x` prefix, then the longest run of
/// digits. Trailing garbage is ignored. `None` means "not a number". Digit
/// runs beyond the `i64` range saturate.
pub fn parse_int(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (radix, digits) = match rest.get(..2) {
        Some("0x") | Some("0X") => (16, &rest[2..]),
        _ => (10, rest),
    };

    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let magnitude = digits[..end]
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0i64, |acc, d| {
            acc.saturating_mul(i64::from(radix)).saturating_add(i64::from(d))
        });
    Some(if negative { -magnitude } else { magnitude })
}

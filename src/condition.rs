//! Condition parser: turns `#if` text into an [`Expr`] tree.
//!
//! Conversion runs in two steps: a shunting-yard pass produces postfix
//! tokens, then a stack reducer assembles the tree. `defined(X)` calls are
//! temporarily rewritten to `defined[X]` so their parentheses survive the
//! shunting-yard pass.
//!
//! Malformed input never fails: the reducer keeps whatever it could build.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::expression::{Comparator, Expr};
use crate::token::{lex_condition, Token};

/// One element of a postfix token stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PostfixToken {
    Operand(String),
    And,
    Or,
}

impl PostfixToken {
    fn from_operator(token: Token) -> Option<Self> {
        match token {
            Token::And => Some(PostfixToken::And),
            Token::Or => Some(PostfixToken::Or),
            _ => None,
        }
    }
}

impl fmt::Display for PostfixToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostfixToken::Operand(text) => f.write_str(text),
            PostfixToken::And => f.write_str("&&"),
            PostfixToken::Or => f.write_str("||"),
        }
    }
}

// ── Infix → postfix ────────────────────────────────────────────────────

const POSTFIX_CACHE_CAPACITY: usize = 50_000;

#[derive(Default)]
struct PostfixCache {
    entries: HashMap<String, (u64, Vec<PostfixToken>)>,
    clock: u64,
}

impl PostfixCache {
    fn get(&mut self, infix: &str) -> Option<Vec<PostfixToken>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(infix).map(|(used, tokens)| {
            *used = clock;
            tokens.clone()
        })
    }

    fn insert(&mut self, infix: &str, tokens: Vec<PostfixToken>) {
        if self.entries.len() >= POSTFIX_CACHE_CAPACITY {
            self.prune();
        }
        self.entries
            .insert(infix.to_string(), (self.clock, tokens));
    }

    /// Drop the least recently used half.
    fn prune(&mut self) {
        let mut stamps: Vec<u64> = self.entries.values().map(|(used, _)| *used).collect();
        stamps.sort_unstable();
        let cutoff = stamps[stamps.len() / 2];
        self.entries.retain(|_, (used, _)| *used > cutoff);
    }
}

thread_local! {
    static POSTFIX_CACHE: RefCell<PostfixCache> = RefCell::new(PostfixCache::default());
}

/// Convert an infix condition to postfix with the shunting-yard algorithm.
///
/// Operands are maximal runs of text between `&&`, `||`, `(` and `)`,
/// trimmed; empty operands are dropped. An opening parenthesis discards any
/// pending operand text. Unbalanced parentheses are tolerated.
pub fn infix_to_postfix(infix: &str) -> Vec<PostfixToken> {
    if let Some(cached) = POSTFIX_CACHE.with(|cache| cache.borrow_mut().get(infix)) {
        return cached;
    }

    let postfix = if !infix.contains("&&")
        && !infix.contains("||")
        && !infix.contains('(')
        && !infix.contains(')')
    {
        vec![PostfixToken::Operand(infix.to_string())]
    } else {
        shunting_yard(infix)
    };

    POSTFIX_CACHE.with(|cache| cache.borrow_mut().insert(infix, postfix.clone()));
    postfix
}

fn shunting_yard(infix: &str) -> Vec<PostfixToken> {
    let mut output = Vec::new();
    let mut stack: Vec<Token> = Vec::new();
    let mut operand = String::new();

    fn flush(operand: &mut String, output: &mut Vec<PostfixToken>) {
        let trimmed = operand.trim();
        if !trimmed.is_empty() {
            output.push(PostfixToken::Operand(trimmed.to_string()));
        }
        operand.clear();
    }

    for lexeme in lex_condition(infix) {
        match lexeme.token {
            Token::LParen => {
                operand.clear();
                stack.push(Token::LParen);
            }
            Token::RParen => {
                flush(&mut operand, &mut output);
                while let Some(top) = stack.pop() {
                    if top == Token::LParen {
                        break;
                    }
                    output.extend(PostfixToken::from_operator(top));
                }
            }
            op @ (Token::And | Token::Or) => {
                flush(&mut operand, &mut output);
                while let Some(&top) = stack.last() {
                    if top.precedence() < op.precedence() {
                        break;
                    }
                    stack.pop();
                    output.extend(PostfixToken::from_operator(top));
                }
                stack.push(op);
            }
            Token::Text | Token::Amp | Token::Bar => operand.push_str(lexeme.text),
        }
    }

    flush(&mut operand, &mut output);
    while let Some(top) = stack.pop() {
        output.extend(PostfixToken::from_operator(top));
    }

    output
}

/// Render a postfix stream back to fully parenthesized infix text.
///
/// A binary operator with fewer than two operands available is skipped.
pub fn postfix_to_infix(postfix: &[PostfixToken]) -> String {
    let mut stack: Vec<String> = Vec::new();

    for token in postfix {
        match token {
            PostfixToken::Operand(text) => stack.push(text.clone()),
            op => {
                if stack.len() < 2 {
                    continue;
                }
                let right = stack.pop().unwrap_or_default();
                let left = stack.pop().unwrap_or_default();
                stack.push(format!("({left}{op}{right})"));
            }
        }
    }

    stack.pop().unwrap_or_default()
}

// ── Postfix → tree ─────────────────────────────────────────────────────

fn defined_call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"defined\s*?\((.+?)\)").expect("static regex"))
}

fn defined_bracket_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"defined\s*?\[(.+?)\]").expect("static regex"))
}

fn single_defined_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"defined\((.+)\)").expect("static regex"))
}

fn restore_defined_calls(text: &str) -> String {
    defined_bracket_regex()
        .replace_all(text, "defined($1)")
        .into_owned()
}

enum Operand {
    Text(String),
    Node(Expr),
}

impl Operand {
    fn into_expr(self) -> Expr {
        match self {
            Operand::Text(text) => extract_operation(&restore_defined_calls(&text)),
            Operand::Node(expr) => expr,
        }
    }
}

/// Build the guard tree for the text following `#if` / `#elif`.
pub fn build_sub_expression(expression: &str) -> Expr {
    let protected = defined_call_regex().replace_all(expression, "defined[$1]");
    let postfix = infix_to_postfix(&protected);

    let mut stack: Vec<Operand> = Vec::new();
    for token in postfix {
        match token {
            PostfixToken::Operand(text) => stack.push(Operand::Text(text)),
            op => {
                if stack.len() < 2 {
                    log::warn!(
                        "malformed condition '{expression}': '{op}' is missing an operand"
                    );
                    continue;
                }
                let (Some(right), Some(left)) = (stack.pop(), stack.pop()) else {
                    continue;
                };
                let node = match op {
                    PostfixToken::And => Expr::and(left.into_expr(), right.into_expr()),
                    _ => Expr::or(left.into_expr(), right.into_expr()),
                };
                stack.push(Operand::Node(node));
            }
        }
    }

    match stack.pop() {
        Some(top) => top.into_expr(),
        // Nothing to test (`#if` with no condition): a symbol nobody defines.
        None => Expr::is_defined(""),
    }
}

/// Materialize a single operand: a `defined(X)` call (negated when the text
/// starts with `!`), a `SYMBOL <op> VALUE` comparison, or otherwise an
/// implicit "is defined" check on the whole text.
pub fn extract_operation(expression: &str) -> Expr {
    if let Some(caps) = single_defined_regex().captures(expression) {
        let symbol = caps[1].trim();
        return if expression.starts_with('!') {
            Expr::is_not_defined(symbol)
        } else {
            Expr::is_defined(symbol)
        };
    }

    for comparator in Comparator::SEARCH_ORDER {
        if let Some(index) = expression.find(comparator.as_str()) {
            let symbol = expression[..index].trim();
            let value = expression[index + comparator.as_str().len()..].trim();
            return Expr::arithmetic(symbol, comparator, value);
        }
    }

    Expr::is_defined(expression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::SymbolTable;

    fn operands(postfix: &[PostfixToken]) -> Vec<String> {
        postfix.iter().map(|t| t.to_string()).collect()
    }

    fn env(names: &[&str]) -> SymbolTable {
        names.iter().map(|n| (n.to_string(), "1".to_string())).collect()
    }

    #[test]
    fn postfix_respects_precedence() {
        let postfix = infix_to_postfix("A || B && C");
        assert_eq!(operands(&postfix), vec!["A", "B", "C", "&&", "||"]);
    }

    #[test]
    fn postfix_left_associative() {
        let postfix = infix_to_postfix("A && B && C");
        assert_eq!(operands(&postfix), vec!["A", "B", "&&", "C", "&&"]);
    }

    #[test]
    fn postfix_parentheses_override() {
        let postfix = infix_to_postfix("(A || B) && C");
        assert_eq!(operands(&postfix), vec!["A", "B", "||", "C", "&&"]);
    }

    #[test]
    fn postfix_plain_operand_untouched() {
        let postfix = infix_to_postfix("NUM_LIGHTS > 0");
        assert_eq!(postfix, vec![PostfixToken::Operand("NUM_LIGHTS > 0".into())]);
    }

    #[test]
    fn postfix_unbalanced_parentheses_tolerated() {
        let postfix = infix_to_postfix("((A && B");
        assert_eq!(operands(&postfix), vec!["A", "B", "&&"]);
        let postfix = infix_to_postfix("A && B))");
        assert_eq!(operands(&postfix), vec!["A", "B", "&&"]);
    }

    #[test]
    fn postfix_to_infix_parenthesizes() {
        let postfix = infix_to_postfix("A || B && C");
        assert_eq!(postfix_to_infix(&postfix), "(A||(B&&C))");
    }

    #[test]
    fn build_defined_combination() {
        let expr = build_sub_expression("defined(A) && !defined(B)");
        assert_eq!(
            expr,
            Expr::and(Expr::is_defined("A"), Expr::is_not_defined("B"))
        );
        assert!(expr.is_true(&env(&["A"])));
        assert!(!expr.is_true(&env(&["A", "B"])));
    }

    #[test]
    fn build_single_defined_call() {
        let expr = build_sub_expression("defined( FOG )");
        assert_eq!(expr, Expr::is_defined("FOG"));
    }

    #[test]
    fn build_comparison_mixed_with_defined() {
        let expr = build_sub_expression("defined(LIGHTS) && NUM_LIGHTS >= 2");
        let mut symbols = env(&["LIGHTS"]);
        symbols.insert("NUM_LIGHTS".into(), "4".into());
        assert!(expr.is_true(&symbols));
        symbols.insert("NUM_LIGHTS".into(), "1".into());
        assert!(!expr.is_true(&symbols));
    }

    #[test]
    fn extract_prefers_two_character_comparators() {
        assert_eq!(
            extract_operation("A <= 3"),
            Expr::arithmetic("A", Comparator::LessOrEqual, "3")
        );
        assert_eq!(
            extract_operation("A >= 3"),
            Expr::arithmetic("A", Comparator::GreaterOrEqual, "3")
        );
        assert_eq!(
            extract_operation("A == 3"),
            Expr::arithmetic("A", Comparator::Equal, "3")
        );
        assert_eq!(
            extract_operation("A != 3"),
            Expr::arithmetic("A", Comparator::NotEqual, "3")
        );
    }

    #[test]
    fn extract_bare_symbol_is_defined_check() {
        assert_eq!(extract_operation("USE_FOG"), Expr::is_defined("USE_FOG"));
    }

    #[test]
    fn malformed_expression_degrades() {
        // `&&` with a single operand: the reducer leaves the operand alone.
        let expr = build_sub_expression("&& A");
        assert_eq!(expr, Expr::is_defined("A"));
        let expr = build_sub_expression("");
        assert!(!expr.is_true(&env(&["A"])));
    }

    #[test]
    fn round_trip_preserves_truth_table() {
        let cases = [
            "defined(A) && defined(B)",
            "defined(A) || defined(B) && defined(C)",
            "(defined(A) || defined(B)) && !defined(C)",
            "!defined(A) || (defined(B) && (defined(C) || defined(D)))",
            "((defined(A) && defined(B)) || (defined(C) && defined(D))) && !defined(B)",
        ];
        let names = ["A", "B", "C", "D"];

        for case in cases {
            let original = build_sub_expression(case);
            let protected = defined_call_regex().replace_all(case, "defined[$1]");
            let infix = restore_defined_calls(&postfix_to_infix(&infix_to_postfix(&protected)));
            let rebuilt = build_sub_expression(&infix);
            let rendered = build_sub_expression(&original.to_string());

            for mask in 0..(1u32 << names.len()) {
                let present: Vec<&str> = names
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, n)| *n)
                    .collect();
                let symbols = env(&present);
                let expected = original.is_true(&symbols);
                assert_eq!(rebuilt.is_true(&symbols), expected, "{case} via {infix}");
                assert_eq!(rendered.is_true(&symbols), expected, "{case} via Display");
            }
        }
    }

    #[test]
    fn cache_prunes_older_half() {
        let mut cache = PostfixCache::default();
        for i in 0..10 {
            cache.clock += 1;
            cache.insert(&format!("E{i}"), vec![]);
        }
        cache.prune();
        assert!(cache.entries.len() <= 5);
        assert!(cache.entries.contains_key("E9"));
    }
}

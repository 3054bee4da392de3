//! Conditional-compilation tree.
//!
//! The source is first decomposed into a tree of plain lines and
//! conditional blocks ([`build_tree`]), then rendered against a symbol table
//! ([`CodeNode::process`]). Rendering walks the tree in document order and
//! applies the processor's line hooks to every emitted line.

use std::sync::OnceLock;

use regex::Regex;

use crate::condition::build_sub_expression;
use crate::cursor::Cursor;
use crate::expression::{Expr, SymbolTable};
use crate::options::ProcessingOptions;

/// Line terminator appended to every rendered line.
pub const LINE_END: &str = "\r\n";

/// A source line and the nodes nested under it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeNode {
    pub line: Option<String>,
    pub children: Vec<Node>,
    /// Symbol committed to the environment once this node is rendered
    /// (`#define NAME [VALUE]` lines).
    pub additional_define: Option<AdditionalDefine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdditionalDefine {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Code(CodeNode),
    Condition(ConditionNode),
}

/// An `#if`/`#ifdef`/`#ifndef` block: its branches in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionNode {
    pub branches: Vec<TestNode>,
}

/// One branch of a conditional block. `test` is `None` for `#else`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestNode {
    pub test: Option<Expr>,
    pub body: CodeNode,
}

impl TestNode {
    pub fn is_valid(&self, symbols: &SymbolTable) -> bool {
        self.test.as_ref().map_or(true, |t| t.is_true(symbols))
    }
}

// ── Building ───────────────────────────────────────────────────────────

fn directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(#ifdef)|(#else)|(#elif)|(#endif)|(#ifndef)|(#if)").expect("static regex")
    })
}

/// Parse shader source into a tree rooted at a line-less node.
pub fn build_tree(source: &str) -> CodeNode {
    let mut cursor = Cursor::new(source);
    let mut root = CodeNode::default();
    move_cursor(&mut cursor, &mut root);
    root
}

/// Consume lines into `node` until a branch boundary.
///
/// Returns `true` when stopped on `#else`/`#elif` (the caller decides what
/// the next branch is) and `false` on `#endif` or end of input. Nested
/// blocks are consumed by recursion, so a boundary always belongs to the
/// innermost open block.
pub fn move_cursor(cursor: &mut Cursor, node: &mut CodeNode) -> bool {
    while let Some(line) = cursor.advance() {
        let line = line.to_string();

        if line.contains('#') {
            if let Some(keyword) = directive_regex().find(&line) {
                match keyword.as_str() {
                    "#ifdef" => open_block(cursor, node, &line, 6),
                    "#ifndef" => open_block(cursor, node, &line, 7),
                    "#if" => open_block(cursor, node, &line, 3),
                    "#else" | "#elif" => return true,
                    _ => return false,
                }
                continue;
            }
        }

        let additional_define = if line.starts_with("#d") {
            parse_additional_define(&line)
        } else {
            None
        };
        node.children.push(Node::Code(CodeNode {
            line: Some(line),
            children: Vec::new(),
            additional_define,
        }));
    }

    false
}

fn open_block(cursor: &mut Cursor, node: &mut CodeNode, line: &str, start: usize) {
    let mut condition = ConditionNode {
        branches: vec![build_test_node(line, start)],
    };
    move_cursor_within_if(cursor, &mut condition);
    node.children.push(Node::Condition(condition));
}

fn move_cursor_within_if(cursor: &mut Cursor, condition: &mut ConditionNode) {
    loop {
        let Some(branch) = condition.branches.last_mut() else {
            return;
        };
        if !move_cursor(cursor, &mut branch.body) {
            return;
        }

        let line = cursor.current_line().to_string();
        let head = line.get(..5).unwrap_or(&line).to_ascii_lowercase();
        if head == "#else" {
            let mut body = CodeNode::default();
            move_cursor(cursor, &mut body);
            condition.branches.push(TestNode { test: None, body });
            return;
        } else if head == "#elif" {
            condition.branches.push(build_test_node(&line, 5));
        }
    }
}

/// Build the guard of a directive line; `start` is the directive length.
fn build_test_node(line: &str, start: usize) -> TestNode {
    let command = line.get(..start).unwrap_or(line);
    let expression = line.get(start..).unwrap_or("");
    let expression = match expression.find("//") {
        Some(comment) => &expression[..comment],
        None => expression,
    }
    .trim();

    let test = match command {
        "#ifdef" => Expr::is_defined(expression),
        "#ifndef" => Expr::is_not_defined(expression),
        _ => build_sub_expression(expression),
    };

    TestNode {
        test: Some(test),
        body: CodeNode::default(),
    }
}

/// `#define NAME VALUE` → key `NAME`, value `VALUE` (only for exactly
/// three space-separated parts).
fn parse_additional_define(line: &str) -> Option<AdditionalDefine> {
    let line = line.replacen(';', "", 1);
    let parts: Vec<&str> = line.split(' ').collect();
    let key = parts.get(1).filter(|k| !k.is_empty())?;
    Some(AdditionalDefine {
        key: key.to_string(),
        value: if parts.len() == 3 {
            Some(parts[2].to_string())
        } else {
            None
        },
    })
}

// ── Rendering ──────────────────────────────────────────────────────────

fn simple_uniform_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"uniform\s+(?:(?:highp)?|(?:lowp)?)\s*(\S+)\s+(\S+)\s*;").expect("static regex")
    })
}

impl Node {
    pub fn process(&self, symbols: &mut SymbolTable, options: &mut ProcessingOptions) -> String {
        match self {
            Node::Code(node) => node.process(symbols, options),
            Node::Condition(node) => node.process(symbols, options),
        }
    }
}

impl ConditionNode {
    /// Render the first branch whose guard holds; the rest are skipped.
    pub fn process(&self, symbols: &mut SymbolTable, options: &mut ProcessingOptions) -> String {
        for branch in &self.branches {
            if branch.is_valid(symbols) {
                return branch.body.process(symbols, options);
            }
        }
        String::new()
    }
}

impl CodeNode {
    /// Render this node's line, then its children. A define declared by
    /// this node is committed afterwards, so it is visible to every node
    /// rendered later.
    pub fn process(&self, symbols: &mut SymbolTable, options: &mut ProcessingOptions) -> String {
        let mut result = String::new();

        if let Some(line) = self.line.as_deref().filter(|l| !l.is_empty()) {
            let value = rewrite_line(line, symbols, options);
            result.push_str(&value);
            result.push_str(LINE_END);
        }

        for child in &self.children {
            result.push_str(&child.process(symbols, options));
        }

        if let Some(define) = &self.additional_define {
            let value = define
                .value
                .clone()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "true".to_string());
            symbols.insert(define.key.clone(), value);
        }

        result
    }
}

/// Apply the processor hooks to one line. Category tests run against the
/// original line, never against a value a previous hook produced.
fn rewrite_line(line: &str, symbols: &SymbolTable, options: &mut ProcessingOptions) -> String {
    let is_fragment = options.is_fragment;
    let Some(processor) = options.processor.as_deref_mut() else {
        return line.to_string();
    };

    let mut value = processor
        .line_processor(line, is_fragment)
        .unwrap_or_else(|| line.to_string());

    let attribute_keyword = processor.attribute_keyword().to_string();
    let varying_keyword = if is_fragment {
        processor.varying_fragment_keyword()
    } else {
        processor.varying_vertex_keyword()
    }
    .to_string();

    let is_varying = processor
        .varying_check(line, is_fragment)
        .unwrap_or_else(|| line.starts_with(&varying_keyword));
    let is_uniform = processor.uniform_regex().is_some_and(|re| re.is_match(line));
    let is_uniform_buffer = processor
        .uniform_buffer_regex()
        .is_some_and(|re| re.is_match(line));
    let is_texture = processor.texture_regex().is_some_and(|re| re.is_match(line));
    let in_uniform_buffer = options.look_for_closing_bracket_for_uniform_buffer;

    let attribute = if !is_fragment && line.starts_with(&attribute_keyword) {
        processor.attribute_processor(line, symbols)
    } else {
        None
    };
    let varying = if attribute.is_none() && is_varying {
        processor.varying_processor(line, is_fragment, symbols)
    } else {
        None
    };

    if let Some(rewritten) = attribute.or(varying) {
        value = rewritten;
    } else if is_uniform {
        if !in_uniform_buffer {
            if let Some(rewritten) = processor.uniform_processor(line, is_fragment, symbols) {
                value = rewritten;
            }
        }
    } else if is_uniform_buffer {
        if !in_uniform_buffer {
            if let Some(rewritten) = processor.uniform_buffer_processor(line, is_fragment) {
                value = rewritten;
                options.look_for_closing_bracket_for_uniform_buffer = true;
            }
        }
    } else if is_texture {
        if let Some(rewritten) = processor.texture_processor(line, is_fragment, symbols) {
            value = rewritten;
        }
    } else if line.starts_with("uniform") && !in_uniform_buffer {
        if simple_uniform_regex().is_match(line) {
            if let Some(rewritten) = processor.uniform_processor(line, is_fragment, symbols) {
                value = rewritten;
            }
        } else if let Some(rewritten) = processor.uniform_buffer_processor(line, is_fragment) {
            value = rewritten;
            options.look_for_closing_bracket_for_uniform_buffer = true;
        }
    }

    if options.look_for_closing_bracket_for_uniform_buffer && line.contains('}') {
        options.look_for_closing_bracket_for_uniform_buffer = false;
        if let Some(rewritten) = processor.end_of_uniform_buffer_processor(line, is_fragment) {
            value = rewritten;
        }
    }

    value
}

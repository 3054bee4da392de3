/// Forward-only view over the logical lines of a shader source.
///
/// Logical lines differ from physical ones: blank lines are dropped, code
/// lines are trimmed, and a code line holding several statements is split
/// after each `;`. Directive lines (starting with `#`) and `//` comments are
/// kept whole.
#[derive(Debug, Clone)]
pub struct Cursor {
    lines: Vec<String>,
    /// Number of lines consumed so far; the current line is the last one.
    consumed: usize,
}

impl Cursor {
    pub fn new(source: &str) -> Self {
        Self {
            lines: split_logical_lines(source),
            consumed: 0,
        }
    }

    /// Whether another line can be consumed.
    pub fn can_read(&self) -> bool {
        self.consumed < self.lines.len()
    }

    /// Move to the next line and return it.
    pub fn advance(&mut self) -> Option<&str> {
        if !self.can_read() {
            return None;
        }
        self.consumed += 1;
        Some(self.current_line())
    }

    /// The most recently consumed line (empty before the first `advance`).
    pub fn current_line(&self) -> &str {
        self.consumed
            .checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    #[cfg(test)]
    fn lines(&self) -> &[String] {
        &self.lines
    }
}

fn split_logical_lines(source: &str) -> Vec<String> {
    let mut lines = Vec::new();

    for line in source.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        // Directives keep their exact text, macro continuations included.
        if line.starts_with('#') {
            lines.push(line.to_string());
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("//") {
            lines.push(line.to_string());
            continue;
        }

        match trimmed.find(';') {
            None => lines.push(trimmed.to_string()),
            Some(i) if i == trimmed.len() - 1 => {
                // A lone `;` is dropped.
                if trimmed.len() > 1 {
                    lines.push(trimmed.to_string());
                }
            }
            Some(_) => {
                let parts: Vec<&str> = line.split(';').collect();
                let last = parts.len() - 1;
                for (index, part) in parts.iter().enumerate() {
                    let part = part.trim();
                    if part.is_empty() {
                        continue;
                    }
                    if index == last {
                        lines.push(part.to_string());
                    } else {
                        lines.push(format!("{part};"));
                    }
                }
            }
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_blank_lines_and_trims_code() {
        let cursor = Cursor::new("  vec3 a = b;  \n\n\r\n   \nfloat x;");
        assert_eq!(cursor.lines(), &["vec3 a = b;", "float x;"]);
    }

    #[test]
    fn crlf_line_endings_removed() {
        let cursor = Cursor::new("#define LOCAL\r\n// note\r\nfloat x;\r\n");
        assert_eq!(cursor.lines(), &["#define LOCAL", "// note", "float x;"]);
    }

    #[test]
    fn splits_statements_after_semicolons() {
        let cursor = Cursor::new("a = 1; b = 2; c");
        assert_eq!(cursor.lines(), &["a = 1;", "b = 2;", "c"]);
    }

    #[test]
    fn trailing_semicolon_kept_on_last_statement() {
        let cursor = Cursor::new("a = 1; b = 2;");
        assert_eq!(cursor.lines(), &["a = 1;", "b = 2;"]);
    }

    #[test]
    fn lone_semicolon_dropped() {
        let cursor = Cursor::new("x\n  ;  \ny");
        assert_eq!(cursor.lines(), &["x", "y"]);
    }

    #[test]
    fn directives_and_comments_kept_whole() {
        let cursor = Cursor::new("#define A 1; B\n  // a; b; c\nfoo");
        assert_eq!(cursor.lines(), &["#define A 1; B", "  // a; b; c", "foo"]);
    }

    #[test]
    fn advances_monotonically() {
        let mut cursor = Cursor::new("one\ntwo");
        assert_eq!(cursor.current_line(), "");
        assert!(cursor.can_read());
        assert_eq!(cursor.advance(), Some("one"));
        assert_eq!(cursor.advance(), Some("two"));
        assert!(!cursor.can_read());
        assert_eq!(cursor.advance(), None);
        assert_eq!(cursor.current_line(), "two");
    }
}

use logos::Logos;

/// Tokens of a `#if` / `#elif` condition.
///
/// Only the structural tokens of the boolean grammar are distinguished.
/// Everything else (symbols, `defined[X]`, comparisons, stray `&` or `|`)
/// is operand text that the shunting-yard scan accumulates verbatim.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
pub enum Token {
    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    // ── Operand text ───────────────────────────────────────────────────
    #[regex(r"[^&|()]+")]
    Text,
    #[token("&")]
    Amp,
    #[token("|")]
    Bar,
}

impl Token {
    /// Binding strength of a binary operator. `&&` binds tighter than `||`.
    pub fn precedence(&self) -> u8 {
        match self {
            Token::And => 3,
            Token::Or => 2,
            Token::LParen => 1,
            _ => 0,
        }
    }
}

/// A token with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme<'a> {
    pub token: Token,
    pub text: &'a str,
}

/// Split condition text into lexemes. Every character belongs to some
/// token, so this never fails; anything logos rejects is kept as text.
pub fn lex_condition(source: &str) -> Vec<Lexeme<'_>> {
    let mut lexer = Token::lexer(source);
    let mut lexemes = Vec::new();

    while let Some(result) = lexer.next() {
        let token = result.unwrap_or(Token::Text);
        lexemes.push(Lexeme {
            token,
            text: lexer.slice(),
        });
    }

    lexemes
}

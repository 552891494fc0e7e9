//! Query tokenizer.

use crate::error::{MelvinError, MelvinResult};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier, keyword, number or bare literal (`gpt-4`, `-7d`, `2024-01-01`)
    Word(String),
    /// Quoted string, quotes removed
    Str(String),
    /// Comparison operator
    Op(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Pipe,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset in the query text
    pub position: usize,
}

impl Token {
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Word(w) => format!("'{w}'"),
            TokenKind::Str(s) => format!("\"{s}\""),
            TokenKind::Op(o) => format!("'{o}'"),
            TokenKind::LParen => "'('".into(),
            TokenKind::RParen => "')'".into(),
            TokenKind::LBracket => "'['".into(),
            TokenKind::RBracket => "']'".into(),
            TokenKind::Comma => "','".into(),
            TokenKind::Pipe => "'|'".into(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '[' | ']' | ',' | '|' | '"' | '\'' | '=' | '!' | '<' | '>')
}

pub fn tokenize(text: &str) -> MelvinResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let single = match c {
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            ',' => Some(TokenKind::Comma),
            '|' => Some(TokenKind::Pipe),
            _ => None,
        };
        if let Some(kind) = single {
            chars.next();
            tokens.push(Token { kind, position: start });
            continue;
        }

        match c {
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        // only the quote and the backslash are escapable; `\d` stays as written
                        '\\' => match chars.peek() {
                            Some(&(_, escaped)) if escaped == c || escaped == '\\' => {
                                value.push(escaped);
                                chars.next();
                            }
                            _ => value.push('\\'),
                        },
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => value.push(ch),
                    }
                }
                if !closed {
                    return Err(MelvinError::syntax("unterminated string literal", start));
                }
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    position: start,
                });
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let mut op = c.to_string();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    op.push('=');
                }
                if op == "!" {
                    return Err(MelvinError::syntax("'!' must be followed by '='", start));
                }
                tokens.push(Token {
                    kind: TokenKind::Op(op),
                    position: start,
                });
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if !is_word_char(ch) {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token {
                    kind: TokenKind::Word(word),
                    position: start,
                });
            }
        }
    }
    Ok(tokens)
}

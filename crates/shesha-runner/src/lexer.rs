//! Tokenizer for the runner's mini-language.
//!
//! Line-oriented: a newline ends a statement unless it falls inside an open
//! bracket pair. `#` starts a comment running to end of line.

use std::fmt;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    // Keyword literals
    True,
    False,
    None,
    And,
    Or,
    Not,
    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "{}", name),
            Token::Int(n) => write!(f, "{}", n),
            Token::Str(_) => write!(f, "string literal"),
            Token::True => write!(f, "True"),
            Token::False => write!(f, "False"),
            Token::None => write!(f, "None"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Assign => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::Newline => write!(f, "newline"),
        }
    }
}

/// Tokenize `source`, or return a `SyntaxError: …` message.
pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1usize;
    let mut bracket_depth = 0usize;

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '\r' => {
                chars.next();
            }
            '\n' => {
                chars.next();
                line += 1;
                // Newlines inside brackets are continuations, and runs of
                // blank lines collapse to one statement boundary.
                if bracket_depth == 0 && tokens.last() != Some(&Token::Newline) {
                    tokens.push(Token::Newline);
                }
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' | '\'' => {
                tokens.push(lex_string(&mut chars, line)?);
            }
            '0'..='9' => {
                let mut digits = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: i64 = digits
                    .parse()
                    .map_err(|_| format!("SyntaxError: integer literal too large on line {}", line))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "True" => Token::True,
                    "False" => Token::False,
                    "None" => Token::None,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(ident),
                });
            }
            '(' => {
                chars.next();
                bracket_depth += 1;
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                bracket_depth = bracket_depth.saturating_sub(1);
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                bracket_depth += 1;
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                bracket_depth = bracket_depth.saturating_sub(1);
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Eq);
                } else {
                    tokens.push(Token::Assign);
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    return Err(format!("SyntaxError: unexpected '!' on line {}", line));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            other => {
                return Err(format!(
                    "SyntaxError: unexpected character {:?} on line {}",
                    other, line
                ));
            }
        }
    }

    // Normalize: every statement ends in a Newline token.
    if tokens.last().is_some_and(|t| *t != Token::Newline) {
        tokens.push(Token::Newline);
    }
    Ok(tokens)
}

fn lex_string(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: usize,
) -> Result<Token, String> {
    let quote = chars.next().expect("caller peeked a quote");
    let mut out = String::new();
    loop {
        match chars.next() {
            Some(c) if c == quote => return Ok(Token::Str(out)),
            Some('\\') => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                Some(other) => {
                    return Err(format!(
                        "SyntaxError: unknown escape '\\{}' on line {}",
                        other, line
                    ));
                }
                None => {
                    return Err(format!(
                        "SyntaxError: unterminated string on line {}",
                        line
                    ));
                }
            },
            Some('\n') | None => {
                return Err(format!("SyntaxError: unterminated string on line {}", line));
            }
            Some(c) => out.push(c),
        }
    }
}

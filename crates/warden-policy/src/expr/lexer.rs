use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    True,
    False,
    In,

    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,

    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '=' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        tokens.push(Token::EqEq);
                    }
                    _ => return Err(unexpected(pos, "'=' (did you mean '=='?)")),
                }
            }
            '!' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '<' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '&')) => {
                        chars.next();
                        tokens.push(Token::AndAnd);
                    }
                    _ => return Err(unexpected(pos, "'&' (did you mean '&&'?)")),
                }
            }
            '|' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '|')) => {
                        chars.next();
                        tokens.push(Token::OrOr);
                    }
                    _ => return Err(unexpected(pos, "'|' (did you mean '||'?)")),
                }
            }
            '"' | '\'' => {
                tokens.push(lex_string(&mut chars, ch)?);
            }
            c if c.is_ascii_digit() => {
                tokens.push(lex_number(&mut chars)?);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "in" => Token::In,
                    _ => Token::Ident(ident),
                });
            }
            other => return Err(unexpected(pos, &format!("character '{}'", other))),
        }
    }

    Ok(tokens)
}

fn lex_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    quote: char,
) -> Result<Token> {
    chars.next(); // opening quote
    let mut value = String::new();
    loop {
        match chars.next() {
            Some((_, c)) if c == quote => return Ok(Token::Str(value)),
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, c)) if c == quote => value.push(c),
                Some((_, c)) => {
                    value.push('\\');
                    value.push(c);
                }
                None => return Err(Error::Compile("unterminated string literal".into())),
            },
            Some((_, c)) => value.push(c),
            None => return Err(Error::Compile("unterminated string literal".into())),
        }
    }
}

fn lex_number(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> Result<Token> {
    let mut raw = String::new();
    let mut is_float = false;
    while let Some(&(_, c)) = chars.peek() {
        if c.is_ascii_digit() {
            raw.push(c);
            chars.next();
        } else if c == '.' && !is_float {
            // Lookahead: "10.contains" must lex as Int(10), Dot, Ident.
            let mut ahead = chars.clone();
            ahead.next();
            match ahead.peek() {
                Some(&(_, d)) if d.is_ascii_digit() => {
                    is_float = true;
                    raw.push(c);
                    chars.next();
                }
                _ => break,
            }
        } else {
            break;
        }
    }

    if is_float {
        raw.parse::<f64>()
            .map(Token::Float)
            .map_err(|e| Error::Compile(format!("bad float literal '{}': {}", raw, e)))
    } else {
        raw.parse::<i64>()
            .map(Token::Int)
            .map_err(|e| Error::Compile(format!("bad int literal '{}': {}", raw, e)))
    }
}

fn unexpected(pos: usize, what: &str) -> Error {
    Error::Compile(format!("unexpected {} at offset {}", what, pos))
}

use crate::expr::{CompileError, Field};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Imaginary(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Bang,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

pub fn tokenize(src: &str, field: Field) -> Result<Vec<Spanned>, CompileError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let ch = bytes[i];
        if ch.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if ch.is_ascii_digit() || (ch == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            let end = scan_number(bytes, i);
            let text = &src[start..end];
            let (digits, imaginary) = match text.strip_suffix('i') {
                Some(d) => (d, true),
                None => (text, false),
            };
            let value: f64 = digits.parse().map_err(|_| CompileError::Syntax {
                field,
                pos: start,
                message: format!("malformed number '{text}'"),
            })?;
            let token = if imaginary {
                Token::Imaginary(value)
            } else {
                Token::Number(value)
            };
            out.push(Spanned { token, start, end });
            i = end;
            continue;
        }
        if ch.is_ascii_alphabetic() || ch == b'_' {
            let end = scan_ident(bytes, i);
            out.push(Spanned {
                token: Token::Ident(src[start..end].to_string()),
                start,
                end,
            });
            i = end;
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let (token, len) = match (ch, next) {
            (b'<', Some(b'=')) => (Token::Le, 2),
            (b'>', Some(b'=')) => (Token::Ge, 2),
            (b'=', Some(b'=')) => (Token::EqEq, 2),
            (b'!', Some(b'=')) => (Token::NotEq, 2),
            (b'&', Some(b'&')) => (Token::AndAnd, 2),
            (b'|', Some(b'|')) => (Token::OrOr, 2),
            (b'+', _) => (Token::Plus, 1),
            (b'-', _) => (Token::Minus, 1),
            (b'*', _) => (Token::Star, 1),
            (b'/', _) => (Token::Slash, 1),
            (b'^', _) => (Token::Caret, 1),
            (b'!', _) => (Token::Bang, 1),
            (b'<', _) => (Token::Lt, 1),
            (b'>', _) => (Token::Gt, 1),
            (b'(', _) => (Token::LParen, 1),
            (b')', _) => (Token::RParen, 1),
            (b'[', _) => (Token::LBracket, 1),
            (b']', _) => (Token::RBracket, 1),
            (b',', _) => (Token::Comma, 1),
            _ => {
                let shown = src[start..].chars().next().unwrap_or('?');
                return Err(CompileError::Syntax {
                    field,
                    pos: start,
                    message: format!("unexpected character '{shown}'"),
                });
            }
        };
        out.push(Spanned {
            token,
            start,
            end: start + len,
        });
        i += len;
    }
    Ok(out)
}

/// Rewrites every whole-identifier occurrence of `names[k]` to `slot(k)`.
///
/// Replacement works on lexer tokens, so `a` never matches inside `abc`, `a2` or a numeric
/// literal such as `2e5`.
pub fn substitute_params(
    src: &str,
    names: &[&str],
    field: Field,
    slot: impl Fn(usize) -> String,
) -> Result<String, CompileError> {
    let tokens = tokenize(src, field)?;
    let mut out = String::with_capacity(src.len() + 8);
    let mut cursor = 0usize;
    for tok in &tokens {
        let Token::Ident(name) = &tok.token else {
            continue;
        };
        let Some(idx) = names.iter().position(|n| n == name) else {
            continue;
        };
        out.push_str(&src[cursor..tok.start]);
        out.push_str(&slot(idx));
        cursor = tok.end;
    }
    out.push_str(&src[cursor..]);
    Ok(out)
}

/// The textual slot reference understood by the parser.
pub fn slot_ref(idx: usize) -> String {
    format!("slot[{idx}]")
}

fn scan_ident(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    i
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    // A trailing `i` marks an imaginary literal, but only when it does not start a longer word.
    if i < bytes.len()
        && bytes[i] == b'i'
        && !bytes
            .get(i + 1)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
    {
        i += 1;
    }
    i
}

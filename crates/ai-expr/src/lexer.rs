use crate::error::{ExprError, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    QuestionDot,
    Question,
    Coalesce,
    Colon,
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
    Bang,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    let err = |position: usize, message: &str| ExprError::Syntax {
        expression: source.to_string(),
        position,
        message: message.to_string(),
    };

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        let two = if i + 1 < bytes.len() {
            Some((c, bytes[i + 1]))
        } else {
            None
        };

        let token = match two {
            Some((b'=', b'=')) => Some(Token::Eq),
            Some((b'!', b'=')) => Some(Token::Ne),
            Some((b'<', b'=')) => Some(Token::Le),
            Some((b'>', b'=')) => Some(Token::Ge),
            Some((b'&', b'&')) => Some(Token::And),
            Some((b'|', b'|')) => Some(Token::Or),
            Some((b'?', b'?')) => Some(Token::Coalesce),
            Some((b'?', b'.')) => Some(Token::QuestionDot),
            _ => None,
        };
        if let Some(token) = token {
            out.push(Spanned {
                token,
                offset: start,
            });
            i += 2;
            continue;
        }

        let token = match c {
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b',' => Token::Comma,
            b'.' if follows_operand(&out) || !bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) => {
                Token::Dot
            }
            b'?' => Token::Question,
            b':' => Token::Colon,
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'<' => Token::Lt,
            b'>' => Token::Gt,
            b'!' => Token::Bang,
            b'\'' | b'"' => {
                let (text, next) = lex_string(source, i).ok_or_else(|| err(start, "unterminated string"))?;
                i = next;
                out.push(Spanned {
                    token: Token::Str(text),
                    offset: start,
                });
                continue;
            }
            b'0'..=b'9' | b'.' => {
                let member_index = matches!(
                    out.last().map(|s: &Spanned| &s.token),
                    Some(Token::Dot | Token::QuestionDot)
                );
                let mut end = i;
                while end < bytes.len()
                    && (bytes[end].is_ascii_digit() || (bytes[end] == b'.' && !member_index))
                {
                    end += 1;
                }
                if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
                    let mut exp = end + 1;
                    if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
                        exp += 1;
                    }
                    if exp < bytes.len() && bytes[exp].is_ascii_digit() {
                        end = exp;
                        while end < bytes.len() && bytes[end].is_ascii_digit() {
                            end += 1;
                        }
                    }
                }
                let text = &source[i..end];
                let value = text
                    .parse::<f64>()
                    .map_err(|_| err(start, "invalid number literal"))?;
                i = end;
                out.push(Spanned {
                    token: Token::Number(value),
                    offset: start,
                });
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let mut end = i;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                let word = &source[i..end];
                i = end;
                let token = match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    _ => Token::Ident(word.to_string()),
                };
                out.push(Spanned {
                    token,
                    offset: start,
                });
                continue;
            }
            _ => return Err(err(start, "unexpected character")),
        };

        out.push(Spanned {
            token,
            offset: start,
        });
        i += 1;
    }

    Ok(out)
}

/// `a.0` is member access, `.5` on its own is a number.
fn follows_operand(out: &[Spanned]) -> bool {
    matches!(
        out.last().map(|s| &s.token),
        Some(Token::Ident(_) | Token::Number(_) | Token::Str(_) | Token::RParen | Token::RBracket)
    )
}

/// Lex a quoted string starting at `start`; returns the unescaped text and the offset after it.
fn lex_string(source: &str, start: usize) -> Option<(String, usize)> {
    let mut chars = source[start..].char_indices();
    let (_, quote) = chars.next()?;
    let mut text = String::new();
    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            }
            c if c == quote => return Some((text, start + offset + c.len_utf8())),
            c => text.push(c),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn distinguishes_question_forms() {
        assert_eq!(
            kinds("a?.b ?? c ? 1 : 2"),
            vec![
                Token::Ident("a".into()),
                Token::QuestionDot,
                Token::Ident("b".into()),
                Token::Coalesce,
                Token::Ident("c".into()),
                Token::Question,
                Token::Number(1.0),
                Token::Colon,
                Token::Number(2.0),
            ]
        );
    }

    #[test]
    fn strings_support_escapes_and_both_quotes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\"b""#),
            vec![Token::Str("it's".into()), Token::Str("a\"b".into())]
        );
    }

    #[test]
    fn leading_dot_number() {
        assert_eq!(kinds(".5"), vec![Token::Number(0.5)]);
    }

    #[test]
    fn numeric_member_after_identifier_is_a_dot() {
        assert_eq!(
            kinds("items.0"),
            vec![Token::Ident("items".into()), Token::Dot, Token::Number(0.0)]
        );
    }

    #[test]
    fn chained_numeric_members_do_not_merge() {
        assert_eq!(
            kinds("grid.0.1"),
            vec![
                Token::Ident("grid".into()),
                Token::Dot,
                Token::Number(0.0),
                Token::Dot,
                Token::Number(1.0),
            ]
        );
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        assert!(matches!(tokenize("'abc"), Err(ExprError::Syntax { .. })));
    }
}

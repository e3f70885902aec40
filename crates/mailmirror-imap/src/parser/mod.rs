//! Response parser producing a generic value tree.
//!
//! Server data lines are irregular: atoms, quoted strings, literal blocks and
//! parenthesized lists nest freely. The parser tokenizes one assembled
//! logical response and folds the tokens into [`Value`] trees with an
//! explicit stack of open lists.

#![allow(clippy::missing_errors_doc)]

mod lexer;

pub use lexer::{Lexer, Token, is_atom_char};

use crate::{Error, Result};

/// One node of a parsed server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Bareword atom, bytes preserved.
    Atom(String),
    /// Quoted string with `\"` and `\\` decoded.
    Quoted(String),
    /// Literal block of the declared byte count.
    Literal(Vec<u8>),
    /// Ordered parenthesized list.
    List(Vec<Value>),
}

impl Value {
    /// Textual content of an atom or quoted string.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Atom(s) | Self::Quoted(s) => Some(s),
            _ => None,
        }
    }

    /// Raw content of a literal, atom or quoted string.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Atom(s) | Self::Quoted(s) => Some(s.as_bytes()),
            Self::Literal(data) => Some(data),
            Self::List(_) => None,
        }
    }

    /// Atom parsed as a decimal number.
    #[must_use]
    pub fn as_number(&self) -> Option<u32> {
        match self {
            Self::Atom(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// List items, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Parses one logical response into its top-level items.
pub fn parse(input: &[u8]) -> Result<Vec<Value>> {
    let mut lexer = Lexer::new(input);
    // Stack of open lists; index 0 is the top level of the response.
    let mut stack: Vec<Vec<Value>> = vec![Vec::new()];

    loop {
        let position = lexer.position();
        match lexer.next_token()? {
            Token::Eof => break,
            Token::Atom(s) => push(&mut stack, Value::Atom(s)),
            Token::Quoted(s) => push(&mut stack, Value::Quoted(s)),
            Token::Literal(data) => push(&mut stack, Value::Literal(data)),
            Token::LParen => stack.push(Vec::new()),
            Token::RParen => {
                if stack.len() < 2 {
                    return Err(Error::Parse {
                        position,
                        message: "incorrect nested level".to_string(),
                    });
                }
                let list = stack.pop().unwrap_or_default();
                push(&mut stack, Value::List(list));
            }
        }
    }

    if stack.len() != 1 {
        return Err(Error::Parse {
            position: input.len(),
            message: "unbalanced parentheses at end of response".to_string(),
        });
    }

    Ok(stack.pop().unwrap_or_default())
}

fn push(stack: &mut [Vec<Value>], value: Value) {
    if let Some(top) = stack.last_mut() {
        top.push(value);
    }
}

/// Looks a FETCH field list up by key (ASCII case-insensitive).
///
/// FETCH data arrives as keys followed by their values inside one list:
/// `(UID 42 RFC822 {5}… INTERNALDATE "…")`. The slots cannot be paired up
/// blindly: a literal can leave a stray atom behind it, so the list is
/// scanned for the key at any position and the element after it is the
/// value. Only bareword atoms are considered as keys, so quoted, literal
/// and list values are never mistaken for one.
#[must_use]
pub fn fetch_field<'a>(fields: &'a [Value], key: &str) -> Option<&'a Value> {
    let mut iter = fields.iter();
    while let Some(item) = iter.next() {
        if matches!(item, Value::Atom(name) if name.eq_ignore_ascii_case(key)) {
            return iter.next();
        }
    }
    None
}

use std::rc::Rc;

use crate::common::{
    source::Source,
    span::{Span, Spanned},
    value::{NUMBER_MAX, NUMBER_MIN},
};
use crate::compiler::{
    syntax::{Note, Syntax},
    token::Token,
};

/// Characters operators are built from.
/// A lone `=` is assignment and `->` is the branch arrow;
/// every other run of these lexes as an identifier,
/// so `==` or `&&` can sit in the head of an application.
const OP_CHARS: &str = "+-*/<>=|&!";

pub type Tokens = Vec<Spanned<Token>>;

/// Lexes a source file into a stream of spanned tokens.
pub fn lex(source: Rc<Source>) -> Result<Tokens, Syntax> {
    let mut lexer = Lexer {
        source,
        index: 0,
        tokens: vec![],
    };

    lexer.strip();
    while !lexer.remaining().is_empty() {
        let token = lexer.next_token()?;
        lexer.tokens.push(token);
        lexer.strip();
    }

    Ok(lexer.tokens)
}

struct Lexer {
    source: Rc<Source>,
    index: usize,
    tokens: Tokens,
}

fn iden_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

impl Lexer {
    fn remaining(&self) -> &str {
        &self.source.contents[self.index..]
    }

    /// Strips whitespace (but not newlines, which separate statements)
    /// and `#` line comments.
    fn strip(&mut self) {
        loop {
            let old_index = self.index;

            let blank: usize = self
                .remaining()
                .chars()
                .take_while(|c| c.is_whitespace() && *c != '\n')
                .map(char::len_utf8)
                .sum();
            self.index += blank;

            if self.remaining().starts_with('#') {
                match self.remaining().find('\n') {
                    Some(line) => self.index += line,
                    None => self.index = self.source.contents.len(),
                }
            }

            if self.index == old_index {
                break;
            }
        }
    }

    /// The length of the leading run of characters satisfying `pred`.
    fn eat_while(&self, pred: impl Fn(char) -> bool) -> usize {
        let mut len = 0;
        for c in self.remaining().chars() {
            if !pred(c) {
                break;
            }
            len += c.len_utf8();
        }
        return len;
    }

    fn span(&self, len: usize) -> Span {
        Span::new(&self.source, self.index, len)
    }

    fn number(&self, skip: usize) -> Result<(Token, usize), Syntax> {
        let len = skip
            + self.source.contents[self.index + skip..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .count();
        let text = &self.source.contents[self.index..self.index + len];

        let n: i64 = text
            .parse()
            .map_err(|_| Syntax::error("Number literal is malformed", &self.span(len)))?;

        if n < NUMBER_MIN as i64 || n > NUMBER_MAX as i64 {
            return Err(Syntax::error(
                "Number literal does not fit in a signed 28-bit integer",
                &self.span(len),
            ));
        }

        Ok((Token::Number(n as i32), len))
    }

    fn string(&self) -> Result<(Token, usize), Syntax> {
        // opening quote is at self.index
        let mut len = 1;
        let mut escape = false;
        let mut string = String::new();

        for c in self.remaining()[1..].chars() {
            len += c.len_utf8();
            if escape {
                escape = false;
                string.push(match c {
                    '"' => '"',
                    '\\' => '\\',
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    '0' => '\0',
                    other => {
                        return Err(Syntax::error_with_note(
                            &format!("Unknown escape code `\\{}` in string literal", other),
                            Note::new_with_hint(
                                "To include a single backslash `\\`, escape it first: `\\\\`",
                                &Span::new(&self.source, self.index + len - c.len_utf8(), 1),
                            ),
                        ));
                    }
                })
            } else {
                match c {
                    '\\' => escape = true,
                    '"' => return Ok((Token::Str(string), len)),
                    c => string.push(c),
                }
            }
        }

        Err(Syntax::error(
            "Unexpected end of source while lexing string literal",
            &Span::point(&self.source, self.index),
        ))
    }

    fn next_token(&mut self) -> Result<Spanned<Token>, Syntax> {
        let mut chars = self.remaining().chars();
        let first = chars.next().unwrap();
        let second = chars.next();

        let (token, len) = match first {
            '\n' | ';' => (Token::Sep, self.eat_while(|c| c.is_whitespace() || c == ';')),

            '(' => (Token::OpenParen, 1),
            ')' => (Token::CloseParen, 1),
            '{' => (Token::OpenCurly, 1),
            '}' => (Token::CloseCurly, 1),
            '.' => (Token::Dot, 1),
            ',' => (Token::Comma, 1),

            '"' => self.string()?,

            ':' => {
                let len = self.eat_while(|c| c == ':' || iden_char(c));
                if len == 1 {
                    return Err(Syntax::error(
                        "Expected a symbol name after `:`",
                        &self.span(1),
                    ));
                }
                let name = &self.remaining()[1..len];
                (Token::Symbol(name.to_string()), len)
            }

            c if c.is_ascii_digit() => self.number(0)?,

            // a leading minus glued to a digit is a negative literal
            '-' if second.map_or(false, |c| c.is_ascii_digit()) => self.number(1)?,

            c if c.is_alphabetic() || c == '_' => {
                let len = self.eat_while(iden_char);
                let name = &self.remaining()[..len];
                let token = match name {
                    "val" => Token::Val,
                    "match" => Token::Match,
                    "module" => Token::Module,
                    _ => Token::Iden(name.to_string()),
                };
                (token, len)
            }

            c if OP_CHARS.contains(c) => {
                let len = self.eat_while(|c| OP_CHARS.contains(c));
                match &self.remaining()[..len] {
                    "=" => (Token::Assign, 1),
                    "->" => (Token::Arrow, 2),
                    op => (Token::Iden(op.to_string()), len),
                }
            }

            unknown => {
                return Err(Syntax::error(
                    &format!("The character `{}` is not recognized here", unknown),
                    &Span::point(&self.source, self.index),
                ))
            }
        };

        let spanned = Spanned::new(token, self.span(len));
        self.index += len;
        Ok(spanned)
    }
}

use crate::common::span::{Span, Spanned};
use crate::compiler::{
    ast::{Ast, MatchArm, Pattern},
    syntax::Syntax,
    token::Token,
};

// A recursive descent parser over the token slice.
// Each rule eats what it can and hands back the rest.

type Tokens<'a> = &'a [Spanned<Token>];
type Branch<'a, T> = Result<(T, Tokens<'a>), Syntax>;

/// Parses a token stream into a surface tree.
/// The whole program is one block of statements.
pub fn parse(tokens: Tokens) -> Result<Spanned<Ast>, Syntax> {
    let (ast, remaining) = block(tokens, None)?;
    let remaining = vacuum(remaining);

    match remaining.first() {
        None => Ok(ast),
        Some(unexpected) => Err(Syntax::error(
            &format!("Expected a statement, found {}", unexpected.item.describe()),
            &unexpected.span,
        )),
    }
}

/// Strips leading separators.
fn vacuum(tokens: Tokens) -> Tokens {
    let mut remaining = tokens;
    while let Some(Spanned {
        item: Token::Sep, ..
    }) = remaining.first()
    {
        remaining = &remaining[1..];
    }
    return remaining;
}

fn consume<'a>(tokens: Tokens<'a>, token: Token) -> Result<Tokens<'a>, Syntax> {
    match tokens.first() {
        Some(next) if next.item == token => Ok(&tokens[1..]),
        Some(next) => Err(Syntax::error(
            &format!(
                "Expected {}, found {}",
                token.describe(),
                next.item.describe()
            ),
            &next.span,
        )),
        None => Err(Syntax::error(
            &format!("Expected {}, found the end of the source", token.describe()),
            &Span::empty(),
        )),
    }
}

fn eof(message: &str) -> Syntax {
    Syntax::error(message, &Span::empty())
}

/// Does this token open a `simple` expression?
/// Applications keep eating arguments while this holds.
fn starts_simple(token: &Token, allow_curly: bool) -> bool {
    match token {
        Token::Number(_)
        | Token::Str(_)
        | Token::Iden(_)
        | Token::Symbol(_)
        | Token::OpenParen
        | Token::Match
        | Token::Module => true,
        Token::OpenCurly => allow_curly,
        _ => false,
    }
}

/// A block of statements separated by `Sep`, up to (but not eating)
/// the closing delimiter, or the end of the source when `close` is `None`.
fn block<'a>(tokens: Tokens<'a>, close: Option<&Token>) -> Branch<'a, Spanned<Ast>> {
    let mut statements = vec![];
    let mut remaining = vacuum(tokens);

    loop {
        match (remaining.first(), close) {
            (None, _) => break,
            (Some(next), Some(close)) if &next.item == close => break,
            _ => (),
        }

        let (statement, rest) = statement(remaining)?;
        statements.push(statement);
        remaining = rest;

        // statements end at a separator or the closing delimiter
        match remaining.first() {
            Some(Spanned {
                item: Token::Sep, ..
            }) => remaining = vacuum(remaining),
            Some(next) if close == Some(&next.item) => break,
            Some(next) => {
                return Err(Syntax::error(
                    &format!(
                        "Expected a new statement, found {}",
                        next.item.describe()
                    ),
                    &next.span,
                ))
            }
            None => break,
        }
    }

    if statements.is_empty() {
        return Err(match remaining.first() {
            Some(next) => Syntax::error("A block can't be empty", &next.span),
            None => eof("A program can't be empty"),
        });
    }

    let span = Span::join(statements.iter().map(|s| s.span.clone()).collect());
    Ok((Spanned::new(Ast::Block(statements), span), remaining))
}

/// `val`-bindings, or a bare expression.
fn statement(tokens: Tokens) -> Branch<Spanned<Ast>> {
    match tokens.first() {
        Some(Spanned {
            item: Token::Val, ..
        }) => binding(tokens),
        _ => expr(tokens, true),
    }
}

/// The three `val` forms:
/// `val name = e`, `val name (params) = e`, and the anonymous
/// function `val (params) = e`.
fn binding(tokens: Tokens) -> Branch<Spanned<Ast>> {
    let val_span = match tokens.first() {
        Some(token) => &token.span,
        None => return Err(eof("Expected a binding")),
    };
    let remaining = consume(tokens, Token::Val)?;

    match remaining.first() {
        // anonymous function
        Some(Spanned {
            item: Token::OpenParen,
            ..
        }) => {
            let (params, remaining) = params(remaining)?;
            let remaining = consume(remaining, Token::Assign)?;
            let (body, remaining) = expr(remaining, true)?;

            let span = Span::combine(val_span, &body.span);
            let lambda = Ast::Lambda {
                name: None,
                params,
                body: Box::new(body),
            };
            Ok((Spanned::new(lambda, span), remaining))
        }

        Some(Spanned {
            item: Token::Iden(name),
            ..
        }) => {
            let name = name.clone();
            let remaining = &remaining[1..];

            // a parameter list makes this a named function
            let (value, remaining) = match remaining.first() {
                Some(Spanned {
                    item: Token::OpenParen,
                    ..
                }) => {
                    let (params, remaining) = params(remaining)?;
                    let remaining = consume(remaining, Token::Assign)?;
                    let (body, remaining) = expr(remaining, true)?;

                    let span = Span::combine(val_span, &body.span);
                    let lambda = Ast::Lambda {
                        name: Some(name.clone()),
                        params,
                        body: Box::new(body),
                    };
                    (Spanned::new(lambda, span), remaining)
                }
                _ => {
                    let remaining = consume(remaining, Token::Assign)?;
                    expr(remaining, true)?
                }
            };

            let span = Span::combine(val_span, &value.span);
            let bind = Ast::Bind {
                name,
                value: Box::new(value),
            };
            Ok((Spanned::new(bind, span), remaining))
        }

        Some(other) => Err(Syntax::error(
            &format!(
                "Expected a name or parameter list after `val`, found {}",
                other.item.describe()
            ),
            &other.span,
        )),
        None => Err(eof("Expected a name after `val`")),
    }
}

fn params(tokens: Tokens) -> Branch<Vec<String>> {
    let mut remaining = consume(tokens, Token::OpenParen)?;
    let mut params = vec![];

    loop {
        match remaining.first() {
            Some(Spanned {
                item: Token::Iden(name),
                ..
            }) => {
                params.push(name.clone());
                remaining = &remaining[1..];
            }
            Some(Spanned {
                item: Token::CloseParen,
                span,
            }) => {
                if params.is_empty() {
                    return Err(Syntax::error(
                        "A function needs at least one parameter",
                        span,
                    ));
                }
                return Ok((params, &remaining[1..]));
            }
            Some(other) => {
                return Err(Syntax::error(
                    &format!("Expected a parameter name, found {}", other.item.describe()),
                    &other.span,
                ))
            }
            None => return Err(eof("Unclosed parameter list")),
        }
    }
}

/// An application by juxtaposition: a head followed by arguments,
/// as long as the next token keeps an expression going. A symbol
/// in head position takes the arguments as its payload instead.
fn expr(tokens: Tokens, allow_curly: bool) -> Branch<Spanned<Ast>> {
    let (head, mut remaining) = simple(tokens, allow_curly)?;
    let mut args = vec![];

    while let Some(next) = remaining.first() {
        if !starts_simple(&next.item, allow_curly) {
            break;
        }
        let (arg, rest) = simple(remaining, allow_curly)?;
        args.push(arg);
        remaining = rest;
    }

    if args.is_empty() {
        return Ok((head, remaining));
    }

    let span = Span::join(
        std::iter::once(head.span.clone())
            .chain(args.iter().map(|a| a.span.clone()))
            .collect(),
    );

    let ast = match head.item {
        Ast::Symbol { name, args: empty } => {
            debug_assert!(empty.is_empty());
            Ast::Symbol { name, args }
        }
        _ => Ast::Call {
            fun: Box::new(head),
            args,
        },
    };

    Ok((Spanned::new(ast, span), remaining))
}

/// A single expression atom, with `.field` lookups applied postfix.
fn simple(tokens: Tokens, allow_curly: bool) -> Branch<Spanned<Ast>> {
    let next = match tokens.first() {
        Some(next) => next,
        None => return Err(eof("Expected an expression, found the end of the source")),
    };

    let (ast, remaining) = match &next.item {
        Token::Number(n) => (Spanned::new(Ast::Number(*n), next.span.clone()), &tokens[1..]),
        Token::Str(s) => (
            Spanned::new(Ast::Str(s.clone()), next.span.clone()),
            &tokens[1..],
        ),
        Token::Symbol(name) => (
            Spanned::new(
                Ast::Symbol {
                    name: name.clone(),
                    args: vec![],
                },
                next.span.clone(),
            ),
            &tokens[1..],
        ),
        Token::Iden(name) => {
            let ast = match name.as_str() {
                // the booleans are plain symbols with reserved ids
                "true" | "false" => Ast::Symbol {
                    name: name.clone(),
                    args: vec![],
                },
                _ => Ast::Var(name.clone()),
            };
            (Spanned::new(ast, next.span.clone()), &tokens[1..])
        }
        Token::OpenParen => {
            let (inner, remaining) = expr(&tokens[1..], true)?;
            let remaining = consume(remaining, Token::CloseParen)?;
            (inner, remaining)
        }
        Token::OpenCurly => {
            let (inner, remaining) = block(&tokens[1..], Some(&Token::CloseCurly))?;
            let remaining = consume(remaining, Token::CloseCurly)?;
            (inner, remaining)
        }
        Token::Match => return match_expr(tokens),
        Token::Module => return module(tokens),
        other => {
            return Err(Syntax::error(
                &format!("Expected an expression, found {}", other.describe()),
                &next.span,
            ))
        }
    };

    lookups(ast, remaining)
}

/// Zero or more `.field` suffixes.
fn lookups<'a>(mut ast: Spanned<Ast>, mut tokens: Tokens<'a>) -> Branch<'a, Spanned<Ast>> {
    while let Some(Spanned {
        item: Token::Dot, ..
    }) = tokens.first()
    {
        let remaining = &tokens[1..];
        match remaining.first() {
            Some(Spanned {
                item: Token::Iden(field),
                span,
            }) => {
                let combined = Span::combine(&ast.span, span);
                ast = Spanned::new(
                    Ast::Lookup {
                        module: Box::new(ast),
                        field: field.clone(),
                    },
                    combined,
                );
                tokens = &remaining[1..];
            }
            Some(other) => {
                return Err(Syntax::error(
                    &format!(
                        "Expected a field name after `.`, found {}",
                        other.item.describe()
                    ),
                    &other.span,
                ))
            }
            None => return Err(eof("Expected a field name after `.`")),
        }
    }

    Ok((ast, tokens))
}

/// `match subject { pattern -> body, ... }`
/// Arms are separated by commas or newlines.
fn match_expr(tokens: Tokens) -> Branch<Spanned<Ast>> {
    let match_span = &tokens[0].span;
    let remaining = consume(tokens, Token::Match)?;

    // the subject must not swallow the `{` of the arm list
    let (subject, remaining) = expr(remaining, false)?;
    let mut remaining = vacuum(consume(remaining, Token::OpenCurly)?);

    let mut branches = vec![];
    loop {
        if let Some(Spanned {
            item: Token::CloseCurly,
            ..
        }) = remaining.first()
        {
            break;
        }

        let (pattern, rest) = pattern(remaining, true)?;
        let rest = consume(rest, Token::Arrow)?;
        let (body, rest) = expr(rest, true)?;
        branches.push(MatchArm { pattern, body });

        remaining = match rest.first() {
            Some(Spanned {
                item: Token::Comma, ..
            }) => vacuum(&rest[1..]),
            Some(Spanned {
                item: Token::Sep, ..
            }) => vacuum(rest),
            _ => rest,
        };
    }

    if branches.is_empty() {
        return Err(Syntax::error(
            "A match needs at least one branch",
            match_span,
        ));
    }

    let last_span = branches.last().unwrap().body.span.clone();
    let remaining = consume(remaining, Token::CloseCurly)?;

    let ast = Ast::Match {
        subject: Box::new(subject),
        branches,
    };
    Ok((Spanned::new(ast, Span::combine(match_span, &last_span)), remaining))
}

/// A pattern. At the top of an arm a symbol eats sub-patterns as its
/// arguments; nested compound patterns need parentheses.
fn pattern(tokens: Tokens, args_allowed: bool) -> Branch<Spanned<Pattern>> {
    let next = match tokens.first() {
        Some(next) => next,
        None => return Err(eof("Expected a pattern, found the end of the source")),
    };

    match &next.item {
        Token::Number(n) => Ok((
            Spanned::new(Pattern::Number(*n), next.span.clone()),
            &tokens[1..],
        )),
        Token::Iden(name) => {
            let pattern = match name.as_str() {
                "_" => Pattern::Wildcard,
                "true" | "false" => Pattern::Symbol {
                    name: name.clone(),
                    args: vec![],
                },
                _ => Pattern::Var(name.clone()),
            };
            Ok((Spanned::new(pattern, next.span.clone()), &tokens[1..]))
        }
        Token::Symbol(name) => {
            let mut remaining = &tokens[1..];
            let mut args = vec![];

            if args_allowed {
                while let Some(peeked) = remaining.first() {
                    match peeked.item {
                        Token::Number(_)
                        | Token::Iden(_)
                        | Token::Symbol(_)
                        | Token::OpenParen => {
                            let (arg, rest) = pattern(remaining, false)?;
                            args.push(arg);
                            remaining = rest;
                        }
                        _ => break,
                    }
                }
            }

            let span = Span::join(
                std::iter::once(next.span.clone())
                    .chain(args.iter().map(|a| a.span.clone()))
                    .collect(),
            );
            Ok((
                Spanned::new(
                    Pattern::Symbol {
                        name: name.clone(),
                        args,
                    },
                    span,
                ),
                remaining,
            ))
        }
        Token::OpenParen => {
            let (inner, remaining) = pattern(&tokens[1..], true)?;
            let remaining = consume(remaining, Token::CloseParen)?;
            Ok((inner, remaining))
        }
        other => Err(Syntax::error(
            &format!("Expected a pattern, found {}", other.describe()),
            &next.span,
        )),
    }
}

/// `module { val a = ..., val b = ... }`
fn module(tokens: Tokens) -> Branch<Spanned<Ast>> {
    let module_span = &tokens[0].span;
    let remaining = consume(tokens, Token::Module)?;
    let mut remaining = vacuum(consume(remaining, Token::OpenCurly)?);

    let mut fields = vec![];
    loop {
        if let Some(Spanned {
            item: Token::CloseCurly,
            ..
        }) = remaining.first()
        {
            break;
        }

        let (statement, rest) = binding(remaining)?;
        match statement.item {
            Ast::Bind { name, value } => fields.push((name, *value)),
            _ => {
                return Err(Syntax::error(
                    "Module fields must be named bindings",
                    &statement.span,
                ))
            }
        }
        remaining = vacuum(rest);
    }

    let remaining = consume(remaining, Token::CloseCurly)?;
    Ok((
        Spanned::new(Ast::Module(fields), module_span.clone()),
        remaining,
    ))
}

// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_until, take_while, take_while1};
use nom::character::complete::{
    anychar, char, digit1, hex_digit1, multispace1, not_line_ending, one_of, satisfy,
};
use nom::combinator::{all_consuming, cut, map, map_res, not, opt, recognize, value};
use nom::error::{Error, ErrorKind};
use nom::multi::{many0, separated_list1};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::Finish;

use super::ast::{Accessor, BinaryOp, Expr, Func, RefOp, SetValue, Stmt};
use super::{ExprError, Value};

type IResult<'a, T> = nom::IResult<&'a str, T>;

pub(super) fn parse(source: &str) -> Result<Vec<Stmt>, ExprError> {
    match all_consuming(preceded(ws, many0(statement)))(source).finish() {
        Ok((_, statements)) => Ok(statements),
        Err(e) => Err(syntax_error(source, e.input)),
    }
}

fn syntax_error(source: &str, rest: &str) -> ExprError {
    let offset = source.len() - rest.len();
    let consumed = &source[..offset];
    let line = consumed.matches('\n').count() + 1;
    let column = consumed.len() - consumed.rfind('\n').map_or(0, |nl| nl + 1) + 1;
    ExprError::Syntax {
        line,
        column,
        snippet: rest.lines().next().unwrap_or_default().chars().take(40).collect(),
    }
}

fn statement(input: &str) -> IResult<'_, Stmt> {
    alt((
        if_statement,
        foreach,
        set,
        unset,
        delete,
        ref_statement,
        print,
        return_statement,
    ))(input)
}

fn block(input: &str) -> IResult<'_, Vec<Stmt>> {
    delimited(lexeme(char('{')), many0(statement), cut(lexeme(char('}'))))(input)
}

fn if_statement(input: &str) -> IResult<'_, Stmt> {
    let else_branch = preceded(
        keyword("else"),
        cut(alt((map(if_statement, |s| vec![s]), block))),
    );
    map(
        preceded(
            keyword("if"),
            cut(tuple((expression, block, opt(else_branch)))),
        ),
        |(condition, then, otherwise)| Stmt::If(condition, then, otherwise.unwrap_or_default()),
    )(input)
}

fn foreach(input: &str) -> IResult<'_, Stmt> {
    map(
        preceded(keyword("foreach"), cut(pair(lexeme(string_literal), block))),
        |(pattern, body)| Stmt::Foreach(pattern, body),
    )(input)
}

fn set(input: &str) -> IResult<'_, Stmt> {
    map(
        preceded(
            keyword("set"),
            cut(tuple((lexeme(prop_name), lexeme(char('=')), set_value, terminator))),
        ),
        |(name, _, value, _)| Stmt::Set(name.to_owned(), value),
    )(input)
}

fn set_value(input: &str) -> IResult<'_, SetValue> {
    alt((
        map(cells, SetValue::Cells),
        map(separated_list1(lexeme(char(',')), expression), SetValue::Exprs),
    ))(input)
}

fn cells(input: &str) -> IResult<'_, Vec<u32>> {
    delimited(
        lexeme(char('<')),
        many0(lexeme(map_res(integer, u32::try_from))),
        cut(lexeme(char('>'))),
    )(input)
}

fn unset(input: &str) -> IResult<'_, Stmt> {
    map(
        delimited(keyword("unset"), cut(lexeme(prop_name)), cut(terminator)),
        |name| Stmt::Unset(name.to_owned()),
    )(input)
}

fn delete(input: &str) -> IResult<'_, Stmt> {
    value(Stmt::Delete, pair(keyword("delete"), cut(terminator)))(input)
}

/// `ref +n;`, `ref -n;` or `ref = n;`
fn ref_statement(input: &str) -> IResult<'_, Stmt> {
    map(
        delimited(
            keyword("ref"),
            cut(alt((
                map(preceded(lexeme(char('=')), ref_count), RefOp::Set),
                map(pair(lexeme(one_of("+-")), ref_count), |(sign, n)| {
                    RefOp::Add(if sign == '-' { -n } else { n })
                }),
            ))),
            cut(terminator),
        ),
        Stmt::Ref,
    )(input)
}

fn ref_count(input: &str) -> IResult<'_, i32> {
    lexeme(map_res(integer, i32::try_from))(input)
}

fn print(input: &str) -> IResult<'_, Stmt> {
    map(
        delimited(
            keyword("print"),
            cut(separated_list1(lexeme(char(',')), expression)),
            cut(terminator),
        ),
        Stmt::Print,
    )(input)
}

fn return_statement(input: &str) -> IResult<'_, Stmt> {
    map(
        delimited(keyword("return"), cut(expression), cut(terminator)),
        Stmt::Return,
    )(input)
}

fn expression(input: &str) -> IResult<'_, Expr> {
    logical_or(input)
}

type Operator = (&'static str, &'static str, BinaryOp);

fn left_assoc<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<'a, Expr>,
    operators: &[Operator],
) -> IResult<'a, Expr> {
    let (mut input, mut left) = operand(input)?;
    'next: loop {
        for &(token, forbidden, op) in operators {
            let matched: IResult<'a, &str> = lexeme(terminated(
                tag(token),
                not(one_of(if forbidden.is_empty() { "\0" } else { forbidden })),
            ))(input);
            if let Ok((rest, _)) = matched {
                let (rest, right) = cut(operand)(rest)?;
                left = Expr::Binary(Box::new(left), op, Box::new(right));
                input = rest;
                continue 'next;
            }
        }
        return Ok((input, left));
    }
}

fn logical_or(input: &str) -> IResult<'_, Expr> {
    left_assoc(input, logical_and, &[("||", "", BinaryOp::Or)])
}

fn logical_and(input: &str) -> IResult<'_, Expr> {
    left_assoc(input, comparison, &[("&&", "", BinaryOp::And)])
}

fn comparison(input: &str) -> IResult<'_, Expr> {
    left_assoc(
        input,
        unary,
        &[
            ("==", "", BinaryOp::Eq),
            ("!=", "", BinaryOp::Ne),
            ("=~", "", BinaryOp::Match),
            ("<=", "", BinaryOp::Le),
            (">=", "", BinaryOp::Ge),
            ("<", "", BinaryOp::Lt),
            (">", "", BinaryOp::Gt),
        ],
    )
}

fn unary(input: &str) -> IResult<'_, Expr> {
    alt((
        map(preceded(lexeme(char('!')), cut(unary)), |e| Expr::Not(Box::new(e))),
        map(preceded(lexeme(char('-')), cut(unary)), |e| Expr::Neg(Box::new(e))),
        primary,
    ))(input)
}

fn primary(input: &str) -> IResult<'_, Expr> {
    alt((
        lexeme(alt((
            map(integer, |i| Expr::Lit(Value::Int(i))),
            map(string_literal, |s| Expr::Lit(Value::Str(s))),
            map(preceded(char('$'), cut(identifier)), |name| Expr::Var(name.to_owned())),
            named,
        ))),
        delimited(lexeme(char('(')), cut(expression), cut(lexeme(char(')')))),
    ))(input)
}

/// A function call, a node accessor, `true` or `false`.
fn named(input: &str) -> IResult<'_, Expr> {
    let (rest, name) = identifier(input)?;
    if let Some(func) = Func::from_name(name) {
        let (rest, argument) =
            cut(delimited(lexeme(char('(')), expression, lexeme(char(')'))))(rest)?;
        return Ok((rest, Expr::Call(func, Box::new(argument))));
    }
    let expr = match name {
        "true" => Expr::Lit(Value::Bool(true)),
        "false" => Expr::Lit(Value::Bool(false)),
        "nil" => Expr::Lit(Value::Nil),
        _ => match Accessor::from_name(name) {
            Some(accessor) => Expr::Node(accessor),
            None => return Err(nom::Err::Failure(Error::new(input, ErrorKind::Tag))),
        },
    };
    Ok((rest, expr))
}

fn integer(input: &str) -> IResult<'_, i64> {
    alt((
        preceded(
            alt((tag("0x"), tag("0X"))),
            cut(map_res(hex_digit1, |s| i64::from_str_radix(s, 16))),
        ),
        map_res(digit1, |s: &str| s.parse::<i64>()),
    ))(input)
}

/// A double or single quoted string, with `\n`, `\t` and `\<char>` escapes.
fn string_literal(input: &str) -> IResult<'_, String> {
    map(
        alt((
            delimited(
                char('"'),
                recognize(many0(alt((
                    is_not("\\\""),
                    recognize(pair(char('\\'), anychar)),
                )))),
                cut(char('"')),
            ),
            delimited(
                char('\''),
                recognize(many0(alt((
                    is_not("\\'"),
                    recognize(pair(char('\\'), anychar)),
                )))),
                cut(char('\'')),
            ),
        )),
        unescape,
    )(input)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn identifier(input: &str) -> IResult<'_, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_identifier_char),
    ))(input)
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn prop_name(input: &str) -> IResult<'_, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || ",._+?#-".contains(c))(input)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<'a, &'a str> {
    lexeme(terminated(tag(word), not(satisfy(is_identifier_char))))
}

fn terminator(input: &str) -> IResult<'_, char> {
    lexeme(char(';'))(input)
}

/// Wraps a parser to also consume whitespace and comments around it.
fn lexeme<'a, O, F>(f: F) -> impl FnMut(&'a str) -> IResult<'a, O>
where
    F: FnMut(&'a str) -> IResult<'a, O>,
{
    delimited(ws, f, ws)
}

fn ws(input: &str) -> IResult<'_, &str> {
    recognize(many0(alt((
        multispace1,
        recognize(pair(tag("//"), not_line_ending)),
        recognize(tuple((tag("/*"), take_until("*/"), tag("*/")))),
    ))))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> Expr {
        all_consuming(expression)(source).unwrap().1
    }

    #[test]
    fn precedence() {
        let parsed = expr("$x || !has(\"x\") && depth >= 2");
        let Expr::Binary(left, BinaryOp::Or, right) = parsed else {
            panic!("{parsed:?}");
        };
        assert_eq!(*left, Expr::Var("x".into()));
        let Expr::Binary(not, BinaryOp::And, cmp) = *right else {
            panic!("and binds tighter than or");
        };
        assert!(matches!(*not, Expr::Not(_)));
        assert!(matches!(*cmp, Expr::Binary(_, BinaryOp::Ge, _)));
    }

    #[test]
    fn literals() {
        assert_eq!(expr("0x10"), Expr::Lit(Value::Int(16)));
        assert_eq!(expr(r#""a\"b\n""#), Expr::Lit(Value::Str("a\"b\n".into())));
        assert_eq!(expr("'it'"), Expr::Lit(Value::Str("it".into())));
        assert_eq!(expr(" $role "), Expr::Var("role".into()));
        assert_eq!(expr("(false)"), Expr::Lit(Value::Bool(false)));
    }

    #[test]
    fn statements() {
        let program = parse(
            r#"
            // comment
            if name =~ "cpu" { ref +2; } else if depth > 1 { ref = 0; } else { delete; }
            foreach "/soc/.*" { set status = "okay", "x"; set reg = <0x10 4>; unset bad; }
            print "p", path;
            return true;
            "#,
        )
        .unwrap();
        assert_eq!(program.len(), 4);
        let Stmt::If(_, then, otherwise) = &program[0] else {
            panic!("{:?}", program[0]);
        };
        assert_eq!(then, &[Stmt::Ref(RefOp::Add(2))]);
        assert!(matches!(&otherwise[..], [Stmt::If(_, _, _)]));
        let Stmt::Foreach(pattern, body) = &program[1] else {
            panic!("{:?}", program[1]);
        };
        assert_eq!(pattern, "/soc/.*");
        assert_eq!(body[1], Stmt::Set("reg".into(), SetValue::Cells(vec![16, 4])));
        assert_eq!(body[2], Stmt::Unset("bad".into()));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(parse("return colour;").is_err());
        assert!(parse("return prop;").is_err());
        assert!(parse("settle;").is_err());
    }
}

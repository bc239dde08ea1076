// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A `nom` parser for DTS source text.

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_until, take_while, take_while1};
use nom::character::complete::{
    anychar, char, digit1, hex_digit1, multispace1, none_of, not_line_ending, one_of, satisfy,
};
use nom::combinator::{all_consuming, cut, map, map_res, not, opt, recognize, value};
use nom::multi::{many0, separated_list1};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::Finish;

use super::ast::{BinaryOp, Cell, Dts, Expr, Node, NodeItem, Property, Reference, TopItem, UnaryOp, Value};
use crate::error::DtsError;

type IResult<'a, T> = nom::IResult<&'a str, T>;

/// Parses a whole DTS file.
pub(crate) fn parse(source: &str) -> Result<Dts<'_>, DtsError> {
    enum TopLevel<'s> {
        Ignored,
        MemReserve(u64, u64),
        Item(TopItem<'s>),
    }

    let top_level = alt((
        map(version_directive, |()| TopLevel::Ignored),
        map(memreserve, |(a, s)| TopLevel::MemReserve(a, s)),
        map(top_delete_node, |r| TopLevel::Item(TopItem::DeleteNode(r))),
        map(include_directive, |p| TopLevel::Item(TopItem::Include(p))),
        map(root_node, |n| TopLevel::Item(TopItem::Root(n))),
        map(node_override, |(r, n)| TopLevel::Item(TopItem::Override(r, n))),
    ));

    match all_consuming(preceded(ws, many0(top_level)))(source).finish() {
        Ok((_, contents)) => {
            let mut dts = Dts::default();
            for content in contents {
                match content {
                    TopLevel::Ignored => {}
                    TopLevel::MemReserve(address, size) => dts.memreserves.push((address, size)),
                    TopLevel::Item(item) => dts.items.push(item),
                }
            }
            Ok(dts)
        }
        Err(e) => Err(syntax_error(source, e.input)),
    }
}

fn syntax_error(source: &str, rest: &str) -> DtsError {
    let offset = source.len() - rest.len();
    let consumed = &source[..offset];
    let line = consumed.matches('\n').count() + 1;
    let column = consumed.len() - consumed.rfind('\n').map_or(0, |nl| nl + 1) + 1;
    DtsError::Syntax {
        line,
        column,
        snippet: rest.lines().next().unwrap_or_default().chars().take(40).collect(),
    }
}

/// `/dts-v1/;` and `/plugin/;`
fn version_directive(input: &str) -> IResult<'_, ()> {
    value(
        (),
        terminated(
            alt((keyword("/dts-v1/"), keyword("/plugin/"))),
            cut(terminator),
        ),
    )(input)
}

fn memreserve(input: &str) -> IResult<'_, (u64, u64)> {
    delimited(
        keyword("/memreserve/"),
        cut(pair(lexeme(integer_literal), lexeme(integer_literal))),
        cut(terminator),
    )(input)
}

fn top_delete_node(input: &str) -> IResult<'_, Reference<'_>> {
    delimited(keyword("/delete-node/"), cut(reference), cut(terminator))(input)
}

fn include_directive(input: &str) -> IResult<'_, &str> {
    preceded(
        alt((keyword("#include"), keyword("/include/"))),
        cut(lexeme(alt((
            delimited(char('"'), is_not("\""), char('"')),
            delimited(char('<'), is_not(">"), char('>')),
        )))),
    )(input)
}

fn root_node(input: &str) -> IResult<'_, Node<'_>> {
    map(
        tuple((many0(label_def), lexeme(tag("/")), node_body)),
        |(labels, _, items)| Node {
            name: "",
            labels,
            items,
        },
    )(input)
}

fn node_override(input: &str) -> IResult<'_, (Reference<'_>, Node<'_>)> {
    map(
        tuple((many0(label_def), reference, node_body)),
        |(labels, target, items)| {
            (
                target,
                Node {
                    name: "",
                    labels,
                    items,
                },
            )
        },
    )(input)
}

/// `{ ... };`, committing after the opening brace.
fn node_body(input: &str) -> IResult<'_, Vec<NodeItem<'_>>> {
    preceded(
        lexeme(char('{')),
        cut(terminated(
            many0(node_item),
            pair(lexeme(char('}')), terminator),
        )),
    )(input)
}

fn node_item(input: &str) -> IResult<'_, NodeItem<'_>> {
    alt((
        map(
            delimited(keyword("/delete-property/"), cut(lexeme(prop_name)), cut(terminator)),
            NodeItem::DeleteProperty,
        ),
        map(
            delimited(keyword("/delete-node/"), cut(lexeme(node_name)), cut(terminator)),
            NodeItem::DeleteNode,
        ),
        map(include_directive, NodeItem::Include),
        map(child_node, NodeItem::Child),
        map(property, NodeItem::Property),
    ))(input)
}

fn child_node(input: &str) -> IResult<'_, Node<'_>> {
    map(
        tuple((many0(label_def), lexeme(node_name), node_body)),
        |(labels, name, items)| Node { name, labels, items },
    )(input)
}

fn property(input: &str) -> IResult<'_, Property<'_>> {
    map(
        tuple((
            lexeme(prop_name),
            opt(preceded(
                lexeme(char('=')),
                cut(separated_list1(lexeme(char(',')), prop_value)),
            )),
            cut(terminator),
        )),
        |(name, values, _)| Property { name, values },
    )(input)
}

fn prop_value(input: &str) -> IResult<'_, Value<'_>> {
    alt((
        bits_value,
        map(cell_array, |cells| Value::Cells(32, cells)),
        map(byte_string, Value::Bytes),
        map(reference, Value::PathRef),
        map(lexeme(string_literal), Value::Str),
    ))(input)
}

fn bits_value(input: &str) -> IResult<'_, Value<'_>> {
    map(
        preceded(
            keyword("/bits/"),
            cut(pair(
                lexeme(map_res(digit1, str::parse::<u32>)),
                cell_array,
            )),
        ),
        |(bits, cells)| Value::Cells(bits, cells),
    )(input)
}

fn cell_array(input: &str) -> IResult<'_, Vec<Cell<'_>>> {
    preceded(
        lexeme(char('<')),
        cut(terminated(
            many0(alt((
                map(reference, Cell::Ref),
                map(lexeme(integer_literal), |v| Cell::Expr(Expr::Lit(v))),
                map(parenthesized, Cell::Expr),
            ))),
            lexeme(char('>')),
        )),
    )(input)
}

fn byte_string(input: &str) -> IResult<'_, Vec<u8>> {
    preceded(
        lexeme(char('[')),
        cut(terminated(
            map_res(many0(lexeme(hex_digit1)), |groups: Vec<&str>| {
                let digits: String = groups.concat();
                if digits.len() % 2 != 0 {
                    return Err("odd number of hex digits");
                }
                (0..digits.len())
                    .step_by(2)
                    .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| "bad hex byte"))
                    .collect()
            }),
            lexeme(char(']')),
        )),
    )(input)
}

fn reference(input: &str) -> IResult<'_, Reference<'_>> {
    lexeme(preceded(
        char('&'),
        cut(alt((
            map(delimited(char('{'), is_not("}"), char('}')), Reference::Path),
            map(label_name, Reference::Label),
        ))),
    ))(input)
}

/// `label:` in front of a node.
fn label_def(input: &str) -> IResult<'_, &str> {
    lexeme(terminated(label_name, char(':')))(input)
}

fn label_name(input: &str) -> IResult<'_, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn node_name(input: &str) -> IResult<'_, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || ",._+-@".contains(c))(input)
}

fn prop_name(input: &str) -> IResult<'_, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || ",._+?#-".contains(c))(input)
}

/// A string literal, returned with its escapes still in place.
fn string_literal(input: &str) -> IResult<'_, &str> {
    delimited(
        char('"'),
        recognize(many0(alt((
            is_not("\\\""),
            recognize(pair(char('\\'), anychar)),
        )))),
        cut(char('"')),
    )(input)
}

fn integer_literal(input: &str) -> IResult<'_, u64> {
    terminated(
        alt((
            preceded(
                alt((tag("0x"), tag("0X"))),
                cut(map_res(hex_digit1, |s| u64::from_str_radix(s, 16))),
            ),
            map_res(digit1, |s: &str| {
                if s.len() > 1 && s.starts_with('0') {
                    u64::from_str_radix(&s[1..], 8)
                } else {
                    s.parse()
                }
            }),
            map(
                delimited(
                    char('\''),
                    alt((preceded(char('\\'), anychar), none_of("'"))),
                    char('\''),
                ),
                |c| u64::from(c),
            ),
        )),
        take_while(|c| matches!(c, 'u' | 'U' | 'l' | 'L')),
    )(input)
}

/* === Integer expressions === */

fn parenthesized(input: &str) -> IResult<'_, Expr> {
    delimited(lexeme(char('(')), cut(expression), cut(lexeme(char(')'))))(input)
}

fn expression(input: &str) -> IResult<'_, Expr> {
    let (input, cond) = logical_or(input)?;
    let (input, branches) = opt(preceded(
        lexeme(char('?')),
        cut(tuple((expression, lexeme(char(':')), expression))),
    ))(input)?;
    Ok(match branches {
        Some((then, _, otherwise)) => (
            input,
            Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)),
        ),
        None => (input, cond),
    })
}

/// An operator token that must not be followed by any of `forbidden`.
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
    left_assoc(input, bit_or, &[("&&", "", BinaryOp::And)])
}

fn bit_or(input: &str) -> IResult<'_, Expr> {
    left_assoc(input, bit_xor, &[("|", "|", BinaryOp::BitOr)])
}

fn bit_xor(input: &str) -> IResult<'_, Expr> {
    left_assoc(input, bit_and, &[("^", "", BinaryOp::BitXor)])
}

fn bit_and(input: &str) -> IResult<'_, Expr> {
    left_assoc(input, equality, &[("&", "&", BinaryOp::BitAnd)])
}

fn equality(input: &str) -> IResult<'_, Expr> {
    left_assoc(
        input,
        relational,
        &[("==", "", BinaryOp::Eq), ("!=", "", BinaryOp::Ne)],
    )
}

fn relational(input: &str) -> IResult<'_, Expr> {
    left_assoc(
        input,
        shift,
        &[
            ("<=", "", BinaryOp::Le),
            (">=", "", BinaryOp::Ge),
            ("<", "<", BinaryOp::Lt),
            (">", ">", BinaryOp::Gt),
        ],
    )
}

fn shift(input: &str) -> IResult<'_, Expr> {
    left_assoc(
        input,
        additive,
        &[("<<", "", BinaryOp::Shl), (">>", "", BinaryOp::Shr)],
    )
}

fn additive(input: &str) -> IResult<'_, Expr> {
    left_assoc(
        input,
        multiplicative,
        &[("+", "", BinaryOp::Add), ("-", "", BinaryOp::Sub)],
    )
}

fn multiplicative(input: &str) -> IResult<'_, Expr> {
    left_assoc(
        input,
        unary,
        &[
            ("*", "", BinaryOp::Mul),
            ("/", "", BinaryOp::Div),
            ("%", "", BinaryOp::Mod),
        ],
    )
}

fn unary(input: &str) -> IResult<'_, Expr> {
    alt((
        map(
            pair(
                lexeme(alt((
                    value(UnaryOp::Neg, char('-')),
                    value(UnaryOp::BitNot, char('~')),
                    value(UnaryOp::Not, char('!')),
                ))),
                unary,
            ),
            |(op, e)| Expr::Unary(op, Box::new(e)),
        ),
        map(lexeme(integer_literal), Expr::Lit),
        parenthesized,
    ))(input)
}

/* === Lexical helpers === */

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<'a, &'a str> {
    lexeme(tag(word))
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

    #[test]
    fn comments_are_whitespace() {
        assert_eq!(ws("  // line\n /* block\n */ x"), Ok(("x", "  // line\n /* block\n */ ")));
    }

    #[test]
    fn escaped_strings() {
        assert_eq!(
            string_literal(r#""say \"hi\"" rest"#),
            Ok((" rest", r#"say \"hi\""#))
        );
        assert_eq!(string_literal(r#""""#), Ok(("", "")));
    }

    #[test]
    fn expressions_respect_precedence() {
        let (_, e) = parenthesized("(1 + 2 * 3 << 1)").unwrap();
        assert_eq!(e.eval(), Ok(14));
        let (_, e) = parenthesized("(1 ? 0x10 : 2)").unwrap();
        assert_eq!(e.eval(), Ok(16));
        let (_, e) = parenthesized("(~0 & 0xff)").unwrap();
        assert_eq!(e.eval(), Ok(0xff));
    }

    #[test]
    fn cells_with_references() {
        let (_, cells) = cell_array("<&gic 0 (4 - 1) &{/soc/uart}>").unwrap();
        assert_eq!(
            cells,
            vec![
                Cell::Ref(Reference::Label("gic")),
                Cell::Expr(Expr::Lit(0)),
                Cell::Expr(Expr::Binary(
                    Box::new(Expr::Lit(4)),
                    BinaryOp::Sub,
                    Box::new(Expr::Lit(1))
                )),
                Cell::Ref(Reference::Path("/soc/uart")),
            ]
        );
    }

    #[test]
    fn byte_strings() {
        assert_eq!(byte_string("[0a0b 0c]"), Ok(("", vec![0x0a, 0x0b, 0x0c])));
    }

    #[test]
    fn syntax_errors_carry_positions() {
        let err = parse("/dts-v1/;\n/ {\n    foo = <1>\n};").unwrap_err();
        match err {
            DtsError::Syntax { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn top_level_items_keep_order() {
        let dts = parse(
            "/dts-v1/;\n/memreserve/ 0x1000 0x100;\n/ { a: a {}; };\n&a { x; };\n/delete-node/ &a;",
        )
        .unwrap();
        assert_eq!(dts.memreserves, [(0x1000, 0x100)]);
        assert!(matches!(dts.items[0], TopItem::Root(_)));
        assert!(matches!(dts.items[1], TopItem::Override(Reference::Label("a"), _)));
        assert!(matches!(dts.items[2], TopItem::DeleteNode(Reference::Label("a"))));
    }
}

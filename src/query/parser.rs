//! Expression parser
//!
//! ```text
//! expr       := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | "(" expr ")" | comparison
//! comparison := name op literal
//! op         := "==" | "!=" | "=~" | "!~" | "<=" | ">=" | "<" | ">"
//! literal    := '"' ... '"' | "'" ... "'" | bare word
//! ```

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while1},
    character::complete::{char, multispace0, satisfy},
    combinator::{map, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};

use super::ast::{CompareOp, Node};
use crate::error::QueryError;

/// Parse an expression into a predicate tree
pub fn parse(input: &str) -> Result<Node, QueryError> {
    match parse_or(input) {
        Ok((rest, node)) => {
            let rest = rest.trim();
            if rest.is_empty() {
                Ok(node)
            } else {
                Err(QueryError::Parse {
                    at: rest.to_string(),
                    reason: "unexpected trailing input".to_string(),
                })
            }
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(QueryError::Parse {
            at: e.input.trim().to_string(),
            reason: format!("expected an expression ({:?})", e.code),
        }),
        Err(nom::Err::Incomplete(_)) => Err(QueryError::Parse {
            at: String::new(),
            reason: "incomplete expression".to_string(),
        }),
    }
}

fn ws<'a, O, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>
where
    F: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    delimited(multispace0, inner, multispace0)
}

// ============================================================================
// Boolean Structure
// ============================================================================

fn parse_or(input: &str) -> IResult<&str, Node> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(preceded(ws(tag("||")), parse_and)).parse(input)?;
    Ok((input, rest.into_iter().fold(first, Node::or)))
}

fn parse_and(input: &str) -> IResult<&str, Node> {
    let (input, first) = parse_unary(input)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), parse_unary)).parse(input)?;
    Ok((input, rest.into_iter().fold(first, Node::and)))
}

fn parse_unary(input: &str) -> IResult<&str, Node> {
    ws(alt((
        map(preceded(char('!'), parse_unary), |n| Node::Neg(Box::new(n))),
        delimited(char('('), parse_or, ws(char(')'))),
        parse_comparison,
    )))
    .parse(input)
}

// ============================================================================
// Comparisons
// ============================================================================

fn parse_comparison(input: &str) -> IResult<&str, Node> {
    let (input, name) = parse_name(input)?;
    let (input, op) = ws(parse_op).parse(input)?;
    let (input, literal) = parse_literal(input)?;
    Ok((
        input,
        Node::Compare {
            op,
            left: Box::new(Node::Name(name.to_string())),
            right: Box::new(Node::String(literal)),
        },
    ))
}

fn parse_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        many0(satisfy(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.')),
    ))
    .parse(input)
}

fn parse_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Neq, tag("!=")),
        value(CompareOp::Match, tag("=~")),
        value(CompareOp::NotMatch, tag("!~")),
        value(CompareOp::Leq, tag("<=")),
        value(CompareOp::Geq, tag(">=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
    ))
    .parse(input)
}

fn parse_literal(input: &str) -> IResult<&str, String> {
    alt((
        quoted('"'),
        quoted('\''),
        map(
            take_while1(|c: char| c.is_ascii_alphanumeric() || "._-:/+*".contains(c)),
            str::to_string,
        ),
    ))
    .parse(input)
}

fn quoted<'a>(quote: char) -> impl Parser<&'a str, Output = String, Error = nom::error::Error<&'a str>> {
    move |input: &'a str| -> IResult<&'a str, String> {
        let stop: &'static str = if quote == '"' { "\"\\" } else { "'\\" };
        let (input, _) = char(quote)(input)?;
        if let Ok((rest, _)) = char::<&str, nom::error::Error<&str>>(quote)(input) {
            return Ok((rest, String::new()));
        }
        let (input, text) = escaped_transform(
            is_not(stop),
            '\\',
            alt((
                value("\\", char('\\')),
                value("\"", char('"')),
                value("'", char('\'')),
                value("\n", char('n')),
                value("\t", char('t')),
            )),
        )
        .parse(input)?;
        let (input, _) = char(quote)(input)?;
        Ok((input, text))
    }
}

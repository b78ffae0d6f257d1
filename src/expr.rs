//! Grammar and evaluator for symbolic fit expressions, e.g.
//! `a * exp(-x / tau) + c`. The identifier `x` is the independent variable;
//! every other free identifier is a fit parameter.

use indexmap::IndexMap;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric1, multispace0};
use nom::combinator::{all_consuming, map, opt, recognize};
use nom::error::ParseError;
use nom::multi::many0;
use nom::number::complete::double;
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::{IResult, Parser};

use crate::errors::{FitError, FitResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Box<Expr>),
}

const FUNCTIONS: &[&str] = &[
    "exp", "log", "ln", "log10", "sin", "cos", "tan", "sinh", "cosh", "tanh", "sqrt", "abs",
];

/// A combinator that takes a parser `inner` and produces a parser that also
/// consumes both leading and trailing whitespace, returning the output of
/// `inner`.
fn ws<'a, F, O, E: ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: Parser<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn atom(input: &str) -> IResult<&str, Expr> {
    alt((
        delimited(ws(tag("(")), expression, ws(tag(")"))),
        map(
            tuple((
                ws(identifier),
                delimited(ws(tag("(")), expression, ws(tag(")"))),
            )),
            |(name, arg)| Expr::Call(name.to_string(), Box::new(arg)),
        ),
        map(ws(identifier), |name| Expr::Var(name.to_string())),
        map(ws(double), Expr::Num),
    ))(input)
}

// `^` (and the `**` spelling) binds tighter than unary minus and is
// right-associative: -x^2 parses as -(x^2), x^-2 is allowed.
fn power(input: &str) -> IResult<&str, Expr> {
    let (input, base) = atom(input)?;
    let (input, exponent) = opt(preceded(ws(alt((tag("**"), tag("^")))), factor))(input)?;
    Ok((
        input,
        match exponent {
            Some(exponent) => Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)),
            None => base,
        },
    ))
}

fn factor(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(tag("-")), factor), |e| Expr::Neg(Box::new(e))),
        power,
    ))(input)
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(pair(ws(alt((tag("*"), tag("/")))), factor))(input)?;
    Ok((input, fold_binary(first, rest, "*", BinOp::Mul, BinOp::Div)))
}

fn expression(input: &str) -> IResult<&str, Expr> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(ws(alt((tag("+"), tag("-")))), term))(input)?;
    Ok((input, fold_binary(first, rest, "+", BinOp::Add, BinOp::Sub)))
}

fn fold_binary(
    first: Expr,
    rest: Vec<(&str, Expr)>,
    match_op: &str,
    on_match: BinOp,
    otherwise: BinOp,
) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| {
        let op = if op == match_op { on_match } else { otherwise };
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    })
}

/// Parse a complete fit expression. Unknown function names are rejected.
pub fn parse_expression(input: &str) -> FitResult<Expr> {
    let (_, expr) = all_consuming(ws(expression))(input)
        .map_err(|err| FitError::Parse(format!("{input:?}: {err:?}")))?;
    validate_functions(&expr)?;
    Ok(expr)
}

fn validate_functions(expr: &Expr) -> FitResult<()> {
    match expr {
        Expr::Num(_) | Expr::Var(_) => Ok(()),
        Expr::Neg(inner) => validate_functions(inner),
        Expr::Binary(_, lhs, rhs) => {
            validate_functions(lhs)?;
            validate_functions(rhs)
        }
        Expr::Call(name, arg) => {
            if !FUNCTIONS.contains(&name.as_str()) {
                return Err(FitError::UnknownFunction(name.clone()));
            }
            validate_functions(arg)
        }
    }
}

impl Expr {
    /// Free identifiers other than `x`, in first-appearance order.
    pub fn parameters(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_parameters(&mut names);
        names
    }

    fn collect_parameters(&self, names: &mut Vec<String>) {
        match self {
            Expr::Num(_) => {}
            Expr::Var(name) => {
                if name != "x" && !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Expr::Neg(inner) => inner.collect_parameters(names),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_parameters(names);
                rhs.collect_parameters(names);
            }
            Expr::Call(_, arg) => arg.collect_parameters(names),
        }
    }

    /// Evaluate at one sample of the independent variable.
    pub fn eval(&self, x: f64, params: &IndexMap<String, f64>) -> FitResult<f64> {
        match self {
            Expr::Num(value) => Ok(*value),
            Expr::Var(name) => {
                if name == "x" {
                    Ok(x)
                } else {
                    params
                        .get(name)
                        .copied()
                        .ok_or_else(|| FitError::Parse(format!("unbound parameter '{name}'")))
                }
            }
            Expr::Neg(inner) => Ok(-inner.eval(x, params)?),
            Expr::Binary(op, lhs, rhs) => {
                let lhs = lhs.eval(x, params)?;
                let rhs = rhs.eval(x, params)?;
                Ok(match op {
                    BinOp::Add => lhs + rhs,
                    BinOp::Sub => lhs - rhs,
                    BinOp::Mul => lhs * rhs,
                    BinOp::Div => lhs / rhs,
                    BinOp::Pow => lhs.powf(rhs),
                })
            }
            Expr::Call(name, arg) => {
                let arg = arg.eval(x, params)?;
                Ok(match name.as_str() {
                    "exp" => arg.exp(),
                    "log" | "ln" => arg.ln(),
                    "log10" => arg.log10(),
                    "sin" => arg.sin(),
                    "cos" => arg.cos(),
                    "tan" => arg.tan(),
                    "sinh" => arg.sinh(),
                    "cosh" => arg.cosh(),
                    "tanh" => arg.tanh(),
                    "sqrt" => arg.sqrt(),
                    "abs" => arg.abs(),
                    other => return Err(FitError::UnknownFunction(other.to_string())),
                })
            }
        }
    }
}

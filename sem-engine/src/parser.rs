use std::collections::HashMap;
use std::str::FromStr;

use chumsky::prelude::*;

use crate::error::{Result, spec_err};

type Extra<'a> = chumsky::extra::Err<Rich<'a, char>>;

const FUNCTIONS: [&str; 5] = ["exp", "log", "sqrt", "abs", "pow"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Measure,
    Regress,
    Covary,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Measure => "=~",
            Operator::Regress => "~",
            Operator::Covary => "~~",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    Fixed(f64),
    Label(String),
    Start(f64),
    /// `NA*x`: free even where a default would fix it.
    Free,
    Default,
}

#[derive(Debug, Clone)]
pub struct Term {
    pub modifier: Modifier,
    pub var: String,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub lhs: String,
    pub op: Operator,
    pub terms: Vec<Term>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

#[derive(Debug, Clone)]
pub struct Bound {
    pub target: String,
    pub op: BoundOp,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct Defined {
    pub name: String,
    pub expr: Expr,
    pub source: String,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSpec {
    pub relations: Vec<Relation>,
    pub bounds: Vec<Bound>,
    pub defined: Vec<Defined>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    pub fn eval(&self, vars: &HashMap<String, f64>) -> f64 {
        match self {
            Expr::Number(v) => *v,
            Expr::Var(name) => vars.get(name).copied().unwrap_or(f64::NAN),
            Expr::Neg(inner) => -inner.eval(vars),
            Expr::Binary(op, lhs, rhs) => {
                let (a, b) = (lhs.eval(vars), rhs.eval(vars));
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Pow => a.powf(b),
                }
            }
            Expr::Call(name, args) => {
                let vals: Vec<f64> = args.iter().map(|a| a.eval(vars)).collect();
                let arg = |i: usize| vals.get(i).copied().unwrap_or(f64::NAN);
                match name.as_str() {
                    "exp" => arg(0).exp(),
                    "log" => arg(0).ln(),
                    "sqrt" => arg(0).sqrt(),
                    "abs" => arg(0).abs(),
                    "pow" => arg(0).powf(arg(1)),
                    _ => f64::NAN,
                }
            }
        }
    }

    /// Names referenced by the expression, in order of appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'e>(&'e self, out: &mut Vec<&'e str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Var(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Neg(inner) => inner.collect_variables(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
            Expr::Call(_, args) => {
                for a in args {
                    a.collect_variables(out);
                }
            }
        }
    }

    fn check_calls(&self) -> Result<()> {
        match self {
            Expr::Number(_) | Expr::Var(_) => Ok(()),
            Expr::Neg(inner) => inner.check_calls(),
            Expr::Binary(_, lhs, rhs) => {
                lhs.check_calls()?;
                rhs.check_calls()
            }
            Expr::Call(name, args) => {
                if !FUNCTIONS.contains(&name.as_str()) {
                    return Err(spec_err(format!("unknown function {name}()")));
                }
                args.iter().try_for_each(Expr::check_calls)
            }
        }
    }
}

enum Statement {
    Relations(Vec<Relation>),
    Bound(Bound),
}

pub fn parse_model(desc: &str) -> Result<ModelSpec> {
    let mut spec = ModelSpec::default();

    for raw_line in desc.lines() {
        let stripped = strip_comments(raw_line);
        for segment in stripped.split(';') {
            let line = segment.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((name, rhs)) = line.split_once(":=") {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(spec_err(format!("defined parameter without a name: {line}")));
                }
                let source = rhs.trim().to_string();
                let expr = parse_expr(&source)?;
                expr.check_calls()?;
                spec.defined.push(Defined { name, expr, source });
                continue;
            }
            match parse_statement(line)? {
                Statement::Relations(relations) => spec.relations.extend(relations),
                Statement::Bound(bound) => spec.bounds.push(bound),
            }
        }
    }

    Ok(spec)
}

fn strip_comments(line: &str) -> &str {
    let mut end = line.len();
    if let Some(idx) = line.find('#') {
        end = end.min(idx);
    }
    if let Some(idx) = line.find("//") {
        end = end.min(idx);
    }
    &line[..end]
}

fn char_where<'a>(
    pred: fn(&char) -> bool,
) -> impl Parser<'a, &'a str, char, Extra<'a>> + Clone {
    any().filter(pred)
}

fn ident<'a>() -> impl Parser<'a, &'a str, String, Extra<'a>> + Clone {
    let first = char_where(|c| c.is_ascii_alphabetic() || *c == '_' || *c == '.');
    let rest = char_where(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .repeated()
        .collect::<String>();
    first
        .then(rest)
        .map(|(first, rest)| format!("{first}{rest}"))
        .padded()
}

fn number<'a>() -> impl Parser<'a, &'a str, f64, Extra<'a>> + Clone {
    let digits = char_where(|c| c.is_ascii_digit())
        .repeated()
        .at_least(1)
        .collect::<String>();
    // `.5` is a number, not an identifier.
    let mantissa = choice((
        digits
            .clone()
            .then(just('.').ignore_then(digits.clone()).or_not())
            .map(|(int, frac)| match frac {
                Some(frac) => format!("{int}.{frac}"),
                None => int,
            }),
        just('.').ignore_then(digits.clone()).map(|frac| format!("0.{frac}")),
    ));
    let exp = just('e')
        .or(just('E'))
        .ignore_then(just('-').or(just('+')).or_not())
        .then(digits)
        .or_not();

    mantissa
        .then(exp)
        .map(|(mut text, exp)| {
            if let Some((sign, digits)) = exp {
                text.push('e');
                if let Some(sign) = sign {
                    text.push(sign);
                }
                text.push_str(&digits);
            }
            f64::from_str(&text).unwrap_or(f64::NAN)
        })
        .padded()
}

fn signed_number<'a>() -> impl Parser<'a, &'a str, f64, Extra<'a>> + Clone {
    just('-')
        .padded()
        .or_not()
        .then(number())
        .map(|(neg, value)| if neg.is_some() { -value } else { value })
}

fn parse_statement(line: &str) -> Result<Statement> {
    let modifier = choice((
        just("start")
            .padded()
            .ignore_then(signed_number().delimited_by(just('(').padded(), just(')').padded()))
            .map(Modifier::Start),
        signed_number().map(Modifier::Fixed),
        ident().map(|name| {
            if name == "NA" {
                Modifier::Free
            } else {
                Modifier::Label(name)
            }
        }),
    ));

    let term = modifier
        .then_ignore(just('*').padded())
        .then(ident())
        .map(|(modifier, var)| Term { modifier, var })
        .or(ident().map(|var| Term {
            modifier: Modifier::Default,
            var,
        }));

    let terms = term
        .separated_by(just('+').padded())
        .at_least(1)
        .collect::<Vec<_>>();

    let lhs = ident()
        .separated_by(just(',').padded())
        .at_least(1)
        .collect::<Vec<_>>();

    let op = choice((
        just("=~").to(Operator::Measure),
        just("~~").to(Operator::Covary),
        just('~').to(Operator::Regress),
    ))
    .padded();

    let relation = lhs.then(op).then(terms).map(|((lhs, op), terms)| {
        Statement::Relations(
            lhs.into_iter()
                .map(|lhs| Relation {
                    lhs,
                    op,
                    terms: terms.clone(),
                })
                .collect(),
        )
    });

    let bound_op = choice((
        just("<=").to(BoundOp::Le),
        just(">=").to(BoundOp::Ge),
        just("==").to(BoundOp::Eq),
        just('<').to(BoundOp::Lt),
        just('>').to(BoundOp::Gt),
    ))
    .padded();

    let bound = ident()
        .then(bound_op)
        .then(signed_number())
        .map(|((target, op), value)| Statement::Bound(Bound { target, op, value }));

    relation
        .or(bound)
        .then_ignore(end())
        .parse(line)
        .into_result()
        .map_err(|errs| spec_err(format!("cannot parse `{line}`: {}", describe(errs))))
}

fn expr_parser<'a>() -> impl Parser<'a, &'a str, Expr, Extra<'a>> + Clone {
    recursive(|expr| {
        let call = ident()
            .then(
                expr.clone()
                    .separated_by(just(',').padded())
                    .collect::<Vec<_>>()
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .map(|(name, args)| Expr::Call(name, args));

        let atom = choice((
            call,
            number().map(Expr::Number),
            ident().map(Expr::Var),
            expr.delimited_by(just('(').padded(), just(')').padded()),
        ))
        .padded();

        // `^` binds right to left.
        let power = atom
            .clone()
            .then(
                just('^')
                    .padded()
                    .ignore_then(atom)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(base, exponents)| {
                let mut chain = exponents;
                chain.insert(0, base);
                let mut acc = chain.pop().unwrap_or(Expr::Number(f64::NAN));
                while let Some(lhs) = chain.pop() {
                    acc = Expr::Binary(BinOp::Pow, Box::new(lhs), Box::new(acc));
                }
                acc
            });

        let unary = just('-')
            .padded()
            .or_not()
            .then(power)
            .map(|(neg, e)| if neg.is_some() { Expr::Neg(Box::new(e)) } else { e });

        let product = unary.clone().foldl(
            choice((just('*').to(BinOp::Mul), just('/').to(BinOp::Div)))
                .padded()
                .then(unary)
                .repeated(),
            |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
        );

        product.clone().foldl(
            choice((just('+').to(BinOp::Add), just('-').to(BinOp::Sub)))
                .padded()
                .then(product)
                .repeated(),
            |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
        )
    })
}

pub fn parse_expr(source: &str) -> Result<Expr> {
    expr_parser()
        .then_ignore(end())
        .parse(source)
        .into_result()
        .map_err(|errs| spec_err(format!("cannot parse expression `{source}`: {}", describe(errs))))
}

fn describe(errs: Vec<Rich<'_, char>>) -> String {
    errs.into_iter()
        .map(|e| {
            let found = match e.found() {
                Some(c) => format!("`{c}` at column {}", e.span().start + 1),
                None => "end of input".to_string(),
            };
            let expected: Vec<String> = e.expected().map(ToString::to_string).collect();
            if expected.is_empty() {
                format!("unexpected {found}")
            } else {
                format!("unexpected {found}, expected {}", expected.join(" or "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

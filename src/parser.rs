//! nom parsers for the tenant script DSL and the restricted arithmetic
//! grammar used by Calculate field rules. The arithmetic entry point is a
//! stricter subset of the same grammar: numeric literals, parentheses,
//! unary minus and `+ - * / %` only. No identifiers, no calls.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map, map_res, not, opt, peek, recognize},
    multi::{fold_many0, many0, separated_list0},
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};
use thiserror::Error;
use tracing::instrument;

use crate::ast::*;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("script parse failed: {0}")]
    Script(String),
    #[error("arithmetic parse failed: {0}")]
    Arithmetic(String),
    #[error("unexpected trailing input: {0}")]
    TrailingInput(String),
}

/// Entry point for tenant script source.
#[instrument(level = "debug", skip(input))]
pub fn parse_script(input: &str) -> Result<ScriptDef, ParseError> {
    match script_items(input) {
        Ok((rest, def)) => {
            if rest.trim().is_empty() {
                Ok(def)
            } else {
                Err(ParseError::TrailingInput(rest.trim().to_string()))
            }
        }
        Err(e) => Err(ParseError::Script(e.to_string())),
    }
}

/// Entry point for Calculate rule expressions, after field-token
/// substitution has already replaced every key with its value.
#[instrument(level = "debug", skip(input))]
pub fn parse_arithmetic(input: &str) -> Result<Expression, ParseError> {
    match arith_expression(input) {
        Ok((rest, expr)) => {
            if rest.trim().is_empty() {
                Ok(expr)
            } else {
                Err(ParseError::TrailingInput(rest.trim().to_string()))
            }
        }
        Err(e) => Err(ParseError::Arithmetic(e.to_string())),
    }
}

enum TopLevelItem {
    Invoke(InvokeDef),
    Stmt(Statement),
}

fn script_items(input: &str) -> IResult<&str, ScriptDef> {
    map(
        many0(alt((
            map(parse_invoke, TopLevelItem::Invoke),
            map(parse_statement, TopLevelItem::Stmt),
        ))),
        |items| {
            let mut def = ScriptDef::default();
            for item in items {
                match item {
                    TopLevelItem::Invoke(invoke) => def.invoke = Some(invoke),
                    TopLevelItem::Stmt(stmt) => def.statements.push(stmt),
                }
            }
            def
        },
    )(input)
}

#[instrument(level = "debug", skip(input))]
fn parse_invoke(input: &str) -> IResult<&str, InvokeDef> {
    let (input, _) = ws(keyword("invoke"))(input)?;
    let (input, param) = delimited(ws(char('(')), ws(identifier), ws(char(')')))(input)?;
    let (input, body) = braces(many0(parse_statement))(input)?;
    Ok((
        input,
        InvokeDef {
            param: param.to_string(),
            body,
        },
    ))
}

// Statements

#[instrument(level = "debug", skip(input))]
fn parse_statement(input: &str) -> IResult<&str, Statement> {
    alt((
        parse_let,
        parse_if,
        parse_return,
        parse_assignment,
        parse_expression_statement,
    ))(input)
}

fn parse_let(input: &str) -> IResult<&str, Statement> {
    let (input, _) = ws(keyword("let"))(input)?;
    let (input, name) = ws(identifier)(input)?;
    let (input, _) = ws(char('='))(input)?;
    let (input, value) = parse_expression(input)?;
    let (input, _) = opt(ws(char(';')))(input)?;
    Ok((
        input,
        Statement::Let {
            name: name.to_string(),
            value,
        },
    ))
}

fn parse_if(input: &str) -> IResult<&str, Statement> {
    let (input, _) = ws(keyword("if"))(input)?;
    let (input, condition) = parse_expression(input)?;
    let (input, then_block) = braces(many0(parse_statement))(input)?;
    let (input, else_block) = opt(preceded(
        ws(keyword("else")),
        alt((
            // else if chains nest as a single-statement else block
            map(parse_if, |stmt| vec![stmt]),
            braces(many0(parse_statement)),
        )),
    ))(input)?;
    Ok((
        input,
        Statement::If {
            condition,
            then_block,
            else_block,
        },
    ))
}

fn parse_return(input: &str) -> IResult<&str, Statement> {
    let (input, _) = ws(keyword("return"))(input)?;
    let (input, value) = opt(parse_expression)(input)?;
    let (input, _) = opt(ws(char(';')))(input)?;
    Ok((input, Statement::Return(value)))
}

fn parse_assignment(input: &str) -> IResult<&str, Statement> {
    let (input, target) = preceded(multispace0, preceded(parse_not_reserved, identifier))(input)?;
    // reject `==` so comparisons fall through to expression statements
    let (input, _) = terminated(ws(char('=')), not(char('=')))(input)?;
    let (input, value) = parse_expression(input)?;
    let (input, _) = opt(ws(char(';')))(input)?;
    Ok((
        input,
        Statement::Assignment {
            target: target.to_string(),
            value,
        },
    ))
}

fn parse_expression_statement(input: &str) -> IResult<&str, Statement> {
    let (input, expr) = parse_expression(input)?;
    let (input, _) = opt(ws(char(';')))(input)?;
    Ok((input, Statement::Expression(expr)))
}

// Expressions, loosest binding first

#[instrument(level = "debug", skip(input))]
pub fn parse_expression(input: &str) -> IResult<&str, Expression> {
    parse_logical_or(input)
}

fn parse_logical_or(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_logical_and(input)?;
    let (input, rest) = many0(preceded(
        ws(alt((tag("||"), keyword("or")))),
        parse_logical_and,
    ))(input)?;

    let result = rest
        .into_iter()
        .fold(first, |left, right| Expression::BinaryOp {
            op: BinaryOperator::Or,
            left: Box::new(left),
            right: Box::new(right),
        });

    Ok((input, result))
}

fn parse_logical_and(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_comparison(input)?;
    let (input, rest) = many0(preceded(
        ws(alt((tag("&&"), keyword("and")))),
        parse_comparison,
    ))(input)?;

    let result = rest
        .into_iter()
        .fold(first, |left, right| Expression::BinaryOp {
            op: BinaryOperator::And,
            left: Box::new(left),
            right: Box::new(right),
        });

    Ok((input, result))
}

fn parse_comparison(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_additive(input)?;
    let (input, rest) = opt(tuple((
        ws(alt((
            tag("=="),
            tag("!="),
            tag("<="),
            tag(">="),
            tag("<"),
            tag(">"),
        ))),
        parse_additive,
    )))(input)?;

    match rest {
        Some((op, right)) => {
            let op = match op {
                "==" => BinaryOperator::Equal,
                "!=" => BinaryOperator::NotEqual,
                "<" => BinaryOperator::LessThan,
                ">" => BinaryOperator::GreaterThan,
                "<=" => BinaryOperator::LessThanEqual,
                ">=" => BinaryOperator::GreaterThanEqual,
                _ => unreachable!(),
            };
            Ok((
                input,
                Expression::BinaryOp {
                    op,
                    left: Box::new(first),
                    right: Box::new(right),
                },
            ))
        }
        None => Ok((input, first)),
    }
}

fn parse_additive(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_multiplicative(input)?;
    let first = first.clone();
    fold_many0::<_, _, _, _, _, _, Expression>(
        tuple((ws(alt((tag("+"), tag("-")))), parse_multiplicative)),
        move || first.clone(),
        |left, (op, right)| Expression::BinaryOp {
            op: match op {
                "+" => BinaryOperator::Add,
                "-" => BinaryOperator::Subtract,
                _ => unreachable!(),
            },
            left: Box::new(left),
            right: Box::new(right),
        },
    )(input)
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_unary(input)?;
    let first = first.clone();
    fold_many0::<_, _, _, _, _, _, Expression>(
        tuple((ws(alt((tag("*"), tag("/"), tag("%")))), parse_unary)),
        move || first.clone(),
        |left, (op, right)| Expression::BinaryOp {
            op: match op {
                "*" => BinaryOperator::Multiply,
                "/" => BinaryOperator::Divide,
                "%" => BinaryOperator::Modulo,
                _ => unreachable!(),
            },
            left: Box::new(left),
            right: Box::new(right),
        },
    )(input)
}

fn parse_unary(input: &str) -> IResult<&str, Expression> {
    alt((
        map(preceded(ws(char('-')), parse_unary), |operand| {
            Expression::UnaryOp {
                op: UnaryOperator::Minus,
                operand: Box::new(operand),
            }
        }),
        map(preceded(ws(char('!')), parse_unary), |operand| {
            Expression::UnaryOp {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            }
        }),
        parse_primary,
    ))(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expression> {
    ws(alt((
        map(parse_literal, Expression::Literal),
        parse_capability_call,
        delimited(ws(char('(')), parse_expression, ws(char(')'))),
        parse_variable,
    )))(input)
}

fn parse_capability_call(input: &str) -> IResult<&str, Expression> {
    preceded(
        parse_not_reserved,
        map(
            tuple((
                identifier,
                preceded(char('.'), identifier),
                delimited(
                    ws(char('(')),
                    separated_list0(ws(char(',')), parse_expression),
                    ws(char(')')),
                ),
            )),
            |(object, method, args)| Expression::CapabilityCall {
                object: object.to_string(),
                method: method.to_string(),
                args,
            },
        ),
    )(input)
}

fn parse_variable(input: &str) -> IResult<&str, Expression> {
    preceded(
        parse_not_reserved,
        map(identifier, |id| Expression::Variable(id.to_string())),
    )(input)
}

fn parse_literal(input: &str) -> IResult<&str, Literal> {
    alt((
        map(parse_number, Literal::Number),
        map(parse_quoted_string, Literal::String),
        map(keyword("true"), |_| Literal::Boolean(true)),
        map(keyword("false"), |_| Literal::Boolean(false)),
        map(keyword("null"), |_| Literal::Null),
    ))(input)
}

const RESERVED_KEYWORDS: [&str; 10] = [
    "invoke", "let", "if", "else", "return", "true", "false", "null", "and", "or",
];

fn parse_not_reserved(input: &str) -> IResult<&str, ()> {
    not(peek(alt((
        keyword(RESERVED_KEYWORDS[0]),
        keyword(RESERVED_KEYWORDS[1]),
        keyword(RESERVED_KEYWORDS[2]),
        keyword(RESERVED_KEYWORDS[3]),
        keyword(RESERVED_KEYWORDS[4]),
        keyword(RESERVED_KEYWORDS[5]),
        keyword(RESERVED_KEYWORDS[6]),
        keyword(RESERVED_KEYWORDS[7]),
        keyword(RESERVED_KEYWORDS[8]),
        keyword(RESERVED_KEYWORDS[9]),
    ))))(input)
}

// Restricted arithmetic grammar

fn arith_expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = arith_multiplicative(input)?;
    let first = first.clone();
    fold_many0::<_, _, _, _, _, _, Expression>(
        tuple((ws(alt((tag("+"), tag("-")))), arith_multiplicative)),
        move || first.clone(),
        |left, (op, right)| Expression::BinaryOp {
            op: match op {
                "+" => BinaryOperator::Add,
                "-" => BinaryOperator::Subtract,
                _ => unreachable!(),
            },
            left: Box::new(left),
            right: Box::new(right),
        },
    )(input)
}

fn arith_multiplicative(input: &str) -> IResult<&str, Expression> {
    let (input, first) = arith_unary(input)?;
    let first = first.clone();
    fold_many0::<_, _, _, _, _, _, Expression>(
        tuple((ws(alt((tag("*"), tag("/"), tag("%")))), arith_unary)),
        move || first.clone(),
        |left, (op, right)| Expression::BinaryOp {
            op: match op {
                "*" => BinaryOperator::Multiply,
                "/" => BinaryOperator::Divide,
                "%" => BinaryOperator::Modulo,
                _ => unreachable!(),
            },
            left: Box::new(left),
            right: Box::new(right),
        },
    )(input)
}

fn arith_unary(input: &str) -> IResult<&str, Expression> {
    alt((
        map(preceded(ws(char('-')), arith_unary), |operand| {
            Expression::UnaryOp {
                op: UnaryOperator::Minus,
                operand: Box::new(operand),
            }
        }),
        arith_primary,
    ))(input)
}

fn arith_primary(input: &str) -> IResult<&str, Expression> {
    ws(alt((
        map(parse_number, |n| Expression::Literal(Literal::Number(n))),
        delimited(ws(char('(')), arith_expression, ws(char(')'))),
    )))(input)
}

// Shared helpers

fn parse_number(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((digit1, opt(tuple((char('.'), digit1)))))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        )),
        |s: &str| s.to_string(),
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    let id_chars = |c: char| c.is_alphanumeric() || c == '_';
    let start_chars = |c: char| c.is_alphabetic() || c == '_';

    take_while1(start_chars)(input).and_then(|(rest, first)| {
        let (rest, others) = take_while(id_chars)(rest)?;
        Ok((rest, &input[..first.len() + others.len()]))
    })
}

/// Keyword with a word boundary, so `lettuce` stays an identifier.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(
        tag(kw),
        not(take_while1(|c: char| c.is_alphanumeric() || c == '_')),
    )
}

fn braces<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(ws(char('{')), inner, ws(char('}')))
}

/// 空白文字のスキップ
fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_invoke_with_capability_call() {
        let input = r#"
            invoke(form) {
                form.setValue('state', 'open')
            }
        "#;

        let def = parse_script(input).unwrap();
        assert!(def.statements.is_empty());
        let invoke = def.invoke.unwrap();
        assert_eq!(invoke.param, "form");
        assert_eq!(
            invoke.body,
            vec![Statement::Expression(Expression::CapabilityCall {
                object: "form".to_string(),
                method: "setValue".to_string(),
                args: vec![
                    Expression::Literal(Literal::String("state".to_string())),
                    Expression::Literal(Literal::String("open".to_string())),
                ],
            })]
        );
    }

    #[test]
    fn test_parse_top_level_statements_and_invoke() {
        let input = r#"
            let threshold = 10;
            invoke(form) {
                if form.getValue("count") > threshold {
                    form.addError("count", "too many")
                } else {
                    form.clearError("count")
                }
            }
        "#;

        let def = parse_script(input).unwrap();
        assert_eq!(def.statements.len(), 1);
        assert!(matches!(
            def.statements[0],
            Statement::Let { ref name, .. } if name == "threshold"
        ));
        let invoke = def.invoke.unwrap();
        assert!(matches!(
            invoke.body[0],
            Statement::If { else_block: Some(_), .. }
        ));
    }

    #[test]
    fn test_parse_else_if_chain() {
        let input = r#"
            invoke(form) {
                if x == 1 {
                    return 1
                } else if x == 2 {
                    return 2
                } else {
                    return;
                }
            }
        "#;

        let def = parse_script(input).unwrap();
        let invoke = def.invoke.unwrap();
        let Statement::If { else_block, .. } = &invoke.body[0] else {
            panic!("expected if");
        };
        let chained = else_block.as_ref().unwrap();
        assert!(matches!(chained[0], Statement::If { .. }));
    }

    #[test]
    fn test_parse_assignment_vs_comparison() {
        let def = parse_script("x = 1; x == 1").unwrap();
        assert!(matches!(def.statements[0], Statement::Assignment { .. }));
        assert!(matches!(
            def.statements[1],
            Statement::Expression(Expression::BinaryOp {
                op: BinaryOperator::Equal,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_word_logical_operators() {
        let def = parse_script("let ok = a > 1 and b < 2 or ready").unwrap();
        let Statement::Let { value, .. } = &def.statements[0] else {
            panic!("expected let");
        };
        // left fold: ((a > 1 && b < 2) || ready)
        assert!(matches!(
            value,
            Expression::BinaryOp {
                op: BinaryOperator::Or,
                ..
            }
        ));
    }

    #[test]
    fn test_reserved_word_is_not_an_identifier() {
        assert!(parse_script("let return = 1").is_err());
        // word boundary: identifiers merely starting with a keyword are fine
        assert!(parse_script("let lettuce = 1").is_ok());
    }

    #[test]
    fn test_parse_script_reports_trailing_input() {
        let result = parse_script("let x = 1 }");
        assert!(matches!(result, Err(ParseError::TrailingInput(_))));
    }

    #[test]
    fn test_parse_arithmetic() {
        let expr = parse_arithmetic("4 * 2.5").unwrap();
        assert_eq!(
            expr,
            Expression::BinaryOp {
                op: BinaryOperator::Multiply,
                left: Box::new(Expression::Literal(Literal::Number(4.0))),
                right: Box::new(Expression::Literal(Literal::Number(2.5))),
            }
        );

        assert!(parse_arithmetic("(1 + 2) * -3 % 2").is_ok());
    }

    #[test]
    fn test_parse_arithmetic_rejects_identifiers() {
        // unsubstituted field tokens are not part of the grammar
        assert!(parse_arithmetic("quantity * price").is_err());
        assert!(parse_arithmetic("1 + ").is_err());
    }
}

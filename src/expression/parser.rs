//! Expression parser for workflow conditions and item lists
//!
//! Conditions and items expressions are parsed against a small fixed grammar:
//! dotted property paths rooted at `context` or `results`, literals, the six
//! comparison operators, `&&`/`||`/`!`, and parentheses. Anything outside the
//! grammar is rejected at parse time; expressions are never evaluated as code.

use serde_json::Value;

use crate::error::ExecutorError;

/// Expression types
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Property path (e.g. `context.user.age`, `results.node_0.total`)
    Path(Vec<String>),
    /// Literal value
    Literal(Value),
    /// Comparison operation
    Comparison {
        left: Box<Expression>,
        op: ComparisonOp,
        right: Box<Expression>,
    },
    /// Logical operation
    Logical {
        left: Box<Expression>,
        op: LogicalOp,
        right: Box<Expression>,
    },
    /// Negation
    Not(Box<Expression>),
}

/// Comparison operators
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

/// Logical operators
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Parse an expression string.
pub fn parse_expression(input: &str) -> Result<Expression, ExecutorError> {
    let mut tokens = tokenize(input)?;
    let expr = parse_logical_or(&mut tokens)?;
    if !tokens.is_empty() {
        return Err(ExecutorError::expression(format!(
            "trailing input after expression: {tokens:?}"
        )));
    }
    Ok(expr)
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(Vec<String>),
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    ComparisonOp(ComparisonOp),
    LogicalOp(LogicalOp),
    Not,
    LeftParen,
    RightParen,
}

/// Tokenize the input string
fn tokenize(input: &str) -> Result<Vec<Token>, ExecutorError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '$' => {
                // ${path} wrapping is accepted and stripped
                chars.next();
                if chars.next() != Some('{') {
                    return Err(ExecutorError::expression("expected '{' after '$'"));
                }
                let inner = consume_until(&mut chars, '}')?;
                tokens.push(path_token(inner.trim())?);
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let string = consume_until(&mut chars, quote)?;
                tokens.push(Token::String(string));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LeftParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RightParen);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::ComparisonOp(ComparisonOp::NotEqual));
                } else {
                    tokens.push(Token::Not);
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::ComparisonOp(ComparisonOp::Equal));
                } else {
                    return Err(ExecutorError::expression("expected '==' for equality"));
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::ComparisonOp(ComparisonOp::GreaterThanOrEqual));
                } else {
                    tokens.push(Token::ComparisonOp(ComparisonOp::GreaterThan));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::ComparisonOp(ComparisonOp::LessThanOrEqual));
                } else {
                    tokens.push(Token::ComparisonOp(ComparisonOp::LessThan));
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::LogicalOp(LogicalOp::And));
                } else {
                    return Err(ExecutorError::expression("expected '&&' for logical AND"));
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::LogicalOp(LogicalOp::Or));
                } else {
                    return Err(ExecutorError::expression("expected '||' for logical OR"));
                }
            }
            _ if ch.is_ascii_digit() || ch == '-' => {
                let num_str = consume_number(&mut chars)?;
                let num = num_str
                    .parse::<f64>()
                    .map_err(|_| ExecutorError::expression(format!("invalid number: {num_str}")))?;
                tokens.push(Token::Number(num));
            }
            _ if ch.is_ascii_alphabetic() || ch == '_' => {
                let word = consume_path(&mut chars);
                match word.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "null" => tokens.push(Token::Null),
                    _ => tokens.push(path_token(&word)?),
                }
            }
            _ => {
                return Err(ExecutorError::expression(format!(
                    "unexpected character: {ch:?}"
                )));
            }
        }
    }

    Ok(tokens)
}

fn path_token(raw: &str) -> Result<Token, ExecutorError> {
    if raw.is_empty() {
        return Err(ExecutorError::expression("empty property path"));
    }
    let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
    for segment in &segments {
        let valid = !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ExecutorError::expression(format!(
                "invalid path segment {segment:?} in {raw:?}"
            )));
        }
    }
    Ok(Token::Path(segments))
}

/// Consume characters until the delimiter
fn consume_until(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    delimiter: char,
) -> Result<String, ExecutorError> {
    let mut result = String::new();
    for ch in chars.by_ref() {
        if ch == delimiter {
            return Ok(result);
        }
        result.push(ch);
    }
    Err(ExecutorError::expression(format!(
        "expected {delimiter:?} but reached end of input"
    )))
}

/// Consume a number
fn consume_number(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ExecutorError> {
    let mut result = String::new();

    if chars.peek() == Some(&'-') {
        result.push('-');
        chars.next();
    }

    let mut has_dot = false;
    while let Some(&ch) = chars.peek() {
        if ch.is_ascii_digit() {
            result.push(ch);
            chars.next();
        } else if ch == '.' && !has_dot {
            has_dot = true;
            result.push(ch);
            chars.next();
        } else {
            break;
        }
    }

    if result.is_empty() || result == "-" {
        Err(ExecutorError::expression("invalid number"))
    } else {
        Ok(result)
    }
}

/// Consume a dotted identifier path
fn consume_path(chars: &mut std::iter::Peekable<std::str::Chars>) -> String {
    let mut result = String::new();
    while let Some(&ch) = chars.peek() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
            result.push(ch);
            chars.next();
        } else {
            break;
        }
    }
    result
}

/// Parse logical OR expressions (lowest precedence)
fn parse_logical_or(tokens: &mut Vec<Token>) -> Result<Expression, ExecutorError> {
    let mut left = parse_logical_and(tokens)?;

    while let Some(Token::LogicalOp(LogicalOp::Or)) = tokens.first() {
        tokens.remove(0);
        let right = parse_logical_and(tokens)?;
        left = Expression::Logical {
            left: Box::new(left),
            op: LogicalOp::Or,
            right: Box::new(right),
        };
    }

    Ok(left)
}

/// Parse logical AND expressions
fn parse_logical_and(tokens: &mut Vec<Token>) -> Result<Expression, ExecutorError> {
    let mut left = parse_comparison(tokens)?;

    while let Some(Token::LogicalOp(LogicalOp::And)) = tokens.first() {
        tokens.remove(0);
        let right = parse_comparison(tokens)?;
        left = Expression::Logical {
            left: Box::new(left),
            op: LogicalOp::And,
            right: Box::new(right),
        };
    }

    Ok(left)
}

/// Parse comparison expressions
fn parse_comparison(tokens: &mut Vec<Token>) -> Result<Expression, ExecutorError> {
    let left = parse_unary(tokens)?;

    if let Some(Token::ComparisonOp(op)) = tokens.first() {
        let op = op.clone();
        tokens.remove(0);
        let right = parse_unary(tokens)?;
        return Ok(Expression::Comparison {
            left: Box::new(left),
            op,
            right: Box::new(right),
        });
    }

    Ok(left)
}

/// Parse unary expressions (NOT, parentheses, paths, literals)
fn parse_unary(tokens: &mut Vec<Token>) -> Result<Expression, ExecutorError> {
    if tokens.is_empty() {
        return Err(ExecutorError::expression("unexpected end of expression"));
    }

    match tokens.remove(0) {
        Token::Not => {
            let inner = parse_unary(tokens)?;
            Ok(Expression::Not(Box::new(inner)))
        }
        Token::LeftParen => {
            let inner = parse_logical_or(tokens)?;
            if tokens.is_empty() || tokens.remove(0) != Token::RightParen {
                return Err(ExecutorError::expression("expected closing parenthesis"));
            }
            Ok(inner)
        }
        Token::Path(segments) => Ok(Expression::Path(segments)),
        Token::String(s) => Ok(Expression::Literal(Value::String(s))),
        Token::Number(n) => Ok(Expression::Literal(
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        )),
        Token::Bool(b) => Ok(Expression::Literal(Value::Bool(b))),
        Token::Null => Ok(Expression::Literal(Value::Null)),
        token => Err(ExecutorError::expression(format!(
            "unexpected token in expression: {token:?}"
        ))),
    }
}

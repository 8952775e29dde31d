//! Calculate tool - evaluate arithmetic expressions.
//!
//! Input is restricted to digits, `.`, whitespace and `+ - * / ( )`. Anything
//! else is rejected before parsing. Accepted input is evaluated by a small
//! recursive-descent parser over the grammar
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := ('+' | '-') factor | number | '(' expr ')'
//! ```

use crate::{required_str, Tool, ToolContext, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// Nesting limit for parentheses and unary signs.
const MAX_DEPTH: usize = 256;

/// Evaluate arithmetic expressions.
pub struct CalculateTool;

#[async_trait]
impl Tool for CalculateTool {
    fn id(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        r#"Evaluates an arithmetic expression.

Usage:
- Supports numbers, + - * /, parentheses and unary signs with standard precedence.
- Any other character is rejected."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["expression"],
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The arithmetic expression to evaluate, e.g. 2 + 2 * 3"
                }
            }
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let expression = required_str(&args, "expression")?;
        let value = evaluate(expression)?;
        let result = format_number(value);

        debug!(expression = %expression, result = %result, "Evaluated expression");

        Ok(
            ToolOutput::new("Calculate", format!("{expression} = {result}"))
                .with_metadata(json!({ "result": result })),
        )
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_digit() || c.is_whitespace() || matches!(c, '+' | '-' | '*' | '/' | '(' | ')' | '.')
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> ToolResult<f64> {
    if !expression.chars().all(is_allowed) {
        return Err(ToolError::validation(
            "Invalid characters in expression. Only digits, '.', whitespace and + - * / ( ) are allowed",
        ));
    }

    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(ToolError::validation("Expression is empty"));
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;

    if let Some(token) = parser.peek() {
        return Err(ToolError::validation(format!(
            "Unexpected '{}' in expression",
            token.symbol()
        )));
    }

    Ok(value)
}

/// Render a result the way a JavaScript number prints.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else if value == 0.0 {
        "0".to_string()
    } else if value.abs() >= 1e21 || value.abs() < 1e-6 {
        // Exponent form, with an explicit sign on positive exponents.
        let formatted = format!("{value:e}");
        match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => formatted,
        }
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl Token {
    fn symbol(&self) -> String {
        match self {
            Token::Number(n) => format_number(*n),
            Token::Plus => "+".to_string(),
            Token::Minus => "-".to_string(),
            Token::Star => "*".to_string(),
            Token::Slash => "/".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
        }
    }
}

fn tokenize(input: &str) -> ToolResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            _ => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &input[start..end];
                let number = literal.parse::<f64>().map_err(|_| {
                    ToolError::validation(format!("Invalid number '{literal}'"))
                })?;
                tokens.push(Token::Number(number));
                continue;
            }
        };
        chars.next();
        tokens.push(token);
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> ToolResult<f64> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.advance();
            let rhs = self.term()?;
            value = if op == Token::Plus {
                value + rhs
            } else {
                value - rhs
            };
        }
        Ok(value)
    }

    fn term(&mut self) -> ToolResult<f64> {
        let mut value = self.factor()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek() {
            self.advance();
            let rhs = self.factor()?;
            value = if op == Token::Star {
                value * rhs
            } else {
                value / rhs
            };
        }
        Ok(value)
    }

    fn factor(&mut self) -> ToolResult<f64> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ToolError::validation("Expression is nested too deeply"));
        }

        let value = match self.advance() {
            Some(Token::Number(n)) => n,
            Some(Token::Plus) => self.factor()?,
            Some(Token::Minus) => -self.factor()?,
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => value,
                    _ => return Err(ToolError::validation("Missing closing parenthesis")),
                }
            }
            Some(token) => {
                return Err(ToolError::validation(format!(
                    "Unexpected '{}' in expression",
                    token.symbol()
                )))
            }
            None => return Err(ToolError::validation("Unexpected end of expression")),
        };

        self.depth -= 1;
        Ok(value)
    }
}

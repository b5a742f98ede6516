//! A minimal Pratt-style parser and evaluator for `EntityStateCondition`
//! string expressions (spec §9: "a tiny expression language —
//! arithmetic, comparisons, attribute/buffer access, whitelisted
//! reducers `{mean, std, var, min, max, abs}`... replaces host-language
//! eval and removes the injection surface").
//!
//! Grammar (informal):
//!
//! ```text
//! expr       := or_expr
//! or_expr    := and_expr ( "||" and_expr )*
//! and_expr   := cmp_expr ( "&&" cmp_expr )*
//! cmp_expr   := sum ( ("==" | "!=" | ">" | ">=" | "<" | "<=") sum )?
//! sum        := term ( ("+" | "-") term )*
//! term       := unary ( ("*" | "/") unary )*
//! unary      := ("-" | "!")? primary
//! primary    := number
//!             | ident "(" expr ("," expr)* ")"       // reducer call
//!             | ident "." ident ("[" number "]")?     // attr / buffer
//!             | "(" expr ")"
//! ```

use crate::error::GoalkeeperError;
use std::fmt;

/// Anything that can resolve an `entity.attribute` or
/// `entity.attribute[n]` reference while a condition expression
/// evaluates. The core crate implements this over a scenario's entity
/// map; tests can implement it over a plain `HashMap`.
pub trait ExprContext {
    fn attr(&self, entity: &str, attr: &str) -> Option<f64>;
    /// `Err` only for a buffer reference naming an attribute that was
    /// never declared on the entity (SPEC_FULL.md §C.5); an unwarmed
    /// or never-enabled buffer is `Ok` with the zero-sentinel read.
    fn buffer(&self, entity: &str, attr: &str, n: usize) -> Result<Vec<f64>, GoalkeeperError>;
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Op(String),
    Eof,
}

fn lex(src: &str) -> Result<Vec<Token>, GoalkeeperError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c.to_string()));
                i += 1;
            }
            '>' | '<' | '=' | '!' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    tokens.push(Token::Op(format!("{c}=")));
                    i += 2;
                } else {
                    tokens.push(Token::Op(c.to_string()));
                    i += 1;
                }
            }
            '&' if i + 1 < chars.len() && chars[i + 1] == '&' => {
                tokens.push(Token::Op("&&".to_string()));
                i += 2;
            }
            '|' if i + 1 < chars.len() && chars[i + 1] == '|' => {
                tokens.push(Token::Op("||".to_string()));
                i += 2;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| GoalkeeperError::Expression(format!("bad number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(GoalkeeperError::Expression(format!("unexpected character '{other}'"))),
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Attr { entity: String, attr: String },
    Buffer { entity: String, attr: String, n: usize },
    Call { name: String, args: Vec<Expr> },
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Bin { op: String, lhs: Box<Expr>, rhs: Box<Expr> },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn next(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        self.pos += 1;
        t
    }

    fn expect(&mut self, t: &Token) -> Result<(), GoalkeeperError> {
        if self.peek() == t {
            self.pos += 1;
            Ok(())
        } else {
            Err(GoalkeeperError::Expression(format!("expected {t:?}, found {:?}", self.peek())))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, GoalkeeperError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, GoalkeeperError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Token::Op(op) if op == "||") {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Bin { op: "||".to_string(), lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, GoalkeeperError> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Token::Op(op) if op == "&&") {
            self.next();
            let rhs = self.parse_cmp()?;
            lhs = Expr::Bin { op: "&&".to_string(), lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr, GoalkeeperError> {
        let lhs = self.parse_sum()?;
        if let Token::Op(op) = self.peek().clone() {
            if ["==", "!=", ">", ">=", "<", "<="].contains(&op.as_str()) {
                self.next();
                let rhs = self.parse_sum()?;
                return Ok(Expr::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
            }
        }
        Ok(lhs)
    }

    fn parse_sum(&mut self) -> Result<Expr, GoalkeeperError> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek().clone() {
                Token::Op(op) if op == "+" || op == "-" => {
                    self.next();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, GoalkeeperError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek().clone() {
                Token::Op(op) if op == "*" || op == "/" => {
                    self.next();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, GoalkeeperError> {
        match self.peek().clone() {
            Token::Op(op) if op == "-" => {
                self.next();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Token::Op(op) if op == "!" => {
                self.next();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, GoalkeeperError> {
        match self.next() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::LParen => {
                let e = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    self.next();
                    let mut args = Vec::new();
                    if *self.peek() != Token::RParen {
                        args.push(self.parse_expr()?);
                        while *self.peek() == Token::Comma {
                            self.next();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Call { name, args })
                } else {
                    self.expect(&Token::Dot)?;
                    let attr = match self.next() {
                        Token::Ident(a) => a,
                        other => return Err(GoalkeeperError::Expression(format!("expected attribute name, found {other:?}"))),
                    };
                    if *self.peek() == Token::LBracket {
                        self.next();
                        let n = match self.next() {
                            Token::Number(n) => n as usize,
                            other => return Err(GoalkeeperError::Expression(format!("expected buffer size, found {other:?}"))),
                        };
                        self.expect(&Token::RBracket)?;
                        Ok(Expr::Buffer { entity: name, attr, n })
                    } else {
                        Ok(Expr::Attr { entity: name, attr })
                    }
                }
            }
            other => Err(GoalkeeperError::Expression(format!("unexpected token {other:?}"))),
        }
    }
}

/// A parsed, re-evaluable condition expression.
#[derive(Debug, Clone)]
pub struct ConditionExpr {
    root: Expr,
    source: String,
}

impl fmt::Display for ConditionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// The result of evaluating a subexpression: either a scalar or a
/// reducer's vector input, collapsing to a scalar before any binary
/// operator is applied.
enum Value {
    Number(f64),
    Vector(Vec<f64>),
}

impl Value {
    fn as_number(&self) -> Result<f64, GoalkeeperError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Vector(_) => Err(GoalkeeperError::Expression("a buffer value must be reduced before use".to_string())),
        }
    }
}

impl ConditionExpr {
    pub fn parse(source: &str) -> Result<Self, GoalkeeperError> {
        let tokens = lex(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_expr()?;
        if *parser.peek() != Token::Eof {
            return Err(GoalkeeperError::Expression(format!("trailing input after expression: {:?}", parser.peek())));
        }
        Ok(Self { root, source: source.to_string() })
    }

    /// Evaluate against `ctx`. A `None` attribute (uninitialised entity
    /// state) is a "not satisfied this tick" result, not an error
    /// (spec §4.3, §7), surfaced here as `Ok(false)`.
    pub fn eval(&self, ctx: &dyn ExprContext) -> Result<bool, GoalkeeperError> {
        match eval_node(&self.root, ctx) {
            Ok(Value::Number(n)) => Ok(n != 0.0),
            Ok(Value::Vector(_)) => Err(GoalkeeperError::Expression("expression evaluated to a bare buffer, expected a boolean".to_string())),
            Err(EvalOutcome::Uninitialized) => Ok(false),
            Err(EvalOutcome::Error(e)) => Err(e),
        }
    }
}

enum EvalOutcome {
    Uninitialized,
    Error(GoalkeeperError),
}

impl From<GoalkeeperError> for EvalOutcome {
    fn from(e: GoalkeeperError) -> Self {
        EvalOutcome::Error(e)
    }
}

fn eval_node(expr: &Expr, ctx: &dyn ExprContext) -> Result<Value, EvalOutcome> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Attr { entity, attr } => match ctx.attr(entity, attr) {
            Some(n) => Ok(Value::Number(n)),
            None => Err(EvalOutcome::Uninitialized),
        },
        Expr::Buffer { entity, attr, n } => {
            let values = ctx.buffer(entity, attr, *n).map_err(EvalOutcome::from)?;
            Ok(Value::Vector(values))
        }
        Expr::Neg(inner) => Ok(Value::Number(-eval_node(inner, ctx)?.as_number().map_err(EvalOutcome::from)?)),
        Expr::Not(inner) => {
            let b = eval_node(inner, ctx)?.as_number().map_err(EvalOutcome::from)?;
            Ok(Value::Number(if b == 0.0 { 1.0 } else { 0.0 }))
        }
        Expr::Call { name, args } => eval_call(name, args, ctx),
        Expr::Bin { op, lhs, rhs } => {
            let l = eval_node(lhs, ctx)?.as_number().map_err(EvalOutcome::from)?;
            let r = eval_node(rhs, ctx)?.as_number().map_err(EvalOutcome::from)?;
            let result = match op.as_str() {
                "+" => l + r,
                "-" => l - r,
                "*" => l * r,
                "/" => l / r,
                ">" => bool_to_f(l > r),
                ">=" => bool_to_f(l >= r),
                "<" => bool_to_f(l < r),
                "<=" => bool_to_f(l <= r),
                "==" => bool_to_f((l - r).abs() < f64::EPSILON),
                "!=" => bool_to_f((l - r).abs() >= f64::EPSILON),
                "&&" => bool_to_f(l != 0.0 && r != 0.0),
                "||" => bool_to_f(l != 0.0 || r != 0.0),
                other => return Err(EvalOutcome::Error(GoalkeeperError::Expression(format!("unknown operator '{other}'")))),
            };
            Ok(Value::Number(result))
        }
    }
}

fn bool_to_f(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn eval_call(name: &str, args: &[Expr], ctx: &dyn ExprContext) -> Result<Value, EvalOutcome> {
    if name == "abs" {
        if args.len() != 1 {
            return Err(EvalOutcome::Error(GoalkeeperError::Expression("abs() takes exactly one argument".to_string())));
        }
        let n = eval_node(&args[0], ctx)?.as_number().map_err(EvalOutcome::from)?;
        return Ok(Value::Number(n.abs()));
    }

    if args.len() != 1 {
        return Err(EvalOutcome::Error(GoalkeeperError::Expression(format!("{name}() takes exactly one buffer argument"))));
    }
    let vec = match eval_node(&args[0], ctx)? {
        Value::Vector(v) => v,
        Value::Number(n) => vec![n],
    };

    let result = match name {
        "mean" => mean(&vec),
        "min" => vec.iter().cloned().fold(f64::INFINITY, f64::min),
        "max" => vec.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        "var" => variance(&vec),
        "std" => variance(&vec).sqrt(),
        other => return Err(EvalOutcome::Error(GoalkeeperError::Expression(format!("unknown reducer '{other}'")))),
    };
    Ok(Value::Number(result))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapContext {
        attrs: HashMap<(String, String), f64>,
        buffers: HashMap<(String, String), Vec<f64>>,
    }

    impl ExprContext for MapContext {
        fn attr(&self, entity: &str, attr: &str) -> Option<f64> {
            self.attrs.get(&(entity.to_string(), attr.to_string())).copied()
        }

        fn buffer(&self, entity: &str, attr: &str, n: usize) -> Result<Vec<f64>, GoalkeeperError> {
            Ok(self.buffers.get(&(entity.to_string(), attr.to_string())).cloned().unwrap_or_else(|| vec![0.0; n]))
        }
    }

    fn ctx_with(attr: f64) -> MapContext {
        let mut attrs = HashMap::new();
        attrs.insert(("front_sonar".to_string(), "range".to_string()), attr);
        MapContext { attrs, buffers: HashMap::new() }
    }

    #[test]
    fn simple_comparison() {
        let expr = ConditionExpr::parse("front_sonar.range > 5").unwrap();
        assert!(!expr.eval(&ctx_with(3.0)).unwrap());
        assert!(expr.eval(&ctx_with(7.0)).unwrap());
    }

    #[test]
    fn logical_combination() {
        let expr = ConditionExpr::parse("front_sonar.range > 5 && front_sonar.range < 10").unwrap();
        assert!(expr.eval(&ctx_with(7.0)).unwrap());
        assert!(!expr.eval(&ctx_with(11.0)).unwrap());
    }

    #[test]
    fn uninitialized_attribute_is_not_satisfied() {
        let ctx = MapContext { attrs: HashMap::new(), buffers: HashMap::new() };
        let expr = ConditionExpr::parse("front_sonar.range > 5").unwrap();
        assert!(!expr.eval(&ctx).unwrap());
    }

    #[test]
    fn reducer_over_buffer() {
        let mut buffers = HashMap::new();
        buffers.insert(("front_sonar".to_string(), "range".to_string()), vec![2.0, 4.0, 6.0]);
        let ctx = MapContext { attrs: HashMap::new(), buffers };
        let expr = ConditionExpr::parse("mean(front_sonar.range[3]) > 3").unwrap();
        assert!(expr.eval(&ctx).unwrap());
    }

    #[test]
    fn abs_and_arithmetic() {
        let expr = ConditionExpr::parse("abs(front_sonar.range - 10) <= 3").unwrap();
        assert!(expr.eval(&ctx_with(8.0)).unwrap());
        assert!(!expr.eval(&ctx_with(3.0)).unwrap());
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(ConditionExpr::parse("1 + 1 )").is_err());
    }
}

//! Cost-expression grammar: a unified AST that both the infix parser and the
//! prefix s-expression parser produce, plus the printer that makes the two
//! round-trip through each other.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CostParseError {
    #[error("unexpected end of cost expression")]
    UnexpectedEof,
    #[error("unexpected token \"{0}\" in cost expression")]
    UnexpectedToken(String),
    #[error("unbalanced parentheses in cost expression")]
    UnbalancedParens,
    #[error("empty cost expression")]
    Empty,
}

pub type ParseResult<T> = Result<T, CostParseError>;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    And,
    Or,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    /// Ascending precedence level, matching the grammar's own ordering:
    /// sentinel < `==` < comparisons < `-,+` < `/,*` < `||` < `&&`. Unary
    /// `abs`/`!` bind tighter than any binary operator and are handled
    /// outside this table.
    fn precedence(self) -> u8 {
        match self {
            BinOp::Eq => 1,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 2,
            BinOp::Sub | BinOp::Add => 3,
            BinOp::Div | BinOp::Mul => 4,
            BinOp::Or => 5,
            BinOp::And => 6,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CostExpr {
    Const(f64),
    Var(String),
    Bin(BinOp, Box<CostExpr>, Box<CostExpr>),
    Abs(Box<CostExpr>),
    Not(Box<CostExpr>),
}

impl CostExpr {
    pub fn bin(op: BinOp, l: CostExpr, r: CostExpr) -> CostExpr {
        CostExpr::Bin(op, Box::new(l), Box::new(r))
    }
}

impl fmt::Display for CostExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostExpr::Const(c) => {
                if c.fract() == 0.0 {
                    write!(f, "{}", *c as i64)
                } else {
                    write!(f, "{c}")
                }
            }
            CostExpr::Var(name) => write!(f, "{name}"),
            CostExpr::Bin(op, l, r) => write!(f, "({l} {} {r})", op.symbol()),
            CostExpr::Abs(e) => write!(f, "abs({e})"),
            CostExpr::Not(e) => write!(f, "!({e})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Abs,
}

fn tokenize(input: &str) -> ParseResult<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut i = 0;
    let mut tokens = Vec::new();
    const OPS: &[&str] = &["&&", "||", "==", ">=", "<=", "+", "-", "*", "/", ">", "<", "!"];
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                i += 1;
            }
            if i < bytes.len() && bytes[i] as char == '.' {
                i += 1;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
            }
            let text = &input[start..i];
            let value: f64 = text.parse().map_err(|_| CostParseError::UnexpectedToken(text.to_string()))?;
            tokens.push(Token::Num(value));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] as char == '_') {
                i += 1;
            }
            let text = &input[start..i];
            if text == "abs" {
                tokens.push(Token::Abs);
            } else {
                tokens.push(Token::Ident(text.to_string()));
            }
            continue;
        }
        let rest = &input[i..];
        let matched = OPS.iter().find(|op| rest.starts_with(*op));
        match matched {
            Some(op) => {
                tokens.push(Token::Op(op));
                i += op.len();
            }
            None => return Err(CostParseError::UnexpectedToken(c.to_string())),
        }
    }
    Ok(tokens)
}

fn binop_of(sym: &str) -> Option<BinOp> {
    Some(match sym {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "==" | "=" => BinOp::Eq,
        "&&" => BinOp::And,
        "||" => BinOp::Or,
        _ => return None,
    })
}

struct InfixParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl InfixParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self, min_prec: u8) -> ParseResult<CostExpr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(sym)) => binop_of(sym),
                _ => None,
            };
            let Some(op) = op else { break };
            if op.precedence() < min_prec {
                break;
            }
            self.next();
            let rhs = self.parse_expr(op.precedence() + 1)?;
            lhs = CostExpr::bin(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<CostExpr> {
        match self.peek() {
            Some(Token::Op("!")) => {
                self.next();
                Ok(CostExpr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Abs) => {
                self.next();
                self.expect(Token::LParen)?;
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                Ok(CostExpr::Abs(Box::new(inner)))
            }
            Some(Token::Op("-")) => {
                self.next();
                let inner = self.parse_unary()?;
                Ok(CostExpr::bin(BinOp::Sub, CostExpr::Const(0.0), inner))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> ParseResult<CostExpr> {
        match self.next() {
            Some(Token::Num(v)) => Ok(CostExpr::Const(v)),
            Some(Token::Ident(name)) => Ok(CostExpr::Var(name)),
            Some(Token::LParen) => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(other) => Err(CostParseError::UnexpectedToken(format!("{other:?}"))),
            None => Err(CostParseError::UnexpectedEof),
        }
    }

    fn expect(&mut self, want: Token) -> ParseResult<()> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            Some(t) => Err(CostParseError::UnexpectedToken(format!("{t:?}"))),
            None => Err(CostParseError::UnbalancedParens),
        }
    }
}

/// Parses the infix grammar: `+ - * / abs < <= > >= = == && || !` with
/// standard left-associative precedence climbing.
pub fn parse_infix(input: &str) -> ParseResult<CostExpr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CostParseError::Empty);
    }
    let tokens = tokenize(trimmed)?;
    let mut parser = InfixParser { tokens, pos: 0 };
    let expr = parser.parse_expr(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(CostParseError::UnexpectedToken(format!("{:?}", parser.tokens[parser.pos])));
    }
    Ok(expr)
}

/// Parses the pre-order s-expression grammar, e.g. `(+ a b)`, `(abs x)`,
/// `(! e)`, accepted for round-tripping the printer's output.
pub fn parse_prefix(input: &str) -> ParseResult<CostExpr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CostParseError::Empty);
    }
    let tokens = tokenize(trimmed)?;
    let mut pos = 0;
    let expr = parse_prefix_tokens(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(CostParseError::UnexpectedToken(format!("{:?}", tokens[pos])));
    }
    Ok(expr)
}

fn parse_prefix_tokens(tokens: &[Token], pos: &mut usize) -> ParseResult<CostExpr> {
    match tokens.get(*pos) {
        Some(Token::Num(v)) => {
            *pos += 1;
            Ok(CostExpr::Const(*v))
        }
        Some(Token::Ident(name)) => {
            *pos += 1;
            Ok(CostExpr::Var(name.clone()))
        }
        Some(Token::LParen) => {
            *pos += 1;
            let head = tokens.get(*pos).ok_or(CostParseError::UnexpectedEof)?.clone();
            *pos += 1;
            let expr = match head {
                Token::Abs => {
                    let inner = parse_prefix_tokens(tokens, pos)?;
                    CostExpr::Abs(Box::new(inner))
                }
                Token::Op("!") => {
                    let inner = parse_prefix_tokens(tokens, pos)?;
                    CostExpr::Not(Box::new(inner))
                }
                Token::Op(sym) => {
                    let op = binop_of(sym).ok_or_else(|| CostParseError::UnexpectedToken(sym.to_string()))?;
                    let l = parse_prefix_tokens(tokens, pos)?;
                    let r = parse_prefix_tokens(tokens, pos)?;
                    CostExpr::bin(op, l, r)
                }
                other => return Err(CostParseError::UnexpectedToken(format!("{other:?}"))),
            };
            match tokens.get(*pos) {
                Some(Token::RParen) => *pos += 1,
                _ => return Err(CostParseError::UnbalancedParens),
            }
            Ok(expr)
        }
        Some(other) => Err(CostParseError::UnexpectedToken(format!("{other:?}"))),
        None => Err(CostParseError::UnexpectedEof),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infix_respects_operator_precedence() {
        let e = parse_infix("a + b * c").unwrap();
        assert_eq!(e, CostExpr::bin(BinOp::Add, CostExpr::Var("a".into()), CostExpr::bin(BinOp::Mul, CostExpr::Var("b".into()), CostExpr::Var("c".into()))));
    }

    #[test]
    fn abs_parses_as_unary_function() {
        let e = parse_infix("abs(x - 3)").unwrap();
        assert_eq!(e, CostExpr::Abs(Box::new(CostExpr::bin(BinOp::Sub, CostExpr::Var("x".into()), CostExpr::Const(3.0)))));
    }

    #[test]
    fn prefix_sexpr_round_trips_through_infix_printer() {
        let e = parse_prefix("(+ a (* b c))").unwrap();
        let printed = e.to_string();
        let reparsed = parse_infix(&printed).unwrap();
        assert_eq!(e, reparsed);
    }

    #[test]
    fn printer_parser_round_trip_is_stable() {
        for src in ["a + b", "abs(x - 3)", "a == b && c < d", "!(a || b)"] {
            let e = parse_infix(src).unwrap();
            let printed = e.to_string();
            let reparsed = parse_infix(&printed).unwrap();
            assert_eq!(e, reparsed, "round-trip failed for {src}");
        }
    }

    #[test]
    fn empty_expression_is_an_explicit_error() {
        assert_eq!(parse_infix(""), Err(CostParseError::Empty));
    }
}

use regex::Regex;

use super::ast::{BinOp, Expr, FuncKind, Literal, MethodKind, Type, VarRef};
use super::lexer::{tokenize, Token};
use crate::{Error, Result};

/// Parse and type-check one expression. The result must be boolean-typed.
pub fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::Compile(format!(
            "trailing tokens after expression in '{}'",
            source
        )));
    }
    let ty = check(&expr)?;
    if !matches!(ty, Type::Bool | Type::Dyn) {
        return Err(Error::Compile(format!(
            "expression must evaluate to bool, got {}: '{}'",
            ty, source
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<()> {
        match self.next() {
            Some(token) if token == *expected => Ok(()),
            other => Err(Error::Compile(format!(
                "expected {}, found {:?}",
                what, other
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::OrOr)) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison()?;
        while matches!(self.peek(), Some(Token::AndAnd)) {
            self.next();
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::NotEq) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::In) => BinOp::In,
            _ => return Ok(left),
        };
        self.next();
        let right = self.parse_unary()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Some(Token::Bang)) {
            self.next();
            let operand = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;

        while matches!(self.peek(), Some(Token::Dot)) {
            self.next();
            let name = match self.next() {
                Some(Token::Ident(name)) => name,
                other => {
                    return Err(Error::Compile(format!(
                        "expected method or field name after '.', found {:?}",
                        other
                    )))
                }
            };

            if matches!(self.peek(), Some(Token::LParen)) {
                let method = MethodKind::resolve(&name).ok_or_else(|| {
                    Error::Compile(format!("unknown method '.{}'", name))
                })?;
                self.next();
                let args = self.parse_args()?;
                expr = build_method(expr, method, args)?;
            } else {
                return Err(Error::Compile(format!(
                    "unknown field '.{}' (variable paths have two segments)",
                    name
                )));
            }
        }

        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => {
                    return Err(Error::Compile(format!(
                        "expected ',' or ')' in argument list, found {:?}",
                        other
                    )))
                }
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Str(value)) => Ok(Expr::Literal(Literal::Str(value))),
            Some(Token::Int(value)) => Ok(Expr::Literal(Literal::Int(value))),
            Some(Token::Float(value)) => Ok(Expr::Literal(Literal::Float(value))),
            Some(Token::True) => Ok(Expr::Literal(Literal::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Literal::Bool(false))),
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if matches!(self.peek(), Some(Token::RBracket)) {
                    self.next();
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_or()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        other => {
                            return Err(Error::Compile(format!(
                                "expected ',' or ']' in list, found {:?}",
                                other
                            )))
                        }
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) => {
                // Function call: size(x), double(x), int(x)
                if matches!(self.peek(), Some(Token::LParen)) {
                    let func = FuncKind::resolve(&name).ok_or_else(|| {
                        Error::Compile(format!("unknown function '{}'", name))
                    })?;
                    self.next();
                    let args = self.parse_args()?;
                    if args.len() != 1 {
                        return Err(Error::Compile(format!(
                            "{}() takes exactly one argument",
                            name
                        )));
                    }
                    return Ok(Expr::Call { func, args });
                }

                // Schema variable: root.field
                self.expect(&Token::Dot, &format!("'.' after '{}'", name))?;
                let field = match self.next() {
                    Some(Token::Ident(field)) => field,
                    other => {
                        return Err(Error::Compile(format!(
                            "expected field after '{}.', found {:?}",
                            name, other
                        )))
                    }
                };
                VarRef::resolve(&name, &field)
                    .map(Expr::Var)
                    .ok_or_else(|| {
                        Error::Compile(format!("unknown variable '{}.{}'", name, field))
                    })
            }
            other => Err(Error::Compile(format!(
                "unexpected token {:?} in expression",
                other
            ))),
        }
    }
}

fn build_method(receiver: Expr, method: MethodKind, args: Vec<Expr>) -> Result<Expr> {
    let expected_args = match method {
        MethodKind::Get => 2,
        _ => 1,
    };
    if args.len() != expected_args {
        return Err(Error::Compile(format!(
            "method takes {} argument(s), got {}",
            expected_args,
            args.len()
        )));
    }

    // Literal regex patterns compile once, at load.
    if method == MethodKind::Matches
        && let Expr::Literal(Literal::Str(pattern)) = &args[0]
    {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Compile(format!("bad regex '{}': {}", pattern, e)))?;
        return Ok(Expr::MatchesLit {
            receiver: Box::new(receiver),
            regex,
        });
    }

    Ok(Expr::Method {
        receiver: Box::new(receiver),
        method,
        args,
    })
}

/// Static type check. Returns the expression's type.
pub fn check(expr: &Expr) -> Result<Type> {
    match expr {
        Expr::Literal(Literal::Str(_)) => Ok(Type::Str),
        Expr::Literal(Literal::Int(_)) => Ok(Type::Int),
        Expr::Literal(Literal::Float(_)) => Ok(Type::Double),
        Expr::Literal(Literal::Bool(_)) => Ok(Type::Bool),
        Expr::Var(var) => Ok(var.ty()),
        Expr::List(items) => {
            for item in items {
                check(item)?;
            }
            Ok(Type::List)
        }
        Expr::Not(operand) => {
            let ty = check(operand)?;
            if !Type::Bool.accepts(ty) {
                return Err(Error::Compile(format!("'!' needs bool, got {}", ty)));
            }
            Ok(Type::Bool)
        }
        Expr::Binary { op, left, right } => {
            let lt = check(left)?;
            let rt = check(right)?;
            match op {
                BinOp::And | BinOp::Or => {
                    if !Type::Bool.accepts(lt) || !Type::Bool.accepts(rt) {
                        return Err(Error::Compile(format!(
                            "logical operator needs bool operands, got {} and {}",
                            lt, rt
                        )));
                    }
                }
                BinOp::Eq | BinOp::Ne => {
                    if !lt.accepts(rt) {
                        return Err(Error::Compile(format!(
                            "cannot compare {} with {}",
                            lt, rt
                        )));
                    }
                }
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    let ordered = (lt.is_numeric() && rt.is_numeric())
                        || (lt == Type::Str && rt == Type::Str)
                        || lt == Type::Dyn
                        || rt == Type::Dyn;
                    if !ordered {
                        return Err(Error::Compile(format!(
                            "cannot order {} against {}",
                            lt, rt
                        )));
                    }
                }
                BinOp::In => {
                    if !matches!(rt, Type::List | Type::Map | Type::Dyn) {
                        return Err(Error::Compile(format!(
                            "'in' needs a list or map on the right, got {}",
                            rt
                        )));
                    }
                }
            }
            Ok(Type::Bool)
        }
        Expr::Method {
            receiver,
            method,
            args,
        } => {
            let rt = check(receiver)?;
            match method {
                MethodKind::Contains | MethodKind::StartsWith | MethodKind::EndsWith
                | MethodKind::Matches => {
                    if !Type::Str.accepts(rt) {
                        return Err(Error::Compile(format!(
                            "string method on non-string receiver ({})",
                            rt
                        )));
                    }
                    let at = check(&args[0])?;
                    if !Type::Str.accepts(at) {
                        return Err(Error::Compile(format!(
                            "string method needs a string argument, got {}",
                            at
                        )));
                    }
                    Ok(Type::Bool)
                }
                MethodKind::Has => {
                    if !Type::Map.accepts(rt) {
                        return Err(Error::Compile(format!(
                            "has() needs a map receiver, got {}",
                            rt
                        )));
                    }
                    let at = check(&args[0])?;
                    if !Type::Str.accepts(at) {
                        return Err(Error::Compile("has() key must be a string".into()));
                    }
                    Ok(Type::Bool)
                }
                MethodKind::Get => {
                    if !Type::Map.accepts(rt) {
                        return Err(Error::Compile(format!(
                            "get() needs a map receiver, got {}",
                            rt
                        )));
                    }
                    let at = check(&args[0])?;
                    if !Type::Str.accepts(at) {
                        return Err(Error::Compile("get() key must be a string".into()));
                    }
                    check(&args[1])?;
                    Ok(Type::Dyn)
                }
            }
        }
        Expr::MatchesLit { receiver, .. } => {
            let rt = check(receiver)?;
            if !Type::Str.accepts(rt) {
                return Err(Error::Compile(format!(
                    "matches() on non-string receiver ({})",
                    rt
                )));
            }
            Ok(Type::Bool)
        }
        Expr::Call { func, args } => {
            let at = check(&args[0])?;
            match func {
                FuncKind::Size => {
                    if !matches!(at, Type::Str | Type::List | Type::Map | Type::Dyn) {
                        return Err(Error::Compile(format!("size() cannot measure {}", at)));
                    }
                    Ok(Type::Int)
                }
                FuncKind::Double => {
                    if !matches!(at, Type::Int | Type::Double | Type::Str | Type::Dyn) {
                        return Err(Error::Compile(format!("double() cannot convert {}", at)));
                    }
                    Ok(Type::Double)
                }
                FuncKind::Int => {
                    if !matches!(at, Type::Int | Type::Double | Type::Str | Type::Dyn) {
                        return Err(Error::Compile(format!("int() cannot convert {}", at)));
                    }
                    Ok(Type::Int)
                }
            }
        }
    }
}

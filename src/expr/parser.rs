use crate::expr::lexer::{tokenize, Spanned, Token};
use crate::expr::{BinaryOp, CompileError, Expr, Field, Func, UnaryOp, Var};
use num_complex::Complex64;

const PREFIX_BP: u8 = 6;
/// Bound on nesting plus operator chaining, so later tree walks stay shallow.
pub const MAX_DEPTH: usize = 256;

pub fn parse(src: &str, field: Field) -> Result<Expr, CompileError> {
    let tokens = tokenize(src, field)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        field,
        end: src.len(),
        depth: 0,
    };
    if parser.tokens.is_empty() {
        return Err(parser.error(0, "empty expression"));
    }
    let expr = parser.expr(0)?;
    if let Some(tok) = parser.tokens.get(parser.pos) {
        let at = tok.start;
        return Err(parser.error(at, "unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    field: Field,
    end: usize,
    depth: usize,
}

impl Parser {
    fn error(&self, pos: usize, message: impl Into<String>) -> CompileError {
        CompileError::Syntax {
            field: self.field,
            pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn here(&self) -> usize {
        self.tokens.get(self.pos).map(|t| t.start).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Spanned> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Token, what: &str) -> Result<(), CompileError> {
        let at = self.here();
        match self.next() {
            Some(tok) if tok.token == want => Ok(()),
            _ => Err(self.error(at, format!("expected {what}"))),
        }
    }

    fn descend(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(self.here(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn expr(&mut self, min_bp: u8) -> Result<Expr, CompileError> {
        let base = self.depth;
        self.descend()?;
        let mut lhs = self.prefix()?;
        loop {
            let Some((op, l_bp, r_bp)) = self.peek().and_then(infix_binding) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.pos += 1;
            // Each fold deepens the left spine.
            self.descend()?;
            let rhs = self.expr(r_bp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, CompileError> {
        let at = self.here();
        let Some(tok) = self.next() else {
            return Err(self.error(at, "unexpected end of expression"));
        };
        match tok.token {
            Token::Number(v) => Ok(Expr::Num(Complex64::new(v, 0.0))),
            Token::Imaginary(v) => Ok(Expr::Num(Complex64::new(0.0, v))),
            Token::Minus => {
                let inner = self.expr(PREFIX_BP)?;
                Ok(match inner {
                    Expr::Num(v) => Expr::Num(-v),
                    other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
                })
            }
            Token::Plus => self.expr(PREFIX_BP),
            Token::Bang => {
                let inner = self.expr(PREFIX_BP)?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)))
            }
            Token::LParen => {
                let inner = self.expr(0)?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => self.identifier(name),
            _ => Err(self.error(tok.start, "expected a value")),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Expr, CompileError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                return self.call(name);
            }
            Some(Token::LBracket) if name == "slot" => {
                self.pos += 1;
                let idx_at = self.here();
                let idx = match self.next().map(|t| t.token) {
                    Some(Token::Number(v)) if v >= 0.0 && v.fract() == 0.0 => v as usize,
                    _ => return Err(self.error(idx_at, "slot index must be a non-negative integer")),
                };
                self.expect(Token::RBracket, "']'")?;
                return Ok(Expr::Slot(idx));
            }
            _ => {}
        }
        match name.as_str() {
            "i" => Ok(Expr::Num(Complex64::new(0.0, 1.0))),
            "pi" => Ok(Expr::Num(Complex64::new(std::f64::consts::PI, 0.0))),
            _ => match Var::from_name(&name) {
                Some(var) => Ok(Expr::Var(var)),
                None => Err(CompileError::UnknownIdentifier {
                    field: self.field,
                    name,
                }),
            },
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, CompileError> {
        let Some(func) = Func::from_name(&name) else {
            return Err(CompileError::UnknownFunction {
                field: self.field,
                name,
            });
        };
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.expr(0)?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen, "')' after arguments")?;
        if args.len() != func.arity() {
            return Err(CompileError::Arity {
                field: self.field,
                name,
                expected: func.arity(),
                found: args.len(),
            });
        }
        Ok(Expr::Call(func, args))
    }
}

fn infix_binding(tok: &Token) -> Option<(BinaryOp, u8, u8)> {
    let (op, bp) = match tok {
        Token::OrOr => (BinaryOp::Or, 1),
        Token::AndAnd => (BinaryOp::And, 2),
        Token::Lt => (BinaryOp::Lt, 3),
        Token::Gt => (BinaryOp::Gt, 3),
        Token::Le => (BinaryOp::Le, 3),
        Token::Ge => (BinaryOp::Ge, 3),
        Token::EqEq => (BinaryOp::Eq, 3),
        Token::NotEq => (BinaryOp::Ne, 3),
        Token::Plus => (BinaryOp::Add, 4),
        Token::Minus => (BinaryOp::Sub, 4),
        Token::Star => (BinaryOp::Mul, 5),
        Token::Slash => (BinaryOp::Div, 5),
        // Right associative and tighter than unary minus: -z^2 == -(z^2).
        Token::Caret => return Some((BinaryOp::Pow, 7, 7)),
        _ => return None,
    };
    Some((op, bp, bp + 1))
}

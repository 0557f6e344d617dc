use ai_core::Value;

use crate::ast::{BinaryOp, Expr, LogicalOp, PathBase, Segment, SegmentKind, UnaryOp};
use crate::error::{ExprError, Result};
use crate::functions;
use crate::lexer::{tokenize, Spanned, Token};

/// Parse an expression body (without the `${ }` wrapper).
pub(crate) fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };
    if parser.tokens.is_empty() {
        return Err(parser.error(0, "empty expression"));
    }
    let expr = parser.ternary()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(parser.error(extra.offset, "unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, position: usize, message: &str) -> ExprError {
        ExprError::Syntax {
            expression: self.source.to_string(),
            position,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.offset)
            .unwrap_or(self.source.len())
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(self.offset(), &format!("expected {what}")))
        }
    }

    fn ternary(&mut self) -> Result<Expr> {
        let condition = self.coalesce()?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }
        let then = self.ternary()?;
        self.expect(&Token::Colon, "`:` in conditional expression")?;
        let otherwise = self.ternary()?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn coalesce(&mut self) -> Result<Expr> {
        let mut left = self.or()?;
        while self.eat(&Token::Coalesce) {
            let right = self.or()?;
            left = Expr::Coalesce {
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        while self.eat(&Token::And) {
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr>,
        ops: &[(Token, BinaryOp)],
    ) -> Result<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.eat(token) {
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary_level(
            Self::comparison,
            &[(Token::Eq, BinaryOp::Eq), (Token::Ne, BinaryOp::Ne)],
        )
    }

    fn comparison(&mut self) -> Result<Expr> {
        self.binary_level(
            Self::additive,
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::Le, BinaryOp::Le),
                (Token::Gt, BinaryOp::Gt),
                (Token::Ge, BinaryOp::Ge),
                (Token::In, BinaryOp::In),
            ],
        )
    }

    fn additive(&mut self) -> Result<Expr> {
        self.binary_level(
            Self::multiplicative,
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        self.binary_level(
            Self::unary,
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Bang | Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        // Fold `-<number>` so negative literals stay literals.
        if let (UnaryOp::Neg, Expr::Literal(Value::Number(n))) = (op, &operand) {
            return Ok(Expr::Literal(Value::Number(-n)));
        }
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr> {
        let primary = self.primary()?;
        let mut segments = Vec::new();
        loop {
            let null_safe = match self.peek() {
                Some(Token::Dot) => false,
                Some(Token::QuestionDot) => true,
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.ternary()?;
                    self.expect(&Token::RBracket, "`]`")?;
                    segments.push(Segment {
                        kind: SegmentKind::Index(Box::new(index)),
                        null_safe: false,
                    });
                    continue;
                }
                _ => break,
            };
            self.pos += 1;
            let offset = self.offset();
            let kind = match self.advance() {
                Some(Token::Ident(name)) => SegmentKind::Field(name),
                Some(Token::Number(n)) if n.fract() == 0.0 && n >= 0.0 => {
                    SegmentKind::Field((n as u64).to_string())
                }
                // Keywords are valid member names (`a.in`, `x.null`).
                Some(Token::True) => SegmentKind::Field("true".into()),
                Some(Token::False) => SegmentKind::Field("false".into()),
                Some(Token::Null) => SegmentKind::Field("null".into()),
                Some(Token::And) => SegmentKind::Field("and".into()),
                Some(Token::Or) => SegmentKind::Field("or".into()),
                Some(Token::Not) => SegmentKind::Field("not".into()),
                Some(Token::In) => SegmentKind::Field("in".into()),
                Some(Token::LBracket) if null_safe => {
                    let index = self.ternary()?;
                    self.expect(&Token::RBracket, "`]`")?;
                    SegmentKind::Index(Box::new(index))
                }
                _ => return Err(self.error(offset, "expected member name")),
            };
            segments.push(Segment { kind, null_safe });
        }

        if segments.is_empty() {
            return Ok(primary);
        }
        let base = match primary {
            Expr::Path {
                base,
                segments: mut existing,
            } if existing.is_empty() => {
                existing.append(&mut segments);
                return Ok(Expr::Path {
                    base,
                    segments: existing,
                });
            }
            other => PathBase::Expr(Box::new(other)),
        };
        Ok(Expr::Path { base, segments })
    }

    fn primary(&mut self) -> Result<Expr> {
        let offset = self.offset();
        let Some(token) = self.advance() else {
            return Err(self.error(offset, "unexpected end of expression"));
        };
        match token {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                let inner = self.ternary()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::LBracket => {
                let items = self.arguments(&Token::RBracket, "`]`")?;
                Ok(Expr::List(items))
            }
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let Some(spec) = functions::lookup(&name) else {
                        return Err(ExprError::UnknownFunction {
                            name,
                            expression: self.source.to_string(),
                        });
                    };
                    let args = self.arguments(&Token::RParen, "`)`")?;
                    spec.check_arity(args.len())?;
                    return Ok(Expr::Call {
                        function: spec.builtin,
                        args,
                    });
                }
                Ok(Expr::Path {
                    base: PathBase::Variable(name),
                    segments: Vec::new(),
                })
            }
            _ => Err(self.error(offset, "unexpected token")),
        }
    }

    /// Comma-separated expressions up to `close` (already past the opener).
    fn arguments(&mut self, close: &Token, what: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.ternary()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Token::Comma, &format!("`,` or {what}"))?;
        }
    }
}

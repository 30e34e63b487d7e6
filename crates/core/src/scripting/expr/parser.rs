//! Recursive-descent parser producing the expression AST.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! program    := block EOF
//! block      := stmt (';' stmt)* ';'?
//! stmt       := 'let' IDENT '=' expr | expr
//! expr       := or
//! or         := and ('||' and)*
//! and        := equality ('&&' equality)*
//! equality   := comparison (('==' | '!=') comparison)*
//! comparison := term (('<' | '<=' | '>' | '>=') term)*
//! term       := factor (('+' | '-') factor)*
//! factor     := unary (('*' | '/' | '%') unary)*
//! unary      := ('!' | '-') unary | postfix
//! postfix    := primary ('(' args ')' | '.' IDENT ('(' args ')')?)*
//! primary    := literal | IDENT | list | map | lambda | '(' block ')'
//! lambda     := '|' params '|' expr | '||' expr
//! ```

use std::sync::Arc;

use super::lexer::{Token, TokenKind};
use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let { name: String, value: Expr },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Identifier(String),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Lambda {
        params: Vec<String>,
        body: Arc<Expr>,
    },
    Block(Vec<Stmt>),
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
}

const BINARY_LEVELS: usize = 6;

/// The binary operator `kind` denotes at precedence `level`, if any.
fn binary_operator(level: usize, kind: &TokenKind) -> Option<BinaryOp> {
    let operator = match (level, kind) {
        (0, TokenKind::Or) => BinaryOp::Or,
        (1, TokenKind::And) => BinaryOp::And,
        (2, TokenKind::EqualEqual) => BinaryOp::Equal,
        (2, TokenKind::NotEqual) => BinaryOp::NotEqual,
        (3, TokenKind::Less) => BinaryOp::Less,
        (3, TokenKind::LessEqual) => BinaryOp::LessEqual,
        (3, TokenKind::Greater) => BinaryOp::Greater,
        (3, TokenKind::GreaterEqual) => BinaryOp::GreaterEqual,
        (4, TokenKind::Plus) => BinaryOp::Add,
        (4, TokenKind::Minus) => BinaryOp::Subtract,
        (5, TokenKind::Star) => BinaryOp::Multiply,
        (5, TokenKind::Slash) => BinaryOp::Divide,
        (5, TokenKind::Percent) => BinaryOp::Modulo,
        _ => return None,
    };
    Some(operator)
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    /// `tokens` must end with [`TokenKind::Eof`], as produced by the lexer.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    /// Parse a whole program into a single block expression.
    pub fn parse_program(mut self) -> Result<Expr, ExprError> {
        let statements = self.parse_block(&TokenKind::Eof)?;
        if statements.is_empty() {
            return Err(self.error("empty program"));
        }
        Ok(Expr::Block(statements))
    }

    fn parse_block(&mut self, terminator: &TokenKind) -> Result<Vec<Stmt>, ExprError> {
        let mut statements = Vec::new();
        while !self.check(terminator) {
            statements.push(self.parse_statement()?);
            if !self.match_token(&TokenKind::Semicolon) {
                break;
            }
        }
        if !self.check(terminator) {
            return Err(self.error(&format!("expected {terminator:?}")));
        }
        self.advance();
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ExprError> {
        if self.match_token(&TokenKind::Let) {
            let name = self.consume_identifier()?;
            self.consume(&TokenKind::Assign)?;
            let value = self.parse_expression()?;
            return Ok(Stmt::Let { name, value });
        }
        Ok(Stmt::Expr(self.parse_expression()?))
    }

    fn parse_expression(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary(0)
    }

    /// Precedence climbing; level 0 binds loosest.
    fn parse_binary(&mut self, level: usize) -> Result<Expr, ExprError> {
        if level == BINARY_LEVELS {
            return self.parse_unary();
        }

        let mut expr = self.parse_binary(level + 1)?;
        while let Some(operator) = binary_operator(level, &self.peek().kind) {
            self.advance();
            let right = self.parse_binary(level + 1)?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        let operator = if self.match_token(&TokenKind::Not) {
            UnaryOp::Not
        } else if self.match_token(&TokenKind::Minus) {
            UnaryOp::Negate
        } else {
            return self.parse_postfix();
        };
        Ok(Expr::Unary {
            operator,
            operand: Box::new(self.parse_unary()?),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.match_token(&TokenKind::LeftParen) {
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.match_token(&TokenKind::Dot) {
                let property = self.consume_identifier()?;
                if self.match_token(&TokenKind::LeftParen) {
                    let args = self.parse_arguments()?;
                    expr = Expr::MethodCall {
                        object: Box::new(expr),
                        method: property,
                        args,
                    };
                } else {
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                    };
                }
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to and including the closing `)`.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        self.parse_sequence(&TokenKind::RightParen, Self::parse_expression)
    }

    fn parse_sequence<T>(
        &mut self,
        close: &TokenKind,
        mut item: impl FnMut(&mut Self) -> Result<T, ExprError>,
    ) -> Result<Vec<T>, ExprError> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(item(self)?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(close)?;
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let token = self.advance().clone();
        let expr = match token.kind {
            TokenKind::Null => Expr::Literal(Literal::Null),
            TokenKind::True => Expr::Literal(Literal::Bool(true)),
            TokenKind::False => Expr::Literal(Literal::Bool(false)),
            TokenKind::Int(i) => Expr::Literal(Literal::Int(i)),
            TokenKind::Float(f) => Expr::Literal(Literal::Float(f)),
            TokenKind::Str(s) => Expr::Literal(Literal::Str(s)),
            TokenKind::Identifier(name) => Expr::Identifier(name),
            TokenKind::LeftBracket => {
                Expr::List(self.parse_sequence(&TokenKind::RightBracket, Self::parse_expression)?)
            }
            TokenKind::LeftBrace => {
                Expr::Map(self.parse_sequence(&TokenKind::RightBrace, Self::parse_entry)?)
            }
            TokenKind::LeftParen => Expr::Block(self.parse_block(&TokenKind::RightParen)?),
            TokenKind::Pipe => {
                let params = self.parse_sequence(&TokenKind::Pipe, Self::consume_identifier)?;
                Expr::Lambda {
                    params,
                    body: Arc::new(self.parse_expression()?),
                }
            }
            TokenKind::Or => Expr::Lambda {
                params: Vec::new(),
                body: Arc::new(self.parse_expression()?),
            },
            other => {
                return Err(ExprError::Syntax {
                    offset: token.offset,
                    message: format!("unexpected {other:?}"),
                })
            }
        };
        Ok(expr)
    }

    /// Map entry: `key: value`, where the key is an identifier or a string.
    fn parse_entry(&mut self) -> Result<(String, Expr), ExprError> {
        let key = match self.advance().kind.clone() {
            TokenKind::Identifier(key) | TokenKind::Str(key) => key,
            _ => return Err(self.error("expected map key")),
        };
        self.consume(&TokenKind::Colon)?;
        Ok((key, self.parse_expression()?))
    }

    // -- Token utilities --------------------------------------------------

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.current.min(last)]
    }

    fn advance(&mut self) -> &Token {
        let index = self.current.min(self.tokens.len().saturating_sub(1));
        if self.current < self.tokens.len() {
            self.current += 1;
        }
        &self.tokens[index]
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind) -> Result<(), ExprError> {
        if self.match_token(kind) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {kind:?}")))
        }
    }

    fn consume_identifier(&mut self) -> Result<String, ExprError> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn error(&self, message: &str) -> ExprError {
        let token = self.peek();
        ExprError::Syntax {
            offset: token.offset,
            message: format!("{message}, found {:?}", token.kind),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

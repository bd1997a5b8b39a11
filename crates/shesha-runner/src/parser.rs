//! Recursive-descent parser for the runner's mini-language.
//!
//! Grammar, one statement per line:
//!
//! ```text
//! program    := statement*
//! statement  := IDENT '=' expr NEWLINE | expr NEWLINE
//! expr       := or_expr
//! or_expr    := and_expr ('or' and_expr)*
//! and_expr   := not_expr ('and' not_expr)*
//! not_expr   := 'not' not_expr | comparison
//! comparison := additive (CMP_OP additive)?
//! additive   := term (('+'|'-') term)*
//! term       := unary (('*'|'/'|'%') unary)*
//! unary      := '-' unary | postfix
//! postfix    := primary ('(' args ')' | '[' subscript ']')*
//! primary    := INT | STRING | 'True' | 'False' | 'None' | IDENT
//!             | '(' expr ')' | '[' args ']'
//! subscript  := expr | expr? ':' expr?
//! ```
//!
//! Calls are permitted on bare names only; the language has no first-class
//! functions.

use crate::lexer::{Token, tokenize};

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { name: String, value: Expr },
    Expr(Expr),
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Expr>),
    Name(String),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        target: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Parse a whole script, or return a `SyntaxError: …` message.
pub fn parse(source: &str) -> Result<Vec<Stmt>, String> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.advance() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(format!("SyntaxError: expected '{}', found '{}'", expected, t)),
            None => Err(format!("SyntaxError: expected '{}', found end of input", expected)),
        }
    }

    fn parse_program(mut self) -> Result<Vec<Stmt>, String> {
        let mut stmts = Vec::new();
        while self.peek().is_some() {
            if self.peek() == Some(&Token::Newline) {
                self.advance();
                continue;
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt, String> {
        // Lookahead for `IDENT = …` (but not `IDENT == …`).
        if let (Some(Token::Ident(name)), Some(Token::Assign)) =
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
        {
            let name = name.clone();
            self.pos += 2;
            let value = self.parse_expr()?;
            self.expect(&Token::Newline)?;
            return Ok(Stmt::Assign { name, value });
        }
        let expr = self.parse_expr()?;
        self.expect(&Token::Newline)?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    let Expr::Name(name) = expr else {
                        return Err("SyntaxError: only named functions can be called".to_string());
                    };
                    self.advance();
                    let args = self.parse_args(&Token::RParen)?;
                    expr = Expr::Call { name, args };
                }
                Some(Token::LBracket) => {
                    self.advance();
                    expr = self.parse_subscript(expr)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_subscript(&mut self, target: Expr) -> Result<Expr, String> {
        // Either `[expr]`, `[expr:expr]`, `[:expr]`, `[expr:]`, or `[:]`.
        let start = if self.peek() == Some(&Token::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };

        if self.peek() == Some(&Token::Colon) {
            self.advance();
            let end = if self.peek() == Some(&Token::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            self.expect(&Token::RBracket)?;
            return Ok(Expr::Slice {
                target: Box::new(target),
                start,
                end,
            });
        }

        let index = start.ok_or_else(|| "SyntaxError: empty subscript".to_string())?;
        self.expect(&Token::RBracket)?;
        Ok(Expr::Index {
            target: Box::new(target),
            index,
        })
    }

    fn parse_args(&mut self, closer: &Token) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.peek() == Some(closer) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(ref t) if t == closer => return Ok(args),
                Some(t) => {
                    return Err(format!(
                        "SyntaxError: expected ',' or '{}', found '{}'",
                        closer, t
                    ));
                }
                None => {
                    return Err(format!(
                        "SyntaxError: expected ',' or '{}', found end of input",
                        closer
                    ));
                }
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::None) => Ok(Expr::Null),
            Some(Token::Ident(name)) => Ok(Expr::Name(name)),
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::LBracket) => {
                let items = self.parse_args(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(t) => Err(format!("SyntaxError: unexpected '{}'", t)),
            None => Err("SyntaxError: unexpected end of input".to_string()),
        }
    }
}

//! Recursive-descent parser with the precedence ladder
//! `|| < && < == != < relational < + - < * / %`.

use anyhow::{anyhow, Result};

use crate::ast::{BinOp, Expr, ExprKind, Function, Param, Program, Stmt, Ty, UnOp};
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Parser {
        Parser { tokens, pos: 0 }
    }

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut program = Vec::new();
        while self.peek() != &Token::Eof {
            program.push(self.parse_statement()?);
        }
        Ok(program)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        if self.peek() == &expected {
            self.pos += 1;
            Ok(())
        } else {
            Err(anyhow!("expected {what}, got {}", self.peek().describe()))
        }
    }

    fn type_keyword(&mut self) -> Option<Ty> {
        let ty = match self.peek() {
            Token::Int => Ty::Int,
            Token::Uint => Ty::Uint,
            Token::Char => Ty::Char,
            Token::Str => Ty::Str,
            Token::Bool => Ty::Bool,
            Token::IntArr => Ty::IntArray,
            Token::Void => Ty::Void,
            _ => return None,
        };
        self.pos += 1;
        Some(ty)
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        match self.peek() {
            Token::Int | Token::Uint | Token::Char | Token::Str | Token::Bool | Token::IntArr
            | Token::Void => {
                if matches!(self.peek_at(1), Token::Ident(_))
                    && self.peek_at(2) == &Token::LParen
                {
                    return self.parse_function();
                }
                self.parse_var_decl()
            }
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::Break => {
                self.advance();
                self.expect(Token::Semicolon, "';'")?;
                Ok(Stmt::Break)
            }
            Token::Return => self.parse_return(),
            Token::Ident(_) => {
                if self.peek_at(1) == &Token::LParen {
                    let call = self.parse_call()?;
                    self.expect(Token::Semicolon, "';'")?;
                    Ok(Stmt::Expr(call))
                } else {
                    self.parse_assign()
                }
            }
            other => Err(anyhow!("unexpected {} at statement start", other.describe())),
        }
    }

    fn parse_var_decl(&mut self) -> Result<Stmt> {
        let ty = self
            .type_keyword()
            .ok_or_else(|| anyhow!("expected data type"))?;
        anyhow::ensure!(ty != Ty::Void, "variables cannot be void");
        let name = self.ident("variable name")?;
        self.expect(Token::Assign, "'='")?;
        let value = self.parse_expression()?;
        self.expect(Token::Semicolon, "';'")?;
        Ok(Stmt::VarDecl { ty, name, value })
    }

    fn parse_assign(&mut self) -> Result<Stmt> {
        let name = self.ident("variable name")?;
        let target = if self.peek() == &Token::LBracket {
            self.advance();
            let index = self.parse_expression()?;
            self.expect(Token::RBracket, "']'")?;
            Expr::new(ExprKind::ArrayGet {
                object: Box::new(Expr::new(ExprKind::Ident(name))),
                index: Box::new(index),
            })
        } else {
            Expr::new(ExprKind::Ident(name))
        };
        self.expect(Token::Assign, "'='")?;
        let value = self.parse_expression()?;
        self.expect(Token::Semicolon, "';'")?;
        Ok(Stmt::Assign { target, value })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.expect(Token::If, "'if'")?;
        self.expect(Token::LParen, "'('")?;
        let cond = self.parse_expression()?;
        self.expect(Token::RParen, "')'")?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.peek() == &Token::Else {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        self.expect(Token::While, "'while'")?;
        self.expect(Token::LParen, "'('")?;
        let cond = self.parse_expression()?;
        self.expect(Token::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::While { cond, body })
    }

    fn parse_return(&mut self) -> Result<Stmt> {
        self.expect(Token::Return, "'return'")?;
        if self.peek() == &Token::Semicolon {
            self.advance();
            return Ok(Stmt::Return(None));
        }
        let value = self.parse_expression()?;
        self.expect(Token::Semicolon, "';'")?;
        Ok(Stmt::Return(Some(value)))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(Token::LBrace, "'{'")?;
        let mut body = Vec::new();
        while self.peek() != &Token::RBrace && self.peek() != &Token::Eof {
            body.push(self.parse_statement()?);
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(body)
    }

    fn parse_function(&mut self) -> Result<Stmt> {
        let ret = self
            .type_keyword()
            .ok_or_else(|| anyhow!("expected return type"))?;
        let name = self.ident("function name")?;
        self.expect(Token::LParen, "'('")?;
        let mut params = Vec::new();
        while self.peek() != &Token::RParen {
            let ty = self
                .type_keyword()
                .ok_or_else(|| anyhow!("expected parameter type"))?;
            anyhow::ensure!(ty != Ty::Void, "parameters cannot be void");
            let name = self.ident("parameter name")?;
            params.push(Param { ty, name });
            if self.peek() == &Token::Comma {
                self.advance();
            } else if self.peek() != &Token::RParen {
                return Err(anyhow!("expected ',' or ')', got {}", self.peek().describe()));
            }
        }
        self.expect(Token::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::Function(Function {
            ret,
            name,
            params,
            body,
        }))
    }

    fn parse_call(&mut self) -> Result<Expr> {
        let name = self.ident("function name")?;
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        while self.peek() != &Token::RParen {
            args.push(self.parse_expression()?);
            if self.peek() == &Token::Comma {
                self.advance();
            } else if self.peek() != &Token::RParen {
                return Err(anyhow!("expected ',' or ')', got {}", self.peek().describe()));
            }
        }
        self.expect(Token::RParen, "')'")?;
        Ok(Expr::new(ExprKind::Call { name, args }))
    }

    fn ident(&mut self, what: &str) -> Result<String> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(anyhow!("expected {what}, got {}", other.describe())),
        }
    }

    pub fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn binary_ladder(
        &mut self,
        next: fn(&mut Parser) -> Result<Expr>,
        ops: &[(Token, BinOp)],
    ) -> Result<Expr> {
        let mut node = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.peek() == token {
                    self.advance();
                    let right = next(self)?;
                    node = Expr::new(ExprKind::Binary {
                        op: *op,
                        left: Box::new(node),
                        right: Box::new(right),
                    });
                    continue 'outer;
                }
            }
            return Ok(node);
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        self.binary_ladder(Parser::parse_and, &[(Token::OrOr, BinOp::Or)])
    }

    fn parse_and(&mut self) -> Result<Expr> {
        self.binary_ladder(Parser::parse_equality, &[(Token::AndAnd, BinOp::And)])
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        self.binary_ladder(
            Parser::parse_comparison,
            &[(Token::Eq, BinOp::Eq), (Token::Ne, BinOp::Ne)],
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        self.binary_ladder(
            Parser::parse_term,
            &[
                (Token::Gt, BinOp::Gt),
                (Token::Ge, BinOp::Ge),
                (Token::Lt, BinOp::Lt),
                (Token::Le, BinOp::Le),
            ],
        )
    }

    fn parse_term(&mut self) -> Result<Expr> {
        self.binary_ladder(
            Parser::parse_factor,
            &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)],
        )
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        self.binary_ladder(
            Parser::parse_unary,
            &[
                (Token::Star, BinOp::Mul),
                (Token::Slash, BinOp::Div),
                (Token::Percent, BinOp::Rem),
            ],
        )
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Token::Not => Some(UnOp::Not),
            Token::Minus => Some(UnOp::Neg),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(ExprKind::Unary {
                op,
                operand: Box::new(operand),
            }));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::Number(n)))
            }
            Token::CharLit(c) => {
                self.advance();
                Ok(Expr::new(ExprKind::CharLit(c)))
            }
            Token::StrLit(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::StrLit(s)))
            }
            Token::BoolLit(b) => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLit(b)))
            }
            Token::Ident(_) => match self.peek_at(1) {
                Token::LParen => self.parse_call(),
                Token::LBracket => {
                    let name = self.ident("identifier")?;
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(Token::RBracket, "']'")?;
                    Ok(Expr::new(ExprKind::ArrayGet {
                        object: Box::new(Expr::new(ExprKind::Ident(name))),
                        index: Box::new(index),
                    }))
                }
                Token::Dot => {
                    let name = self.ident("identifier")?;
                    self.advance();
                    let method = self.ident("method name")?;
                    self.expect(Token::LParen, "'('")?;
                    let mut args = Vec::new();
                    while self.peek() != &Token::RParen {
                        args.push(self.parse_expression()?);
                        if self.peek() == &Token::Comma {
                            self.advance();
                        }
                    }
                    self.expect(Token::RParen, "')'")?;
                    Ok(Expr::new(ExprKind::MethodCall {
                        object: Box::new(Expr::new(ExprKind::Ident(name))),
                        method,
                        args,
                    }))
                }
                _ => {
                    let name = self.ident("identifier")?;
                    Ok(Expr::new(ExprKind::Ident(name)))
                }
            },
            Token::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::LBrace => {
                self.advance();
                let mut values = Vec::new();
                while self.peek() != &Token::RBrace {
                    values.push(self.parse_expression()?);
                    if self.peek() == &Token::Comma {
                        self.advance();
                    } else if self.peek() != &Token::RBrace {
                        return Err(anyhow!("expected ',' or '}}' in array literal"));
                    }
                }
                self.advance();
                Ok(Expr::new(ExprKind::IntArray(values)))
            }
            other => Err(anyhow!("unexpected {} in expression", other.describe())),
        }
    }
}

/// Lex-and-parse convenience used by the CLI and tests.
pub fn parse_source(source: &str) -> Result<Program> {
    let tokens = crate::lexer::tokenize(source)?;
    Parser::new(tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_puts_mul_under_add() {
        let program = parse_source("int x = 1 + 2 * 3;").unwrap();
        let Stmt::VarDecl { value, .. } = &program[0] else {
            panic!("expected var decl");
        };
        let ExprKind::Binary { op: BinOp::Add, right, .. } = &value.kind else {
            panic!("expected top-level add, got {value:?}");
        };
        assert!(matches!(
            right.kind,
            ExprKind::Binary { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn logic_binds_loosest() {
        let program = parse_source("bool b = 1 < 2 && 3 < 4 || false;").unwrap();
        let Stmt::VarDecl { value, .. } = &program[0] else {
            panic!("expected var decl");
        };
        assert!(matches!(
            value.kind,
            ExprKind::Binary { op: BinOp::Or, .. }
        ));
    }

    #[test]
    fn if_else_and_while_with_break() {
        let program = parse_source(
            "while (true) { if (1 == 2) { break; } else { out(1); } }",
        )
        .unwrap();
        let Stmt::While { body, .. } = &program[0] else {
            panic!("expected while");
        };
        let Stmt::If { else_branch, .. } = &body[0] else {
            panic!("expected if");
        };
        assert!(else_branch.is_some());
    }

    #[test]
    fn function_definition_and_call() {
        let program = parse_source(
            "int add(int a, int b) { return a + b; } int r = add(1, 2);",
        )
        .unwrap();
        let Stmt::Function(func) = &program[0] else {
            panic!("expected function");
        };
        assert_eq!(func.name, "add");
        assert_eq!(func.params.len(), 2);
        let Stmt::VarDecl { value, .. } = &program[1] else {
            panic!("expected var decl");
        };
        assert!(matches!(&value.kind, ExprKind::Call { name, args } if name == "add" && args.len() == 2));
    }

    #[test]
    fn array_literal_index_and_size() {
        let program = parse_source(
            "int[] a = {1, 2, 3}; int x = a[1]; int n = a.size();",
        )
        .unwrap();
        assert!(matches!(
            &program[0],
            Stmt::VarDecl { value, .. } if matches!(&value.kind, ExprKind::IntArray(v) if v.len() == 3)
        ));
        assert!(matches!(
            &program[1],
            Stmt::VarDecl { value, .. } if matches!(value.kind, ExprKind::ArrayGet { .. })
        ));
        assert!(matches!(
            &program[2],
            Stmt::VarDecl { value, .. } if matches!(&value.kind, ExprKind::MethodCall { method, .. } if method == "size")
        ));
    }

    #[test]
    fn indexed_assignment() {
        let program = parse_source("a[2] = 5;").unwrap();
        assert!(matches!(
            &program[0],
            Stmt::Assign { target, .. } if matches!(target.kind, ExprKind::ArrayGet { .. })
        ));
    }

    #[test]
    fn missing_semicolon_fails() {
        assert!(parse_source("int x = 1").is_err());
        assert!(parse_source("if (1) { out(1); ").is_err());
    }
}

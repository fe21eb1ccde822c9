//! Recursive-descent parser over the lazy token stream.
//!
//! Binary expressions are parsed by a single precedence-climbing driver that
//! walks the levels of the table in `token::precedences`; adding an operator
//! means adding a table row, not a new recursive function. Statements own
//! the block structure: every block opened with `:` is closed by `end`, and
//! blocks receive their escape whitelist here (function bodies accept
//! `return`, loop bodies accept `break`/`continue`).

use crate::{
    ast::{Ast, BinaryOp, Block, EscapeSet, Expr, ExprKind, FnDecl, MemberDecl, Stmt, StmtKind, UnaryOp},
    error::ParseError,
    lexer::Lexer,
    token::{Token, TokenKind, precedence, precedences},
};

type PResult<T> = Result<T, ParseError>;

/// Parses a whole program.
pub fn parse(source: &str) -> Result<Ast, ParseError> {
    let lexer = Lexer::tokenize(source)?;
    let mut parser = Parser { lexer };
    let mut body = vec![];
    while !parser.lexer.is_empty() {
        body.push(parser.parse_statement()?);
    }
    Ok(Ast { body })
}

struct Parser<'src> {
    lexer: Lexer<'src>,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Token<'src> {
        self.lexer.peek()
    }

    fn advance(&mut self) -> PResult<Token<'src>> {
        Ok(self.lexer.advance()?)
    }

    /// Consumes the current token if it has the given kind, erroring
    /// otherwise.
    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> PResult<Token<'src>> {
        let token = self.peek();
        if token.kind == kind {
            return self.advance();
        }
        Err(ParseError::UnexpectedToken {
            expected,
            got: format!("{} {:?}", token.kind, token.raw),
            pos: token.pos,
        })
    }

    fn eat_if(&mut self, kind: TokenKind) -> PResult<bool> {
        if self.peek().kind == kind {
            self.advance()?;
            return Ok(true);
        }
        Ok(false)
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn parse_statement(&mut self) -> PResult<Stmt> {
        let token = self.peek();
        let line = token.pos.line;
        let kind = match token.kind {
            TokenKind::KwIf => {
                self.advance()?;
                return self.parse_if(line);
            }
            TokenKind::KwWhile => {
                self.advance()?;
                self.parse_while()?
            }
            TokenKind::KwFor => {
                self.advance()?;
                self.parse_for()?
            }
            TokenKind::KwImport => {
                self.advance()?;
                self.parse_import()?
            }
            TokenKind::KwClass => {
                self.advance()?;
                self.parse_class()?
            }
            TokenKind::KwVar => {
                self.advance()?;
                self.parse_var_decl()?
            }
            TokenKind::KwBreak => {
                self.advance()?;
                StmtKind::Break
            }
            TokenKind::KwContinue => {
                self.advance()?;
                StmtKind::Continue
            }
            TokenKind::KwReturn => {
                self.advance()?;
                self.parse_return()?
            }
            _ => StmtKind::Expr(self.parse_expr()?),
        };
        Ok(Stmt { kind, line })
    }

    /// Parses statements until one of `stops` (or end of input) is current.
    /// The stop token is left for the caller.
    fn parse_block(&mut self, stops: &[TokenKind], escapes: EscapeSet) -> PResult<Block> {
        let mut body = vec![];
        loop {
            let kind = self.peek().kind;
            if kind == TokenKind::Eof || stops.contains(&kind) {
                break;
            }
            body.push(self.parse_statement()?);
        }
        Ok(Block::new(body, escapes))
    }

    /// `if expr : block (elif expr : block)* (else : block)? end`
    ///
    /// An `elif` chain parses as a nested `If` in the alternative slot.
    fn parse_if(&mut self, line: u32) -> PResult<Stmt> {
        let test = self.parse_expr()?;
        self.expect(TokenKind::Colon, "':'")?;
        let consequent = self.parse_block(
            &[TokenKind::KwEnd, TokenKind::KwElif, TokenKind::KwElse],
            EscapeSet::NONE,
        )?;

        let token = self.peek();
        let alternative = match token.kind {
            TokenKind::KwElif => {
                self.advance()?;
                Some(Box::new(self.parse_if(token.pos.line)?))
            }
            TokenKind::KwElse => {
                self.advance()?;
                self.expect(TokenKind::Colon, "':'")?;
                let block = self.parse_block(&[TokenKind::KwEnd], EscapeSet::NONE)?;
                self.expect(TokenKind::KwEnd, "'end'")?;
                Some(Box::new(Stmt {
                    kind: StmtKind::Block(block),
                    line: token.pos.line,
                }))
            }
            TokenKind::KwEnd => {
                self.advance()?;
                None
            }
            _ => {
                return Err(ParseError::UnexpectedToken {
                    expected: "'elif', 'else' or 'end'",
                    got: format!("{} {:?}", token.kind, token.raw),
                    pos: token.pos,
                });
            }
        };

        Ok(Stmt {
            kind: StmtKind::If {
                test,
                consequent,
                alternative,
            },
            line,
        })
    }

    fn parse_while(&mut self) -> PResult<StmtKind> {
        let test = self.parse_expr()?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_block(&[TokenKind::KwEnd], EscapeSet::LOOP)?;
        self.expect(TokenKind::KwEnd, "'end'")?;
        Ok(StmtKind::While { test, body })
    }

    fn parse_for(&mut self) -> PResult<StmtKind> {
        let var = self.expect(TokenKind::Identifier, "an identifier")?.raw.to_owned();
        self.expect(TokenKind::KwIn, "'in'")?;
        let iterable = self.parse_expr()?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_block(&[TokenKind::KwEnd], EscapeSet::LOOP)?;
        self.expect(TokenKind::KwEnd, "'end'")?;
        Ok(StmtKind::For { var, iterable, body })
    }

    fn parse_import(&mut self) -> PResult<StmtKind> {
        let path = self.expect(TokenKind::Str, "a module path string")?;
        let alias = if self.eat_if(TokenKind::KwAs)? {
            Some(self.expect(TokenKind::Identifier, "an identifier")?.raw.to_owned())
        } else {
            None
        };
        Ok(StmtKind::Import {
            path: string_contents(path.raw),
            alias,
        })
    }

    /// `class IDENT : (var decl | fn decl)* end`
    fn parse_class(&mut self) -> PResult<StmtKind> {
        let name = self.expect(TokenKind::Identifier, "a class name")?.raw.to_owned();
        self.expect(TokenKind::Colon, "':'")?;

        let mut members = vec![];
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::KwEnd => {
                    self.advance()?;
                    break;
                }
                TokenKind::KwVar => {
                    self.advance()?;
                    let member = self.expect(TokenKind::Identifier, "a member name")?.raw.to_owned();
                    self.expect(TokenKind::Assign, "'='")?;
                    let value = self.parse_expr()?;
                    members.push(MemberDecl {
                        name: member,
                        value,
                        line: token.pos.line,
                    });
                }
                TokenKind::KwFn => {
                    self.advance()?;
                    let decl = self.parse_fn_decl(token.pos.line)?;
                    let ExprKind::FnDecl(fn_decl) = &decl.kind else {
                        unreachable!("parse_fn_decl returns a FnDecl expression");
                    };
                    let Some(member) = fn_decl.name.clone() else {
                        return Err(ParseError::UnexpectedExpression {
                            context: "a class member function needs a name",
                            pos: token.pos,
                        });
                    };
                    members.push(MemberDecl {
                        name: member,
                        value: decl,
                        line: token.pos.line,
                    });
                }
                _ => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "'var', 'fn' or 'end'",
                        got: format!("{} {:?}", token.kind, token.raw),
                        pos: token.pos,
                    });
                }
            }
        }
        Ok(StmtKind::ClassDecl { name, members })
    }

    fn parse_var_decl(&mut self) -> PResult<StmtKind> {
        let name = self.expect(TokenKind::Identifier, "an identifier")?.raw.to_owned();
        self.expect(TokenKind::Assign, "'='")?;
        let value = self.parse_expr()?;
        Ok(StmtKind::VarDecl { name, value })
    }

    /// `return` followed by an expression unless the block visibly ends.
    fn parse_return(&mut self) -> PResult<StmtKind> {
        let next = self.peek().kind;
        if matches!(
            next,
            TokenKind::KwEnd | TokenKind::KwElif | TokenKind::KwElse | TokenKind::Eof
        ) {
            return Ok(StmtKind::Return(None));
        }
        Ok(StmtKind::Return(Some(self.parse_expr()?)))
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_level(precedences::ASSIGNMENT)
    }

    /// Precedence-climbing driver. Assignment is right-associative and
    /// validated against the lvalue forms; every other level chains
    /// left-associatively while the table maps the operator to this level.
    fn parse_level(&mut self, level: i8) -> PResult<Expr> {
        if level >= precedences::MAX {
            return self.parse_unary();
        }

        if level == precedences::ASSIGNMENT {
            let target = self.parse_level(level + 1)?;
            let token = self.peek();
            if precedence(token.kind) != Some(level) {
                return Ok(target);
            }
            if !matches!(
                target.kind,
                ExprKind::Identifier(_) | ExprKind::Index { .. } | ExprKind::Member { .. }
            ) {
                return Err(ParseError::AssignmentToNonLvalue {
                    target: target.kind.describe(),
                    pos: token.pos,
                });
            }
            self.advance()?;
            let value = self.parse_level(level)?;
            return Ok(Expr {
                line: target.line,
                kind: ExprKind::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                },
            });
        }

        let mut left = self.parse_level(level + 1)?;
        while precedence(self.peek().kind) == Some(level) {
            let op = binary_op(self.advance()?.kind);
            let right = self.parse_level(level + 1)?;
            left = Expr {
                line: left.line,
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(left),
                    rhs: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    /// Unary `+`, `-` and `!` bind tighter than any binary operator and
    /// associate to the right.
    fn parse_unary(&mut self) -> PResult<Expr> {
        let token = self.peek();
        let op = match token.kind {
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Minus => UnaryOp::Minus,
            TokenKind::Not => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        self.advance()?;
        let operand = self.parse_unary()?;
        Ok(Expr {
            line: token.pos.line,
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
        })
    }

    /// Calls, indexing and member access chain off a primary expression:
    /// `get_func("add")(3, 4)`, `a.b[0].c`.
    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut target = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::OpenParen => {
                    self.advance()?;
                    let mut args = vec![];
                    if self.peek().kind != TokenKind::CloseParen {
                        args = self.parse_comma_list()?;
                    }
                    self.expect(TokenKind::CloseParen, "')'")?;
                    target = Expr {
                        line: target.line,
                        kind: ExprKind::Call {
                            target: Box::new(target),
                            args,
                        },
                    };
                }
                TokenKind::OpenBracket => {
                    self.advance()?;
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::CloseBracket, "']'")?;
                    target = Expr {
                        line: target.line,
                        kind: ExprKind::Index {
                            target: Box::new(target),
                            index: Box::new(index),
                        },
                    };
                }
                TokenKind::Dot => {
                    self.advance()?;
                    let name = self.expect(TokenKind::Identifier, "a member name")?;
                    target = Expr {
                        line: target.line,
                        kind: ExprKind::Member {
                            target: Box::new(target),
                            name: name.raw.to_owned(),
                        },
                    };
                }
                _ => return Ok(target),
            }
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let token = self.peek();
        let line = token.pos.line;
        let kind = match token.kind {
            TokenKind::Number => {
                self.advance()?;
                ExprKind::Number(parse_number(token)?)
            }
            TokenKind::Str => {
                self.advance()?;
                ExprKind::Str(string_contents(token.raw))
            }
            TokenKind::Identifier => {
                self.advance()?;
                ExprKind::Identifier(token.raw.to_owned())
            }
            TokenKind::KwNull => {
                self.advance()?;
                ExprKind::Null
            }
            TokenKind::KwTrue => {
                self.advance()?;
                ExprKind::Bool(true)
            }
            TokenKind::KwFalse => {
                self.advance()?;
                ExprKind::Bool(false)
            }
            TokenKind::OpenBracket => {
                self.advance()?;
                let mut items = vec![];
                if self.peek().kind != TokenKind::CloseBracket {
                    items = self.parse_comma_list()?;
                }
                self.expect(TokenKind::CloseBracket, "']'")?;
                ExprKind::Array(items)
            }
            TokenKind::OpenParen => {
                self.advance()?;
                let inner = self.parse_expr()?;
                self.expect(TokenKind::CloseParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::KwFn => {
                self.advance()?;
                return self.parse_fn_decl(line);
            }
            _ => {
                return Err(ParseError::UnexpectedToken {
                    expected: "an expression",
                    got: format!("{} {:?}", token.kind, token.raw),
                    pos: token.pos,
                });
            }
        };
        Ok(Expr { kind, line })
    }

    /// `fn name?(params) : block end`; the body accepts `return`.
    fn parse_fn_decl(&mut self, line: u32) -> PResult<Expr> {
        let name = if self.peek().kind == TokenKind::Identifier {
            Some(self.advance()?.raw.to_owned())
        } else {
            None
        };

        self.expect(TokenKind::OpenParen, "'('")?;
        let mut params = vec![];
        if self.peek().kind == TokenKind::Identifier {
            params.push(self.advance()?.raw.to_owned());
            while self.eat_if(TokenKind::Comma)? {
                params.push(self.expect(TokenKind::Identifier, "a parameter name")?.raw.to_owned());
            }
        }
        self.expect(TokenKind::CloseParen, "')'")?;
        self.expect(TokenKind::Colon, "':'")?;

        let body = self.parse_block(&[TokenKind::KwEnd], EscapeSet::FUNCTION)?;
        self.expect(TokenKind::KwEnd, "'end'")?;

        Ok(Expr {
            kind: ExprKind::FnDecl(FnDecl { name, params, body }),
            line,
        })
    }

    /// Comma-separated expressions; at least one element.
    fn parse_comma_list(&mut self) -> PResult<Vec<Expr>> {
        let mut items = vec![self.parse_expr()?];
        while self.eat_if(TokenKind::Comma)? {
            items.push(self.parse_expr()?);
        }
        Ok(items)
    }
}

/// Strips the quote delimiters from a string token's raw view.
fn string_contents(raw: &str) -> String {
    raw[1..raw.len() - 1].to_owned()
}

fn parse_number(token: Token<'_>) -> PResult<f64> {
    match token.raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParseError::NumberLiteralOutOfRange {
            raw: token.raw.to_owned(),
            pos: token.pos,
        }),
    }
}

fn binary_op(kind: TokenKind) -> BinaryOp {
    match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Eq => BinaryOp::Eq,
        TokenKind::NotEq => BinaryOp::NotEq,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::LtEq => BinaryOp::LtEq,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::GtEq => BinaryOp::GtEq,
        _ => unreachable!("token {kind} is not a binary operator"),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse_one_expr(source: &str) -> Expr {
        let ast = parse(source).unwrap();
        assert_eq!(ast.body.len(), 1);
        match ast.body.into_iter().next().unwrap().kind {
            StmtKind::Expr(expr) => expr,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let expr = parse_one_expr("1 + 2 * 3");
        let ExprKind::Binary { op: BinaryOp::Add, rhs, .. } = expr.kind else {
            panic!("expected addition at the root: {expr:?}");
        };
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_left_associativity() {
        // (1 - 2) - 3
        let expr = parse_one_expr("1 - 2 - 3");
        let ExprKind::Binary { op: BinaryOp::Sub, lhs, rhs } = expr.kind else {
            panic!("expected subtraction at the root");
        };
        assert!(matches!(lhs.kind, ExprKind::Binary { op: BinaryOp::Sub, .. }));
        assert!(matches!(rhs.kind, ExprKind::Number(n) if n == 3.0));
    }

    #[test]
    fn test_relational_below_additive() {
        // (1 + 2) < (3 * 4)
        let expr = parse_one_expr("1 + 2 < 3 * 4");
        assert!(matches!(expr.kind, ExprKind::Binary { op: BinaryOp::Lt, .. }));
    }

    #[test]
    fn test_unary_binds_tighter_than_mul() {
        // (-1) * 2
        let expr = parse_one_expr("-1 * 2");
        let ExprKind::Binary { op: BinaryOp::Mul, lhs, .. } = expr.kind else {
            panic!("expected multiplication at the root");
        };
        assert!(matches!(lhs.kind, ExprKind::Unary { op: UnaryOp::Minus, .. }));
    }

    #[test]
    fn test_postfix_chaining() {
        // a.b[0].c(1)(2)
        let expr = parse_one_expr("a.b[0].c(1)(2)");
        let ExprKind::Call { target, args } = expr.kind else {
            panic!("expected outer call");
        };
        assert_eq!(args.len(), 1);
        let ExprKind::Call { target, .. } = target.kind else {
            panic!("expected inner call");
        };
        let ExprKind::Member { name, target } = target.kind else {
            panic!("expected member access");
        };
        assert_eq!(name, "c");
        assert!(matches!(target.kind, ExprKind::Index { .. }));
    }

    #[test]
    fn test_assignment_targets() {
        assert!(matches!(parse_one_expr("a = 1").kind, ExprKind::Assign { .. }));
        assert!(matches!(parse_one_expr("a[0] = 1").kind, ExprKind::Assign { .. }));
        assert!(matches!(parse_one_expr("a.b = 1").kind, ExprKind::Assign { .. }));

        let err = parse("1 + 2 = 3").unwrap_err();
        assert!(matches!(err, ParseError::AssignmentToNonLvalue { target: "binary operation", .. }));
    }

    #[test]
    fn test_if_elif_else_nesting() {
        let ast = parse("if a: 1 elif b: 2 else: 3 end").unwrap();
        let StmtKind::If { alternative, .. } = &ast.body[0].kind else {
            panic!("expected if");
        };
        let alt = alternative.as_ref().unwrap();
        let StmtKind::If { alternative, .. } = &alt.kind else {
            panic!("expected elif to parse as a nested if");
        };
        assert!(matches!(alternative.as_deref(), Some(Stmt { kind: StmtKind::Block(_), .. })));
    }

    #[test]
    fn test_block_escape_seeding() {
        let ast = parse("while 1: break end").unwrap();
        let StmtKind::While { body, .. } = &ast.body[0].kind else {
            panic!("expected while");
        };
        assert_eq!(body.escapes, EscapeSet::LOOP);

        let expr = parse_one_expr("fn(): return end");
        let ExprKind::FnDecl(decl) = expr.kind else {
            panic!("expected lambda");
        };
        assert_eq!(decl.body.escapes, EscapeSet::FUNCTION);
    }

    #[test]
    fn test_bare_return_before_end() {
        let ast = parse("fn f(): return end").unwrap();
        let StmtKind::Expr(expr) = &ast.body[0].kind else {
            panic!("expected fn declaration statement");
        };
        let ExprKind::FnDecl(decl) = &expr.kind else {
            panic!("expected fn declaration");
        };
        assert!(matches!(decl.body.body[0].kind, StmtKind::Return(None)));
    }

    #[test]
    fn test_import_with_alias() {
        let ast = parse("import \"libio.so\" as io").unwrap();
        assert_eq!(
            ast.body[0].kind,
            StmtKind::Import {
                path: "libio.so".to_owned(),
                alias: Some("io".to_owned()),
            }
        );
    }

    #[test]
    fn test_class_members() {
        let ast = parse("class Point:\n var x = 0\n fn dist(self): self.x end\nend").unwrap();
        let StmtKind::ClassDecl { name, members } = &ast.body[0].kind else {
            panic!("expected class declaration");
        };
        assert_eq!(name, "Point");
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].name, "x");
        assert_eq!(members[1].name, "dist");
    }

    #[test]
    fn test_missing_end_reports_eof() {
        let err = parse("while 1: x").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { expected: "'end'", .. }));
    }

    #[test]
    fn test_number_round_trip() {
        // parsing the textual dump of a literal reproduces the node
        let expr = parse_one_expr("1.5");
        let ExprKind::Number(n) = expr.kind else { panic!() };
        let again = parse_one_expr(&n.to_string());
        assert_eq!(again.kind, ExprKind::Number(1.5));
    }
}

//! Recursive-descent parser producing a [`Program`].

use std::rc::Rc;

use super::ast::*;
use super::error::{ScriptError, ScriptResult};
use super::lexer::{tokenize, Tok, Token};

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import",
    "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while",
    "with", "yield",
];

/// Keywords that start statements this runtime does not implement.
const UNSUPPORTED: &[&str] = &[
    "class", "try", "with", "lambda", "yield", "raise", "del", "nonlocal", "assert", "except",
    "finally",
];

/// Parse program text into a syntax tree.
pub fn parse(source: &str) -> ScriptResult<Program> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        if parser.eat(&Tok::Newline) {
            continue;
        }
        body.extend(parser.statement()?);
    }
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn line(&self) -> usize {
        self.current().line
    }

    fn at(&self, tok: &Tok) -> bool {
        &self.current().tok == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(&self.current().tok, Tok::Op(o) if *o == op)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(&self.current().tok, Tok::Name(n) if n == kw)
    }

    fn peek_keyword(&self, offset: usize, kw: &str) -> bool {
        matches!(
            self.tokens.get(self.pos + offset).map(|t| &t.tok),
            Some(Tok::Name(n)) if n == kw
        )
    }

    fn bump(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> ScriptResult<T> {
        Err(ScriptError::syntax(message, self.line()))
    }

    fn unexpected<T>(&self) -> ScriptResult<T> {
        let found = match &self.current().tok {
            Tok::Name(n) => format!("'{}'", n),
            Tok::Int(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) => "string".to_string(),
            Tok::Op(op) => format!("'{}'", op),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "unexpected indent".to_string(),
            Tok::Dedent => "unexpected dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        if matches!(self.current().tok, Tok::Indent | Tok::Dedent) {
            return self.error(found);
        }
        self.error(format!("invalid syntax near {}", found))
    }

    fn expect_op(&mut self, op: &str) -> ScriptResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.error(format!("expected '{}'", op))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> ScriptResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            self.error(format!("expected '{}'", kw))
        }
    }

    fn identifier(&mut self) -> ScriptResult<String> {
        match &self.current().tok {
            Tok::Name(n) if !KEYWORDS.contains(&n.as_str()) => {
                let name = n.clone();
                self.bump();
                Ok(name)
            }
            _ => self.error("expected a name"),
        }
    }

    fn end_of_statement(&mut self) -> ScriptResult<()> {
        if self.eat(&Tok::Newline) || self.at(&Tok::Eof) {
            Ok(())
        } else {
            self.unexpected()
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn statement(&mut self) -> ScriptResult<Vec<Stmt>> {
        let keyword = match &self.current().tok {
            Tok::Name(n) => Some(n.clone()),
            _ => None,
        };
        if let Some(keyword) = keyword {
            match keyword.as_str() {
                "def" => return Ok(vec![self.function_def(false)?]),
                "async" if self.peek_keyword(1, "def") => {
                    self.bump();
                    return Ok(vec![self.function_def(true)?]);
                }
                "if" => return Ok(vec![self.if_statement()?]),
                "while" => return Ok(vec![self.while_statement()?]),
                "for" => return Ok(vec![self.for_statement()?]),
                kw if UNSUPPORTED.contains(&kw) => {
                    return self.error(format!("'{}' is not supported", kw));
                }
                _ => {}
            }
        }
        if matches!(self.current().tok, Tok::Indent) {
            return self.error("unexpected indent");
        }
        self.simple_line()
    }

    fn simple_line(&mut self) -> ScriptResult<Vec<Stmt>> {
        let mut stmts = vec![self.small_statement()?];
        while self.eat_op(";") {
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                break;
            }
            stmts.push(self.small_statement()?);
        }
        self.end_of_statement()?;
        Ok(stmts)
    }

    fn small_statement(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        let kind = if self.eat_keyword("pass") {
            StmtKind::Pass
        } else if self.eat_keyword("break") {
            StmtKind::Break
        } else if self.eat_keyword("continue") {
            StmtKind::Continue
        } else if self.eat_keyword("return") {
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) || self.at_op(";") {
                StmtKind::Return(None)
            } else {
                StmtKind::Return(Some(self.expression()?))
            }
        } else if self.eat_keyword("global") {
            let mut names = vec![self.identifier()?];
            while self.eat_op(",") {
                names.push(self.identifier()?);
            }
            StmtKind::Global(names)
        } else if self.eat_keyword("import") {
            let module = self.identifier()?;
            let alias = if self.eat_keyword("as") {
                Some(self.identifier()?)
            } else {
                None
            };
            StmtKind::Import { module, alias }
        } else if self.eat_keyword("from") {
            let module = self.identifier()?;
            self.expect_keyword("import")?;
            let names = if self.eat_op("*") {
                ImportNames::Star
            } else {
                let parenthesized = self.eat_op("(");
                let mut names = Vec::new();
                loop {
                    let name = self.identifier()?;
                    let alias = if self.eat_keyword("as") {
                        Some(self.identifier()?)
                    } else {
                        None
                    };
                    names.push((name, alias));
                    if !self.eat_op(",") {
                        break;
                    }
                    if parenthesized && self.at_op(")") {
                        break;
                    }
                }
                if parenthesized {
                    self.expect_op(")")?;
                }
                ImportNames::Names(names)
            };
            StmtKind::FromImport { module, names }
        } else {
            return self.expression_statement();
        };
        Ok(Stmt { kind, line })
    }

    fn expression_statement(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        let expr = self.expression()?;

        if self.at_op("=") {
            let mut targets = vec![expr];
            let mut value;
            loop {
                self.expect_op("=")?;
                value = self.expression()?;
                if !self.at_op("=") {
                    break;
                }
                targets.push(value);
            }
            if targets.len() > 1 {
                return self.error("chained assignment is not supported");
            }
            let target = self.to_target(targets.remove(0))?;
            return Ok(Stmt {
                kind: StmtKind::Assign { target, value },
                line,
            });
        }

        let aug = match &self.current().tok {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            self.bump();
            let target = self.to_target(expr)?;
            let value = self.expression()?;
            return Ok(Stmt {
                kind: StmtKind::AugAssign { target, op, value },
                line,
            });
        }

        if self.at_op(",") {
            return self.error("tuples are not supported");
        }
        if self.at_op(":") {
            return self.error("variable annotations are not supported");
        }

        Ok(Stmt {
            kind: StmtKind::Expr(expr),
            line,
        })
    }

    fn to_target(&self, expr: Expr) -> ScriptResult<Target> {
        match expr.kind {
            ExprKind::Name(name) => Ok(Target::Name(name)),
            ExprKind::Index { object, index } => Ok(Target::Index {
                object: *object,
                index: *index,
            }),
            ExprKind::Attribute { .. } => Err(ScriptError::syntax(
                "cannot assign to attribute",
                expr.line,
            )),
            _ => Err(ScriptError::syntax("cannot assign to expression", expr.line)),
        }
    }

    fn suite(&mut self) -> ScriptResult<Block> {
        self.expect_op(":")?;
        if !self.eat(&Tok::Newline) {
            return self.simple_line();
        }
        if !self.eat(&Tok::Indent) {
            return self.error("expected an indented block");
        }
        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::Eof) {
                break;
            }
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    fn function_def(&mut self, is_async: bool) -> ScriptResult<Stmt> {
        let line = self.line();
        self.expect_keyword("def")?;
        let name = self.identifier()?;
        self.expect_op("(")?;
        let mut params: Vec<Param> = Vec::new();
        while !self.at_op(")") {
            let param = self.identifier()?;
            if self.eat_op(":") {
                // Annotations are accepted and ignored.
                self.expression()?;
            }
            let default = if self.eat_op("=") {
                Some(self.expression()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return self.error("non-default argument follows default argument");
                }
                None
            };
            if params.iter().any(|p| p.name == param) {
                return self.error(format!("duplicate argument '{}' in function definition", param));
            }
            params.push(Param {
                name: param,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.expression()?;
        }
        let body = self.suite()?;
        Ok(Stmt {
            kind: StmtKind::FunctionDef(Rc::new(FunctionDef {
                name,
                params,
                body,
                is_async,
                line,
            })),
            line,
        })
    }

    fn if_statement(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        self.expect_keyword("if")?;
        let cond = self.expression()?;
        let mut branches = vec![(cond, self.suite()?)];
        let mut orelse = None;
        loop {
            if self.eat_keyword("elif") {
                let cond = self.expression()?;
                branches.push((cond, self.suite()?));
            } else if self.eat_keyword("else") {
                orelse = Some(self.suite()?);
                break;
            } else {
                break;
            }
        }
        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    fn while_statement(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        self.expect_keyword("while")?;
        let cond = self.expression()?;
        let body = self.suite()?;
        if self.at_keyword("else") {
            return self.error("'while ... else' is not supported");
        }
        Ok(Stmt {
            kind: StmtKind::While { cond, body },
            line,
        })
    }

    fn for_statement(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        self.expect_keyword("for")?;
        let var = self.identifier()?;
        if self.at_op(",") {
            return self.error("tuple unpacking is not supported");
        }
        self.expect_keyword("in")?;
        let iter = self.expression()?;
        let body = self.suite()?;
        if self.at_keyword("else") {
            return self.error("'for ... else' is not supported");
        }
        Ok(Stmt {
            kind: StmtKind::For { var, iter, body },
            line,
        })
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expression(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        let then = self.or_expr()?;
        if self.at_keyword("if") {
            self.bump();
            let cond = self.or_expr()?;
            self.expect_keyword("else")?;
            let orelse = self.expression()?;
            return Ok(Expr {
                kind: ExprKind::Conditional {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    orelse: Box::new(orelse),
                },
                line,
            });
        }
        Ok(then)
    }

    fn or_expr(&mut self) -> ScriptResult<Expr> {
        let mut left = self.and_expr()?;
        while self.at_keyword("or") {
            let line = self.line();
            self.bump();
            let right = self.and_expr()?;
            left = Expr {
                kind: ExprKind::Or(Box::new(left), Box::new(right)),
                line,
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ScriptResult<Expr> {
        let mut left = self.not_expr()?;
        while self.at_keyword("and") {
            let line = self.line();
            self.bump();
            let right = self.not_expr()?;
            left = Expr {
                kind: ExprKind::And(Box::new(left), Box::new(right)),
                line,
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> ScriptResult<Expr> {
        if self.at_keyword("not") {
            let line = self.line();
            self.bump();
            let operand = self.not_expr()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                line,
            });
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let (op, width) = match &self.current().tok {
            Tok::Op("==") => (CmpOp::Eq, 1),
            Tok::Op("!=") => (CmpOp::NotEq, 1),
            Tok::Op("<") => (CmpOp::Lt, 1),
            Tok::Op("<=") => (CmpOp::LtE, 1),
            Tok::Op(">") => (CmpOp::Gt, 1),
            Tok::Op(">=") => (CmpOp::GtE, 1),
            Tok::Name(n) if n == "in" => (CmpOp::In, 1),
            Tok::Name(n) if n == "not" && self.peek_keyword(1, "in") => (CmpOp::NotIn, 2),
            Tok::Name(n) if n == "is" && self.peek_keyword(1, "not") => (CmpOp::IsNot, 2),
            Tok::Name(n) if n == "is" => (CmpOp::Is, 1),
            _ => return None,
        };
        for _ in 0..width {
            self.bump();
        }
        Some(op)
    }

    fn comparison(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        let first = self.arith()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            return Ok(first);
        }
        Ok(Expr {
            kind: ExprKind::Compare {
                first: Box::new(first),
                rest,
            },
            line,
        })
    }

    fn arith(&mut self) -> ScriptResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = if self.at_op("+") {
                BinOp::Add
            } else if self.at_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let line = self.line();
            self.bump();
            let right = self.term()?;
            left = binary(op, left, right, line);
        }
        Ok(left)
    }

    fn term(&mut self) -> ScriptResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match &self.current().tok {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            let line = self.line();
            self.bump();
            let right = self.factor()?;
            left = binary(op, left, right, line);
        }
        Ok(left)
    }

    fn factor(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        let op = if self.at_op("-") {
            Some(UnaryOp::Neg)
        } else if self.at_op("+") {
            Some(UnaryOp::Pos)
        } else {
            None
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.factor()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                line,
            });
        }
        self.power()
    }

    fn power(&mut self) -> ScriptResult<Expr> {
        let base = self.await_expr()?;
        if self.at_op("**") {
            let line = self.line();
            self.bump();
            let exponent = self.factor()?;
            return Ok(binary(BinOp::Pow, base, exponent, line));
        }
        Ok(base)
    }

    fn await_expr(&mut self) -> ScriptResult<Expr> {
        if self.at_keyword("await") {
            let line = self.line();
            self.bump();
            let inner = self.primary()?;
            return Ok(Expr {
                kind: ExprKind::Await(Box::new(inner)),
                line,
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            let line = self.line();
            if self.eat_op("(") {
                let args = self.call_arguments()?;
                expr = Expr {
                    kind: ExprKind::Call {
                        func: Box::new(expr),
                        args,
                    },
                    line,
                };
            } else if self.eat_op("[") {
                if self.at_op(":") {
                    return self.error("slices are not supported");
                }
                let index = self.expression()?;
                if self.at_op(":") {
                    return self.error("slices are not supported");
                }
                self.expect_op("]")?;
                expr = Expr {
                    kind: ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                };
            } else if self.eat_op(".") {
                let name = match &self.current().tok {
                    Tok::Name(n) => n.clone(),
                    _ => return self.error("expected attribute name"),
                };
                self.bump();
                expr = Expr {
                    kind: ExprKind::Attribute {
                        object: Box::new(expr),
                        name,
                    },
                    line,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call_arguments(&mut self) -> ScriptResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.at_op(")") {
            if matches!(self.current().tok, Tok::Name(_))
                && matches!(
                    self.tokens.get(self.pos + 1).map(|t| &t.tok),
                    Some(Tok::Op("="))
                )
            {
                return self.error("keyword arguments are not supported");
            }
            args.push(self.expression()?);
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn atom(&mut self) -> ScriptResult<Expr> {
        let token = self.current().clone();
        let line = token.line;
        let kind = match token.tok {
            Tok::Int(i) => {
                self.bump();
                ExprKind::Int(i)
            }
            Tok::Float(f) => {
                self.bump();
                ExprKind::Float(f)
            }
            Tok::Str(s) => {
                self.bump();
                let mut text = s;
                while let Tok::Str(next) = &self.current().tok {
                    text.push_str(next);
                    self.bump();
                }
                ExprKind::Str(Rc::from(text))
            }
            Tok::Name(name) => match name.as_str() {
                "True" => {
                    self.bump();
                    ExprKind::Bool(true)
                }
                "False" => {
                    self.bump();
                    ExprKind::Bool(false)
                }
                "None" => {
                    self.bump();
                    ExprKind::None
                }
                kw if KEYWORDS.contains(&kw) => {
                    if UNSUPPORTED.contains(&kw) {
                        return self.error(format!("'{}' is not supported", kw));
                    }
                    return self.unexpected();
                }
                _ => {
                    self.bump();
                    ExprKind::Name(name)
                }
            },
            Tok::Op("(") => {
                self.bump();
                if self.at_op(")") {
                    return self.error("tuples are not supported");
                }
                let inner = self.expression()?;
                if self.at_op(",") {
                    return self.error("tuples are not supported");
                }
                self.expect_op(")")?;
                return Ok(inner);
            }
            Tok::Op("[") => {
                self.bump();
                let mut items = Vec::new();
                while !self.at_op("]") {
                    items.push(self.expression()?);
                    if self.at_keyword("for") {
                        return self.error("list comprehensions are not supported");
                    }
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("]")?;
                ExprKind::List(items)
            }
            _ => return self.unexpected(),
        };
        Ok(Expr { kind, line })
    }
}

fn binary(op: BinOp, left: Expr, right: Expr, line: usize) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        line,
    }
}

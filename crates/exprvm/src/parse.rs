//! Recursive-descent front end for the expression VM.
//!
//! Grammar, loosest to tightest binding:
//!
//! ```text
//! program    := { statement ";" }
//! statement  := ident "=" expr | expr
//! expr       := or
//! or         := and { "|" and }
//! and        := equality { "&" equality }
//! equality   := relational { ("==" | "!=") relational }
//! relational := additive { ("<" | "<=" | ">" | ">=") additive }
//! additive   := term { ("+" | "-") term }
//! term       := unary { ("*" | "/" | "%") unary }
//! unary      := "-" unary | "+" unary | primary
//! primary    := number | ident | ident "(" args ")" | "(" expr ")"
//! ```
//!
//! Emits the flat postfix opcode stream directly; no AST survives compilation.

use crate::{Context, Func1, Func2, Op, Program};

#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at offset {position}")]
    UnexpectedChar { position: usize, ch: char },
    #[error("unexpected token '{found}' at offset {position}")]
    UnexpectedToken { position: usize, found: String },
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },
    #[error("function '{name}' takes {expected} argument(s), found {found}")]
    WrongArity {
        name: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
    Semi,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Num(v) => format!("{v}"),
            Token::Ident(s) => s.clone(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Percent => "%".into(),
            Token::Amp => "&".into(),
            Token::Pipe => "|".into(),
            Token::Assign => "=".into(),
            Token::Eq => "==".into(),
            Token::Ne => "!=".into(),
            Token::Lt => "<".into(),
            Token::Le => "<=".into(),
            Token::Gt => ">".into(),
            Token::Ge => ">=".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Comma => ",".into(),
            Token::Semi => ";".into(),
        }
    }
}

fn lex(source: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        // The loop only ever advances past ASCII bytes, so `i` stays on a
        // char boundary and this never splits a multi-byte sequence.
        let c = source[i..].chars().next().unwrap_or('\0');
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let text = &source[start..i];
                let value: f64 = text.parse().map_err(|_| ExprError::UnexpectedToken {
                    position: start,
                    found: text.to_string(),
                })?;
                tokens.push((Token::Num(value), start));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push((Token::Ident(source[start..i].to_ascii_lowercase()), start));
            }
            _ => {
                let two = source.get(i..i + 2).unwrap_or("");
                let (token, len) = match two {
                    "==" => (Token::Eq, 2),
                    "!=" => (Token::Ne, 2),
                    "<=" => (Token::Le, 2),
                    ">=" => (Token::Ge, 2),
                    "&&" => (Token::Amp, 2),
                    "||" => (Token::Pipe, 2),
                    _ => match c {
                        '+' => (Token::Plus, 1),
                        '-' => (Token::Minus, 1),
                        '*' => (Token::Star, 1),
                        '/' => (Token::Slash, 1),
                        '%' => (Token::Percent, 1),
                        '&' => (Token::Amp, 1),
                        '|' => (Token::Pipe, 1),
                        '=' => (Token::Assign, 1),
                        '<' => (Token::Lt, 1),
                        '>' => (Token::Gt, 1),
                        '(' => (Token::LParen, 1),
                        ')' => (Token::RParen, 1),
                        ',' => (Token::Comma, 1),
                        ';' => (Token::Semi, 1),
                        _ => return Err(ExprError::UnexpectedChar { position: i, ch: c }),
                    },
                };
                tokens.push((token, i));
                i += len;
            }
        }
    }
    Ok(tokens)
}

/// Tracks simulated stack depth while emitting so `Program::execute` can
/// preallocate its value stack.
struct Emitter {
    ops: Vec<Op>,
    depth: usize,
    max_depth: usize,
}

impl Emitter {
    fn new() -> Self {
        Self {
            ops: Vec::new(),
            depth: 0,
            max_depth: 0,
        }
    }

    fn emit(&mut self, op: Op) {
        let delta: isize = match &op {
            Op::Push(_) | Op::Load(_) => 1,
            Op::Store(_) | Op::Neg | Op::Call1(_) => 0,
            Op::Pop
            | Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::Call2(_) => -1,
            Op::Select => -2,
        };
        self.depth = (self.depth as isize + delta).max(0) as usize;
        self.max_depth = self.max_depth.max(self.depth);
        self.ops.push(op);
    }
}

struct Parser<'a> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    ctx: &'a mut Context,
    out: Emitter,
}

pub(crate) fn compile(ctx: &mut Context, source: &str) -> Result<Program, ExprError> {
    let tokens = lex(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        ctx,
        out: Emitter::new(),
    };
    parser.program()?;
    Ok(Program::from_ops(parser.out.ops, parser.out.max_depth))
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn error_here(&self) -> ExprError {
        match self.tokens.get(self.pos) {
            Some((token, position)) => ExprError::UnexpectedToken {
                position: *position,
                found: token.describe(),
            },
            None => ExprError::UnexpectedToken {
                position: self.tokens.last().map(|(_, p)| *p + 1).unwrap_or(0),
                found: "end of input".into(),
            },
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ExprError> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error_here())
        }
    }

    fn program(&mut self) -> Result<(), ExprError> {
        loop {
            while self.peek() == Some(&Token::Semi) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Ok(());
            }
            self.statement()?;
            match self.peek() {
                Some(Token::Semi) => {
                    self.pos += 1;
                }
                None => return Ok(()),
                Some(_) => return Err(self.error_here()),
            }
        }
    }

    fn statement(&mut self) -> Result<(), ExprError> {
        if let (Some(Token::Ident(name)), Some(Token::Assign)) = (self.peek(), self.peek2()) {
            let name = name.clone();
            self.pos += 2;
            self.expr()?;
            let var = self.ctx.register(&name);
            self.out.emit(Op::Store(var.0));
            self.out.emit(Op::Pop);
        } else {
            self.expr()?;
            self.out.emit(Op::Pop);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<(), ExprError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<(), ExprError> {
        self.and_expr()?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            self.and_expr()?;
            self.out.emit(Op::Call2(Func2::Bor));
        }
        Ok(())
    }

    fn and_expr(&mut self) -> Result<(), ExprError> {
        self.equality()?;
        while self.peek() == Some(&Token::Amp) {
            self.pos += 1;
            self.equality()?;
            self.out.emit(Op::Call2(Func2::Band));
        }
        Ok(())
    }

    fn equality(&mut self) -> Result<(), ExprError> {
        self.relational()?;
        loop {
            match self.peek() {
                Some(Token::Eq) => {
                    self.pos += 1;
                    self.relational()?;
                    self.out.emit(Op::Call2(Func2::Equal));
                }
                Some(Token::Ne) => {
                    self.pos += 1;
                    self.relational()?;
                    self.out.emit(Op::Call2(Func2::Equal));
                    // 1 - equal(a, b)
                    self.out.emit(Op::Push(1.0));
                    self.out.emit(Op::Sub);
                    self.out.emit(Op::Neg);
                }
                _ => return Ok(()),
            }
        }
    }

    fn relational(&mut self) -> Result<(), ExprError> {
        self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => Func2::Below,
                Some(Token::Gt) => Func2::Above,
                Some(Token::Le) | Some(Token::Ge) => {
                    // a <= b  ==  1 - above(a, b)
                    let is_le = self.peek() == Some(&Token::Le);
                    self.pos += 1;
                    self.additive()?;
                    self.out
                        .emit(Op::Call2(if is_le { Func2::Above } else { Func2::Below }));
                    self.out.emit(Op::Push(1.0));
                    self.out.emit(Op::Sub);
                    self.out.emit(Op::Neg);
                    continue;
                }
                _ => return Ok(()),
            };
            self.pos += 1;
            self.additive()?;
            self.out.emit(Op::Call2(op));
        }
    }

    fn additive(&mut self) -> Result<(), ExprError> {
        self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Op::Add,
                Some(Token::Minus) => Op::Sub,
                _ => return Ok(()),
            };
            self.pos += 1;
            self.term()?;
            self.out.emit(op);
        }
    }

    fn term(&mut self) -> Result<(), ExprError> {
        self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Op::Mul,
                Some(Token::Slash) => Op::Div,
                Some(Token::Percent) => Op::Mod,
                _ => return Ok(()),
            };
            self.pos += 1;
            self.unary()?;
            self.out.emit(op);
        }
    }

    fn unary(&mut self) -> Result<(), ExprError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.unary()?;
                self.out.emit(Op::Neg);
                Ok(())
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<(), ExprError> {
        match self.advance() {
            Some(Token::Num(value)) => {
                self.out.emit(Op::Push(value));
                Ok(())
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.call(&name)
                } else {
                    let var = self.ctx.register(&name);
                    self.out.emit(Op::Load(var.0));
                    Ok(())
                }
            }
            Some(Token::LParen) => {
                self.expr()?;
                self.expect(Token::RParen)
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error_here())
            }
        }
    }

    fn call(&mut self, name: &str) -> Result<(), ExprError> {
        let mut argc = 0;
        if self.peek() != Some(&Token::RParen) {
            loop {
                self.expr()?;
                argc += 1;
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;

        let arity = |expected: usize| -> Result<(), ExprError> {
            if argc == expected {
                Ok(())
            } else {
                Err(ExprError::WrongArity {
                    name: name.to_string(),
                    expected,
                    found: argc,
                })
            }
        };

        let one = |f: Func1| Op::Call1(f);
        let two = |f: Func2| Op::Call2(f);
        let op = match name {
            "sin" => one(Func1::Sin),
            "cos" => one(Func1::Cos),
            "tan" => one(Func1::Tan),
            "asin" => one(Func1::Asin),
            "acos" => one(Func1::Acos),
            "atan" => one(Func1::Atan),
            "sqrt" => one(Func1::Sqrt),
            "exp" => one(Func1::Exp),
            "log" => one(Func1::Log),
            "log10" => one(Func1::Log10),
            "abs" => one(Func1::Abs),
            "sign" => one(Func1::Sign),
            "int" => one(Func1::Int),
            "frac" => one(Func1::Frac),
            "rand" => one(Func1::Rand),
            "atan2" => two(Func2::Atan2),
            "pow" => two(Func2::Pow),
            "min" => two(Func2::Min),
            "max" => two(Func2::Max),
            "sigmoid" => two(Func2::Sigmoid),
            "band" => two(Func2::Band),
            "bor" => two(Func2::Bor),
            "equal" => two(Func2::Equal),
            "above" => two(Func2::Above),
            "below" => two(Func2::Below),
            "if" => {
                arity(3)?;
                self.out.emit(Op::Select);
                return Ok(());
            }
            _ => {
                return Err(ExprError::UnknownFunction {
                    name: name.to_string(),
                })
            }
        };
        match op {
            Op::Call1(_) => arity(1)?,
            Op::Call2(_) => arity(2)?,
            _ => unreachable!(),
        }
        self.out.emit(op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_two_char_operators() {
        let tokens = lex("a >= 1 && b != 2").expect("lex");
        let kinds: Vec<Token> = tokens.into_iter().map(|(t, _)| t).collect();
        assert!(kinds.contains(&Token::Ge));
        assert!(kinds.contains(&Token::Amp));
        assert!(kinds.contains(&Token::Ne));
    }

    #[test]
    fn rejects_stray_characters() {
        match lex("a = 1 @ 2") {
            Err(ExprError::UnexpectedChar { ch: '@', .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_multibyte_characters_without_panicking() {
        match lex("x = €1") {
            Err(ExprError::UnexpectedChar { ch: '€', position: 4 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
        // Multi-byte char in the final position, where the two-char
        // operator peek would slice past a boundary.
        assert!(lex("x = 1 ±").is_err());
    }

    #[test]
    fn wrong_arity_is_reported() {
        let mut ctx = Context::with_seed(1);
        let err = compile(&mut ctx, "x = pow(2);").unwrap_err();
        match err {
            ExprError::WrongArity {
                expected, found, ..
            } => {
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_semicolon_between_statements_fails() {
        let mut ctx = Context::with_seed(1);
        assert!(compile(&mut ctx, "x = 1 y = 2").is_err());
    }

    #[test]
    fn trailing_semicolon_optional() {
        let mut ctx = Context::with_seed(1);
        assert!(compile(&mut ctx, "x = 1").is_ok());
        assert!(compile(&mut ctx, "x = 1;;;").is_ok());
    }
}

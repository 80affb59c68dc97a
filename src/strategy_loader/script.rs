//! Parser and evaluator for the strategy script language.
//!
//! A submission is a list of imports followed by `strategy` blocks. Each
//! block is a sequence of `let` bindings and one final decision expression
//! that must evaluate to an action offered by the game:
//!
//! ```text
//! import random
//!
//! strategy CautiousBanker(Player):
//!     let lead = my_total - best_other
//!     if my_unbanked >= 20 or lead < -30 then bank else roll
//! ```
//!
//! The language has no loops and no user-defined functions, so evaluation is
//! structurally bounded; a fuel counter and a cancellation check on every
//! node guard against pathological nesting anyway. `let` names starting with
//! `_` persist across turns within one game (the strategy's scratch area) and
//! read as `0` before first assignment.

use std::collections::HashMap;

use anyhow::bail;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::isolation::CancelFlag;
use crate::strategy_loader::{DecideError, Decider, StateView};

/// Evaluation steps allowed per decision. Exhaustion is a contained strategy
/// runtime failure, never an engine fault.
const FUEL_PER_DECISION: u32 = 10_000;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Num(f64),
    Import,
    Strategy,
    Let,
    If,
    Then,
    Else,
    And,
    Or,
    Not,
    True,
    False,
    LParen,
    RParen,
    Colon,
    Comma,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

fn lex(source: &str) -> anyhow::Result<Vec<Tok>> {
    let mut toks = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' => {
                chars.next();
                toks.push(Tok::LParen);
            }
            ')' => {
                chars.next();
                toks.push(Tok::RParen);
            }
            ':' => {
                chars.next();
                toks.push(Tok::Colon);
            }
            ',' => {
                chars.next();
                toks.push(Tok::Comma);
            }
            '+' => {
                chars.next();
                toks.push(Tok::Plus);
            }
            '-' => {
                chars.next();
                toks.push(Tok::Minus);
            }
            '*' => {
                chars.next();
                toks.push(Tok::Star);
            }
            '/' => {
                chars.next();
                toks.push(Tok::Slash);
            }
            '%' => {
                chars.next();
                toks.push(Tok::Percent);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Eq);
                } else {
                    toks.push(Tok::Assign);
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Ne);
                } else {
                    bail!("unexpected '!' (use 'not' or '!=')");
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Le);
                } else {
                    toks.push(Tok::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Ge);
                } else {
                    toks.push(Tok::Gt);
                }
            }
            '0'..='9' => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match text.parse::<f64>() {
                    Ok(n) => toks.push(Tok::Num(n)),
                    Err(_) => bail!("invalid number literal '{text}'"),
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push(match text.as_str() {
                    "import" => Tok::Import,
                    "strategy" => Tok::Strategy,
                    "let" => Tok::Let,
                    "if" => Tok::If,
                    "then" => Tok::Then,
                    "else" => Tok::Else,
                    "and" => Tok::And,
                    "or" => Tok::Or,
                    "not" => Tok::Not,
                    "true" => Tok::True,
                    "false" => Tok::False,
                    _ => Tok::Ident(text),
                });
            }
            other => bail!("unexpected character '{other}'"),
        }
    }
    Ok(toks)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Num(f64),
    Bool(bool),
    Var(String),
    Call(String, Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// One `strategy Name(Parent): ...` block.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StrategyDef {
    pub(crate) name: String,
    /// Supertype the submitter declared. Recorded only; the loader rebinds
    /// every block to the built-in decision contract regardless.
    pub(crate) declared_parent: Option<String>,
    pub(crate) bindings: Vec<(String, Expr)>,
    pub(crate) decision: Expr,
}

/// A parsed submission: imports plus the strategy blocks it declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Module {
    pub(crate) imports: Vec<String>,
    pub(crate) strategies: HashMap<String, StrategyDef>,
}

impl Module {
    pub(crate) fn allows_rand(&self) -> bool {
        self.imports.iter().any(|i| i == "random")
    }
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect_ident(&mut self, what: &str) -> anyhow::Result<String> {
        match self.next() {
            Some(Tok::Ident(name)) => Ok(name),
            other => bail!("expected {what}, found {other:?}"),
        }
    }

    fn expect(&mut self, tok: Tok) -> anyhow::Result<()> {
        match self.next() {
            Some(t) if t == tok => Ok(()),
            other => bail!("expected {tok:?}, found {other:?}"),
        }
    }

    fn module(&mut self) -> anyhow::Result<Module> {
        let mut module = Module::default();
        while self.peek() == Some(&Tok::Import) {
            self.next();
            module.imports.push(self.expect_ident("import name")?);
        }
        while self.peek() == Some(&Tok::Strategy) {
            let def = self.strategy()?;
            if module.strategies.contains_key(&def.name) {
                bail!("strategy '{}' is declared twice", def.name);
            }
            module.strategies.insert(def.name.clone(), def);
        }
        if let Some(tok) = self.peek() {
            bail!("unexpected {tok:?} at top level");
        }
        if module.strategies.is_empty() {
            bail!("source declares no strategy block");
        }
        Ok(module)
    }

    fn strategy(&mut self) -> anyhow::Result<StrategyDef> {
        self.expect(Tok::Strategy)?;
        let name = self.expect_ident("strategy name")?;
        let declared_parent = if self.peek() == Some(&Tok::LParen) {
            self.next();
            let parent = self.expect_ident("supertype name")?;
            self.expect(Tok::RParen)?;
            Some(parent)
        } else {
            None
        };
        self.expect(Tok::Colon)?;

        let mut bindings = Vec::new();
        while self.peek() == Some(&Tok::Let) {
            self.next();
            let name = self.expect_ident("binding name")?;
            self.expect(Tok::Assign)?;
            bindings.push((name, self.expr()?));
        }
        let decision = self.expr()?;
        Ok(StrategyDef {
            name,
            declared_parent,
            bindings,
            decision,
        })
    }

    fn expr(&mut self) -> anyhow::Result<Expr> {
        if self.peek() == Some(&Tok::If) {
            self.next();
            let cond = self.expr()?;
            self.expect(Tok::Then)?;
            let then = self.expr()?;
            self.expect(Tok::Else)?;
            let alt = self.expr()?;
            return Ok(Expr::If(Box::new(cond), Box::new(then), Box::new(alt)));
        }
        self.or_expr()
    }

    fn or_expr(&mut self) -> anyhow::Result<Expr> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Tok::Or) {
            self.next();
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> anyhow::Result<Expr> {
        let mut lhs = self.not_expr()?;
        while self.peek() == Some(&Tok::And) {
            self.next();
            let rhs = self.not_expr()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> anyhow::Result<Expr> {
        if self.peek() == Some(&Tok::Not) {
            self.next();
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> anyhow::Result<Expr> {
        let lhs = self.sum()?;
        let op = match self.peek() {
            Some(Tok::Eq) => BinOp::Eq,
            Some(Tok::Ne) => BinOp::Ne,
            Some(Tok::Lt) => BinOp::Lt,
            Some(Tok::Le) => BinOp::Le,
            Some(Tok::Gt) => BinOp::Gt,
            Some(Tok::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.next();
        let rhs = self.sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn sum(&mut self) -> anyhow::Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.next();
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> anyhow::Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.next();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> anyhow::Result<Expr> {
        if self.peek() == Some(&Tok::Minus) {
            self.next();
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> anyhow::Result<Expr> {
        match self.next() {
            Some(Tok::Num(n)) => Ok(Expr::Num(n)),
            Some(Tok::True) => Ok(Expr::Bool(true)),
            Some(Tok::False) => Ok(Expr::Bool(false)),
            Some(Tok::LParen) => {
                let e = self.expr()?;
                self.expect(Tok::RParen)?;
                Ok(e)
            }
            Some(Tok::Ident(name)) => {
                if self.peek() == Some(&Tok::LParen) {
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Tok::RParen) {
                        loop {
                            args.push(self.expr()?);
                            if self.peek() == Some(&Tok::Comma) {
                                self.next();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Tok::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            other => bail!("expected an expression, found {other:?}"),
        }
    }
}

/// Parses a full submission into a [`Module`].
pub(crate) fn parse(source: &str) -> anyhow::Result<Module> {
    let toks = lex(source)?;
    Parser { toks, pos: 0 }.module()
}

/// True if any expression in `def` calls `rand`. Checked at load time so a
/// missing `import random` fails instantiation, not the first turn.
pub(crate) fn uses_rand(def: &StrategyDef) -> bool {
    fn walk(e: &Expr) -> bool {
        match e {
            Expr::Num(_) | Expr::Bool(_) | Expr::Var(_) => false,
            Expr::Call(name, args) => name == "rand" || args.iter().any(walk),
            Expr::Neg(e) | Expr::Not(e) => walk(e),
            Expr::Binary(_, a, b) => walk(a) || walk(b),
            Expr::If(c, t, e) => walk(c) || walk(t) || walk(e),
        }
    }
    def.bindings.iter().any(|(_, e)| walk(e)) || walk(&def.decision)
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Num(f64),
    Bool(bool),
    Action(String),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Num(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Action(_) => "action",
        }
    }
}

struct EvalCtx<'a> {
    view: &'a StateView<'a>,
    locals: &'a HashMap<String, Value>,
    scratch: &'a HashMap<String, Value>,
    rng: &'a mut ChaCha8Rng,
    allow_rand: bool,
    cancel: &'a CancelFlag,
    fuel: &'a mut u32,
}

fn script_err(msg: impl Into<String>) -> DecideError {
    DecideError::Script(msg.into())
}

fn eval(expr: &Expr, ctx: &mut EvalCtx<'_>) -> Result<Value, DecideError> {
    if ctx.cancel.is_cancelled() {
        return Err(DecideError::Interrupted);
    }
    if *ctx.fuel == 0 {
        return Err(script_err("evaluation fuel exhausted"));
    }
    *ctx.fuel -= 1;

    match expr {
        Expr::Num(n) => Ok(Value::Num(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Var(name) => lookup(name, ctx),
        Expr::Neg(e) => match eval(e, ctx)? {
            Value::Num(n) => Ok(Value::Num(-n)),
            other => Err(script_err(format!("cannot negate a {}", other.kind()))),
        },
        Expr::Not(e) => match eval(e, ctx)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(script_err(format!("'not' needs a boolean, got {}", other.kind()))),
        },
        Expr::If(cond, then, alt) => match eval(cond, ctx)? {
            Value::Bool(true) => eval(then, ctx),
            Value::Bool(false) => eval(alt, ctx),
            other => Err(script_err(format!(
                "'if' condition must be a boolean, got {}",
                other.kind()
            ))),
        },
        Expr::Binary(op, a, b) => eval_binary(*op, a, b, ctx),
        Expr::Call(name, args) => eval_call(name, args, ctx),
    }
}

fn lookup(name: &str, ctx: &EvalCtx<'_>) -> Result<Value, DecideError> {
    if let Some(v) = ctx.locals.get(name) {
        return Ok(v.clone());
    }
    if let Some(v) = ctx.scratch.get(name) {
        return Ok(v.clone());
    }
    if let Some(n) = ctx.view.var(name) {
        return Ok(Value::Num(n));
    }
    if ctx.view.is_action(name) {
        return Ok(Value::Action(name.to_string()));
    }
    if name.starts_with('_') {
        // scratch variables read as zero before first assignment
        return Ok(Value::Num(0.0));
    }
    Err(script_err(format!("undefined variable '{name}'")))
}

fn eval_binary(op: BinOp, a: &Expr, b: &Expr, ctx: &mut EvalCtx<'_>) -> Result<Value, DecideError> {
    // short-circuit forms first
    match op {
        BinOp::And | BinOp::Or => {
            let lhs = match eval(a, ctx)? {
                Value::Bool(b) => b,
                other => {
                    return Err(script_err(format!(
                        "logic operator needs booleans, got {}",
                        other.kind()
                    )))
                }
            };
            if (op == BinOp::And && !lhs) || (op == BinOp::Or && lhs) {
                return Ok(Value::Bool(lhs));
            }
            return match eval(b, ctx)? {
                Value::Bool(rhs) => Ok(Value::Bool(rhs)),
                other => Err(script_err(format!(
                    "logic operator needs booleans, got {}",
                    other.kind()
                ))),
            };
        }
        _ => {}
    }

    let lhs = eval(a, ctx)?;
    let rhs = eval(b, ctx)?;

    if matches!(op, BinOp::Eq | BinOp::Ne) {
        let equal = match (&lhs, &rhs) {
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Action(a), Value::Action(b)) => a == b,
            _ => {
                return Err(script_err(format!(
                    "cannot compare {} with {}",
                    lhs.kind(),
                    rhs.kind()
                )))
            }
        };
        return Ok(Value::Bool(if op == BinOp::Eq { equal } else { !equal }));
    }

    let (Value::Num(a), Value::Num(b)) = (&lhs, &rhs) else {
        return Err(script_err(format!(
            "arithmetic needs numbers, got {} and {}",
            lhs.kind(),
            rhs.kind()
        )));
    };
    let (a, b) = (*a, *b);
    Ok(match op {
        BinOp::Add => Value::Num(a + b),
        BinOp::Sub => Value::Num(a - b),
        BinOp::Mul => Value::Num(a * b),
        BinOp::Div => {
            if b == 0.0 {
                return Err(script_err("division by zero"));
            }
            Value::Num(a / b)
        }
        BinOp::Rem => {
            if b == 0.0 {
                return Err(script_err("remainder by zero"));
            }
            Value::Num(a % b)
        }
        BinOp::Lt => Value::Bool(a < b),
        BinOp::Le => Value::Bool(a <= b),
        BinOp::Gt => Value::Bool(a > b),
        BinOp::Ge => Value::Bool(a >= b),
        BinOp::And | BinOp::Or | BinOp::Eq | BinOp::Ne => unreachable!("handled above"),
    })
}

fn eval_call(name: &str, args: &[Expr], ctx: &mut EvalCtx<'_>) -> Result<Value, DecideError> {
    let mut nums = Vec::with_capacity(args.len());
    for arg in args {
        match eval(arg, ctx)? {
            Value::Num(n) => nums.push(n),
            other => {
                return Err(script_err(format!(
                    "'{name}' needs number arguments, got {}",
                    other.kind()
                )))
            }
        }
    }
    match (name, nums.as_slice()) {
        ("rand", [n]) => {
            if !ctx.allow_rand {
                return Err(script_err("'rand' requires 'import random'"));
            }
            let n = *n as i64;
            if n <= 0 {
                return Err(script_err("'rand(n)' needs n > 0"));
            }
            Ok(Value::Num(ctx.rng.gen_range(0..n) as f64))
        }
        ("min", [a, b]) => Ok(Value::Num(a.min(*b))),
        ("max", [a, b]) => Ok(Value::Num(a.max(*b))),
        ("abs", [a]) => Ok(Value::Num(a.abs())),
        _ => Err(script_err(format!(
            "unknown function '{name}' with {} argument(s)",
            nums.len()
        ))),
    }
}

/// A loaded script block bound to the decision contract.
///
/// Holds the per-game scratch area and a seeded RNG; both are reset by
/// [`begin_game`](Decider::begin_game).
pub(crate) struct ScriptStrategy {
    def: StrategyDef,
    allow_rand: bool,
    rng: ChaCha8Rng,
    scratch: HashMap<String, Value>,
}

impl ScriptStrategy {
    pub(crate) fn new(def: StrategyDef, allow_rand: bool) -> Self {
        Self {
            def,
            allow_rand,
            rng: ChaCha8Rng::seed_from_u64(0),
            scratch: HashMap::new(),
        }
    }
}

impl Decider for ScriptStrategy {
    fn begin_game(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.scratch.clear();
    }

    fn decide(&mut self, view: &StateView<'_>, cancel: &CancelFlag) -> Result<String, DecideError> {
        let mut fuel = FUEL_PER_DECISION;
        let mut locals: HashMap<String, Value> = HashMap::new();
        let mut scratch_updates: Vec<(String, Value)> = Vec::new();

        for (name, expr) in &self.def.bindings {
            let value = {
                let mut ctx = EvalCtx {
                    view,
                    locals: &locals,
                    scratch: &self.scratch,
                    rng: &mut self.rng,
                    allow_rand: self.allow_rand,
                    cancel,
                    fuel: &mut fuel,
                };
                eval(expr, &mut ctx)?
            };
            if name.starts_with('_') {
                scratch_updates.push((name.clone(), value.clone()));
            }
            locals.insert(name.clone(), value);
        }

        let decision = {
            let mut ctx = EvalCtx {
                view,
                locals: &locals,
                scratch: &self.scratch,
                rng: &mut self.rng,
                allow_rand: self.allow_rand,
                cancel,
                fuel: &mut fuel,
            };
            eval(&self.def.decision, &mut ctx)?
        };

        // commit scratch only once the whole turn evaluated
        for (name, value) in scratch_updates {
            self.scratch.insert(name, value);
        }

        match decision {
            Value::Action(action) => Ok(action),
            other => Err(script_err(format!(
                "decision evaluated to a {}, expected one of the offered actions",
                other.kind()
            ))),
        }
    }
}

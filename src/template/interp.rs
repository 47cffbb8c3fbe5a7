//! Compiles translated template lines into statements and runs them.
//!
//! Host lines form an indentation-structured program. Output directives are
//! statements of their own, nested wherever their indentation puts them.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use crate::error::TemplateError;
use crate::parser::node::Node;
use crate::parser::text::{escape_html, escape_markdown};
use crate::renderer::stream::{self, Sink};
use crate::template::expr::{self, BinOp, Expr, Parser, Token};
use crate::template::translate::{translate, LineKind, Segment, TranslatedLine};
use crate::template::value::Value;

const MAX_CALL_DEPTH: usize = 64;

/// A `def` block.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    body: Vec<Stmt>,
}

#[derive(Debug)]
enum Piece {
    Text(String),
    Expr(Expr),
}

#[derive(Debug)]
enum StmtKind {
    Emit(Vec<Piece>),
    Expr(Expr),
    Assign {
        target: String,
        op: Option<BinOp>,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Vec<Stmt>,
    },
    For {
        names: Vec<String>,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Def(Rc<Function>),
    Return(Option<Expr>),
    Pass,
    Break,
    Continue,
}

#[derive(Debug)]
struct Stmt {
    line: usize,
    kind: StmtKind,
}

fn width(line: &TranslatedLine) -> usize {
    line.indent.chars().count()
}

struct Compiler<'a> {
    template: &'a str,
    lines: Vec<TranslatedLine>,
    pos: usize,
}

impl Compiler<'_> {
    fn syntax(&self, line: usize, message: impl Into<String>) -> TemplateError {
        TemplateError::Syntax {
            template: self.template.to_string(),
            line,
            message: message.into(),
        }
    }

    fn block(&mut self, indent: usize) -> Result<Vec<Stmt>, TemplateError> {
        let mut stmts = Vec::new();
        while let Some(line) = self.lines.get(self.pos) {
            let (w, number) = (width(line), line.number);
            if w < indent {
                break;
            }
            if w > indent {
                return Err(self.syntax(number, "unexpected indent"));
            }
            stmts.push(self.statement(indent)?);
        }
        Ok(stmts)
    }

    /// The indented block under a header line.
    fn body(&mut self, header: usize, indent: usize) -> Result<Vec<Stmt>, TemplateError> {
        match self.lines.get(self.pos).map(width) {
            Some(w) if w > indent => self.block(w),
            _ => Err(self.syntax(header, "expected an indented block")),
        }
    }

    /// Parser over the next line if it is host code at `indent`.
    fn continuation(&self, indent: usize) -> Option<Parser> {
        let line = self.lines.get(self.pos)?;
        match &line.kind {
            LineKind::Host(text) if width(line) == indent => Parser::new(text).ok(),
            _ => None,
        }
    }

    fn statement(&mut self, indent: usize) -> Result<Stmt, TemplateError> {
        let line = self.lines[self.pos].clone();
        self.pos += 1;
        let number = line.number;
        let text = match line.kind {
            LineKind::Emit(segments) => {
                let mut pieces = Vec::with_capacity(segments.len());
                for segment in segments {
                    pieces.push(match segment {
                        Segment::Literal(text) => Piece::Text(text),
                        Segment::Expr(source) => Piece::Expr(
                            expr::parse(&source).map_err(|e| self.syntax(number, e))?,
                        ),
                    });
                }
                return Ok(Stmt {
                    line: number,
                    kind: StmtKind::Emit(pieces),
                });
            }
            LineKind::Host(text) => text,
        };

        let tokens = expr::tokenize(&text).map_err(|e| self.syntax(number, e))?;
        let keyword = match tokens.first() {
            Some(Token::Name(word)) => word.clone(),
            _ => String::new(),
        };
        let kind = match keyword.as_str() {
            "if" => self.if_chain(tokens, number, indent)?,
            "for" => {
                let mut p = Parser::from_tokens(tokens);
                let parsed = (|| {
                    p.expect_keyword("for")?;
                    let mut names = vec![p.expect_name()?];
                    while p.eat_op(",") {
                        names.push(p.expect_name()?);
                    }
                    p.expect_keyword("in")?;
                    let iter = p.expression()?;
                    p.expect_op(":")?;
                    p.expect_end()?;
                    Ok::<_, String>((names, iter))
                })();
                let (names, iter) = parsed.map_err(|e| self.syntax(number, e))?;
                let body = self.body(number, indent)?;
                StmtKind::For { names, iter, body }
            }
            "def" => {
                let mut p = Parser::from_tokens(tokens);
                let parsed = (|| {
                    p.expect_keyword("def")?;
                    let name = p.expect_name()?;
                    p.expect_op("(")?;
                    let mut params = Vec::new();
                    while !p.eat_op(")") {
                        params.push(p.expect_name()?);
                        if !p.eat_op(",") {
                            p.expect_op(")")?;
                            break;
                        }
                    }
                    p.expect_op(":")?;
                    p.expect_end()?;
                    Ok::<_, String>((name, params))
                })();
                let (name, params) = parsed.map_err(|e| self.syntax(number, e))?;
                let body = self.body(number, indent)?;
                StmtKind::Def(Rc::new(Function { name, params, body }))
            }
            "return" => {
                let mut p = Parser::from_tokens(tokens[1..].to_vec());
                let value = if p.at_end() {
                    None
                } else {
                    let value = p.expression().map_err(|e| self.syntax(number, e))?;
                    p.expect_end().map_err(|e| self.syntax(number, e))?;
                    Some(value)
                };
                StmtKind::Return(value)
            }
            word @ ("pass" | "break" | "continue") => {
                if tokens.len() > 1 {
                    return Err(self.syntax(number, format!("unexpected text after `{}`", word)));
                }
                match word {
                    "pass" => StmtKind::Pass,
                    "break" => StmtKind::Break,
                    _ => StmtKind::Continue,
                }
            }
            word @ ("elif" | "else") => {
                return Err(self.syntax(number, format!("`{}` without a matching `if`", word)));
            }
            target if !target.is_empty() && !expr::is_keyword(target) && is_assignment(&tokens) => {
                let op = match tokens[1] {
                    Token::Op("+=") => Some(BinOp::Add),
                    Token::Op("-=") => Some(BinOp::Sub),
                    _ => None,
                };
                let mut p = Parser::from_tokens(tokens[2..].to_vec());
                let value = p.expression().map_err(|e| self.syntax(number, e))?;
                p.expect_end().map_err(|e| self.syntax(number, e))?;
                StmtKind::Assign {
                    target: target.to_string(),
                    op,
                    value,
                }
            }
            _ => {
                let mut p = Parser::from_tokens(tokens);
                let value = p.expression().map_err(|e| self.syntax(number, e))?;
                p.expect_end().map_err(|e| self.syntax(number, e))?;
                StmtKind::Expr(value)
            }
        };
        Ok(Stmt { line: number, kind })
    }

    fn if_chain(&mut self, tokens: Vec<Token>, number: usize, indent: usize) -> Result<StmtKind, TemplateError> {
        let mut p = Parser::from_tokens(tokens);
        let cond = header(&mut p, "if").map_err(|e| self.syntax(number, e))?;
        let mut branches = vec![(cond, self.body(number, indent)?)];
        let mut otherwise = Vec::new();

        while let Some(mut p) = self.continuation(indent) {
            let Some(line) = self.lines.get(self.pos).map(|l| l.number) else {
                break;
            };
            if matches!(p.peek(), Some(Token::Name(w)) if w == "elif") {
                let cond = header(&mut p, "elif").map_err(|e| self.syntax(line, e))?;
                self.pos += 1;
                branches.push((cond, self.body(line, indent)?));
            } else if p.eat_keyword("else") {
                p.expect_op(":").map_err(|e| self.syntax(line, e))?;
                p.expect_end().map_err(|e| self.syntax(line, e))?;
                self.pos += 1;
                otherwise = self.body(line, indent)?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, otherwise })
    }
}

/// `KEYWORD expr :`
fn header(p: &mut Parser, keyword: &str) -> Result<Expr, String> {
    p.expect_keyword(keyword)?;
    let cond = p.expression()?;
    p.expect_op(":")?;
    p.expect_end()?;
    Ok(cond)
}

/// Host code up to a `#` comment outside string literals.
fn strip_comment(text: &str) -> &str {
    let mut quote = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' => return text[..i].trim_end(),
            None => {}
        }
    }
    text
}

fn bracket_depth(text: &str) -> i64 {
    expr::tokenize(text)
        .map(|tokens| {
            tokens
                .iter()
                .map(|t| match t {
                    Token::Op("(" | "[" | "{") => 1,
                    Token::Op(")" | "]" | "}") => -1,
                    _ => 0,
                })
                .sum()
        })
        .unwrap_or(0)
}

/// Host lines with unclosed brackets continue on the following host lines.
fn join_continuations(lines: Vec<TranslatedLine>) -> Vec<TranslatedLine> {
    let mut joined: Vec<TranslatedLine> = Vec::with_capacity(lines.len());
    let mut open = 0;
    for mut line in lines {
        if open > 0 {
            if let (Some(last), LineKind::Host(text)) = (joined.last_mut(), &line.kind) {
                if let LineKind::Host(head) = &mut last.kind {
                    let piece = strip_comment(text);
                    head.push(' ');
                    head.push_str(piece);
                    open += bracket_depth(piece);
                    continue;
                }
            }
        }
        open = match &mut line.kind {
            LineKind::Host(text) => {
                let code = strip_comment(text).to_string();
                let depth = bracket_depth(&code);
                if depth > 0 {
                    *text = code;
                }
                depth
            }
            LineKind::Emit(_) => 0,
        };
        joined.push(line);
    }
    joined
}

fn is_assignment(tokens: &[Token]) -> bool {
    matches!(tokens.get(1), Some(Token::Op("=" | "+=" | "-=")))
}

/// Functions a caller provides beyond the builtins.
pub trait Host {
    /// `None` when the host does not know `name`.
    fn call(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, String>>;
}

/// A host without functions of its own.
pub struct NoHost;

impl Host for NoHost {
    fn call(&mut self, _name: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        None
    }
}

/// Global bindings of a template run. Top-level assignments and `def`s of
/// the template land here.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    globals: HashMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn function(&self, name: &str) -> Option<Rc<Function>> {
        match self.globals.get(name) {
            Some(Value::Function(f)) => Some(f.clone()),
            _ => None,
        }
    }
}

/// A compiled template.
#[derive(Debug)]
pub struct Template {
    name: String,
    body: Vec<Stmt>,
}

impl Template {
    pub fn compile(name: &str, source: &str) -> Result<Self, TemplateError> {
        let lines: Vec<TranslatedLine> = translate(source)
            .into_iter()
            .filter(|line| match &line.kind {
                LineKind::Host(text) => !text.is_empty() && !text.starts_with('#'),
                LineKind::Emit(_) => true,
            })
            .collect();
        let lines = join_continuations(lines);
        let mut compiler = Compiler {
            template: name,
            lines,
            pos: 0,
        };
        let body = compiler.block(0)?;
        debug!(template = %name, statements = body.len(), "compiled template");
        Ok(Self {
            name: name.to_string(),
            body,
        })
    }

    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let source = fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::compile(&path.display().to_string(), &source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn execute(&self, env: &mut Environment, out: &mut dyn Sink) -> Result<(), TemplateError> {
        self.execute_with(env, out, &mut NoHost)
    }

    /// Runs the template with its output on standard output.
    pub fn execute_to_stdout(&self, env: &mut Environment) -> Result<(), TemplateError> {
        let mut out = stream::stdout();
        self.execute(env, &mut out)
    }

    pub fn execute_with(
        &self,
        env: &mut Environment,
        out: &mut dyn Sink,
        host: &mut dyn Host,
    ) -> Result<(), TemplateError> {
        let mut machine = Machine::new(&self.name, env, out, host);
        machine.run(&self.body)?;
        Ok(())
    }

    /// Calls the template function `name`, defined by a previous execution.
    pub fn call(
        &self,
        env: &mut Environment,
        name: &str,
        args: Vec<Value>,
        out: &mut dyn Sink,
        host: &mut dyn Host,
    ) -> Result<Value, TemplateError> {
        let func = env.function(name).ok_or_else(|| TemplateError::Runtime {
            template: self.name.clone(),
            line: 0,
            message: format!("no function `{}`", name),
        })?;
        let mut machine = Machine::new(&self.name, env, out, host);
        machine.call_function(&func, args)
    }
}

enum Flow {
    Next,
    Return(Value),
    Break,
    Continue,
}

struct Machine<'r> {
    template: &'r str,
    env: &'r mut Environment,
    out: &'r mut dyn Sink,
    host: &'r mut dyn Host,
    frames: Vec<HashMap<String, Value>>,
    line: usize,
}

impl<'r> Machine<'r> {
    fn new(
        template: &'r str,
        env: &'r mut Environment,
        out: &'r mut dyn Sink,
        host: &'r mut dyn Host,
    ) -> Self {
        Self {
            template,
            env,
            out,
            host,
            frames: Vec::new(),
            line: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Runtime {
            template: self.template.to_string(),
            line: self.line,
            message: message.into(),
        }
    }

    fn write(&mut self, text: &str) -> Result<(), TemplateError> {
        self.out.write_text(text).map_err(|source| TemplateError::Output {
            template: self.template.to_string(),
            line: self.line,
            source,
        })
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.frames
            .last()
            .and_then(|frame| frame.get(name))
            .or_else(|| self.env.globals.get(name))
            .cloned()
    }

    fn assign(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.insert(name.to_string(), value);
            }
            None => {
                self.env.globals.insert(name.to_string(), value);
            }
        }
    }

    fn run(&mut self, stmts: &[Stmt]) -> Result<Flow, TemplateError> {
        for stmt in stmts {
            self.line = stmt.line;
            let flow = self.exec(stmt)?;
            if !matches!(flow, Flow::Next) {
                return Ok(flow);
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, TemplateError> {
        match &stmt.kind {
            StmtKind::Emit(pieces) => {
                for piece in pieces {
                    match piece {
                        Piece::Text(text) => self.write(text)?,
                        Piece::Expr(expr) => {
                            let value = self.eval(expr)?;
                            self.write(&value.to_string())?;
                        }
                    }
                }
            }
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { target, op, value } => {
                let mut value = self.eval(value)?;
                if let Some(op) = op {
                    let current = self
                        .lookup(target)
                        .ok_or_else(|| self.error(format!("name `{}` is not defined", target)))?;
                    value = self.binary(*op, current, value)?;
                }
                self.assign(target, value);
            }
            StmtKind::If { branches, otherwise } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.is_truthy() {
                        return self.run(body);
                    }
                }
                return self.run(otherwise);
            }
            StmtKind::For { names, iter, body } => {
                let items = self.eval(iter)?;
                for item in self.iterate(items)? {
                    self.bind_loop(names, item)?;
                    match self.run(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Next | Flow::Continue => {}
                    }
                    self.line = stmt.line;
                }
            }
            StmtKind::Def(func) => self.assign(&func.name, Value::Function(func.clone())),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Next)
    }

    fn iterate(&self, value: Value) -> Result<Vec<Value>, TemplateError> {
        match value {
            Value::List(items) => Ok(items),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Map(entries) => Ok(entries.into_keys().map(Value::Str).collect()),
            Value::Node(node) => Ok(node.iter().map(Value::Node).collect()),
            other => Err(self.error(format!("cannot iterate over {}", other.type_name()))),
        }
    }

    fn bind_loop(&mut self, names: &[String], item: Value) -> Result<(), TemplateError> {
        if let [name] = names {
            self.assign(name, item);
            return Ok(());
        }
        match item {
            Value::List(values) if values.len() == names.len() => {
                for (name, value) in names.iter().zip(values) {
                    self.assign(name, value);
                }
                Ok(())
            }
            other => Err(self.error(format!(
                "cannot unpack {} into {} names",
                other.type_name(),
                names.len()
            ))),
        }
    }

    fn call_function(&mut self, func: &Rc<Function>, args: Vec<Value>) -> Result<Value, TemplateError> {
        if args.len() != func.params.len() {
            return Err(self.error(format!(
                "{}() takes {} arguments, {} given",
                func.name,
                func.params.len(),
                args.len()
            )));
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(self.error("maximum call depth exceeded"));
        }
        let frame = func.params.iter().cloned().zip(args).collect();
        self.frames.push(frame);
        let line = self.line;
        let result = self.run(&func.body);
        self.frames.pop();
        self.line = line;
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, TemplateError> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, TemplateError> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Name(name) => self
                .lookup(name)
                .ok_or_else(|| self.error(format!("name `{}` is not defined", name))),
            Expr::List(items) => Ok(Value::List(self.eval_all(items)?)),
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let key = match self.eval(key)? {
                        Value::Str(s) => s,
                        other => {
                            return Err(self.error(format!("map keys must be str, not {}", other.type_name())))
                        }
                    };
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            Expr::Field(target, field) => {
                let target = self.eval(target)?;
                self.field(target, field)
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(target, index).map_err(|e| self.error(e))
            }
            Expr::Call(callee, args) => self.eval_call(callee, args),
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| self.error("integer overflow")),
                other => Err(self.error(format!("bad operand type for unary -: {}", other.type_name()))),
            },
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Cond { then, cond, otherwise } => {
                if self.eval(cond)?.is_truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn field(&self, target: Value, field: &str) -> Result<Value, TemplateError> {
        match (&target, field) {
            (Value::Map(entries), _) => Ok(entries.get(field).cloned().unwrap_or_default()),
            (Value::Node(node), "tag") => Ok(Value::from(node.tag())),
            _ => Err(self.error(format!("{} has no field `{}`", target.type_name(), field))),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Value, TemplateError> {
        match callee {
            Expr::Field(target, method) => {
                let target = self.eval(target)?;
                let args = self.eval_all(args)?;
                call_method(target, method, &args).map_err(|e| self.error(e))
            }
            Expr::Name(name) => {
                let args = self.eval_all(args)?;
                let bound = self.lookup(name);
                if let Some(Value::Function(func)) = &bound {
                    return self.call_function(func, args);
                }
                if let Some(result) = builtin(name, &args) {
                    return result.map_err(|e| self.error(e));
                }
                if let Some(result) = self.host.call(name, &args) {
                    return result.map_err(|e| self.error(e));
                }
                match bound {
                    Some(other) => Err(self.error(format!("{} `{}` is not callable", other.type_name(), name))),
                    None => Err(self.error(format!("name `{}` is not defined", name))),
                }
            }
            other => match self.eval(other)? {
                Value::Function(func) => {
                    let args = self.eval_all(args)?;
                    self.call_function(&func, args)
                }
                value => Err(self.error(format!("{} is not callable", value.type_name()))),
            },
        }
    }

    fn binary(&self, op: BinOp, left: Value, right: Value) -> Result<Value, TemplateError> {
        let overflow = || self.error("integer overflow");
        let result = match (op, &left, &right) {
            (BinOp::Add, Value::Int(a), Value::Int(b)) => Value::Int(a.checked_add(*b).ok_or_else(overflow)?),
            (BinOp::Sub, Value::Int(a), Value::Int(b)) => Value::Int(a.checked_sub(*b).ok_or_else(overflow)?),
            (BinOp::Mul, Value::Int(a), Value::Int(b)) => Value::Int(a.checked_mul(*b).ok_or_else(overflow)?),
            (BinOp::Add, Value::Str(a), Value::Str(b)) => Value::Str(format!("{}{}", a, b)),
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                Value::List(a.iter().chain(b.iter()).cloned().collect())
            }
            (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
                Value::Str(s.repeat(usize::try_from(*n).unwrap_or(0)))
            }
            (BinOp::Eq, _, _) => Value::Bool(left == right),
            (BinOp::Ne, _, _) => Value::Bool(left != right),
            (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge, Value::Int(a), Value::Int(b)) => {
                Value::Bool(compare(op, a.cmp(b)))
            }
            (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge, Value::Str(a), Value::Str(b)) => {
                Value::Bool(compare(op, a.cmp(b)))
            }
            (BinOp::In, _, _) => Value::Bool(contains(&right, &left).map_err(|e| self.error(e))?),
            (BinOp::NotIn, _, _) => Value::Bool(!contains(&right, &left).map_err(|e| self.error(e))?),
            _ => {
                return Err(self.error(format!(
                    "unsupported operand types for {}: {} and {}",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                )))
            }
        };
        Ok(result)
    }
}

fn compare(op: BinOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        BinOp::Lt => ordering == Less,
        BinOp::Le => ordering != Greater,
        BinOp::Gt => ordering == Greater,
        BinOp::Ge => ordering != Less,
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, String> {
    match (haystack, needle) {
        (Value::Str(h), Value::Str(n)) => Ok(h.contains(n.as_str())),
        (Value::List(items), _) => Ok(items.contains(needle)),
        (Value::Map(entries), Value::Str(key)) => Ok(entries.contains_key(key)),
        _ => Err(format!(
            "`in` is not supported between {} and {}",
            needle.type_name(),
            haystack.type_name()
        )),
    }
}

/// Negative positions count from the end.
fn position(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

fn index_value(target: Value, index: Value) -> Result<Value, String> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => position(i, items.len())
            .map(|p| items[p].clone())
            .ok_or_else(|| format!("list index {} out of range", i)),
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            position(i, chars.len())
                .map(|p| Value::Str(chars[p].to_string()))
                .ok_or_else(|| format!("string index {} out of range", i))
        }
        (Value::Map(entries), Value::Str(key)) => entries
            .get(&key)
            .cloned()
            .ok_or_else(|| format!("key `{}` not found", key)),
        (Value::Node(node), Value::Int(i)) => {
            let children: Vec<Node> = node.iter().collect();
            Ok(Value::Node(
                position(i, children.len())
                    .map(|p| children[p].clone())
                    .unwrap_or_default(),
            ))
        }
        (target, index) => Err(format!(
            "{} cannot be indexed by {}",
            target.type_name(),
            index.type_name()
        )),
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(format!("{}() takes {} arguments, {} given", name, expected, args.len()));
    }
    Ok(())
}

fn str_arg<'v>(name: &str, args: &'v [Value], i: usize) -> Result<&'v str, String> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(format!("{}() expects str, not {}", name, other.type_name())),
        None => Ok(""),
    }
}

fn int_arg(name: &str, args: &[Value], i: usize) -> Result<i64, String> {
    args.get(i)
        .and_then(Value::as_int)
        .ok_or_else(|| format!("{}() expects an int", name))
}

/// Builtin functions; `None` if `name` is not one.
fn builtin(name: &str, args: &[Value]) -> Option<Result<Value, String>> {
    let result = match name {
        "str" => arity(name, args, 1, 1).map(|_| Value::Str(args[0].to_string())),
        "len" => arity(name, args, 1, 1).and_then(|_| match &args[0] {
            Value::Str(s) => Ok(Value::from(s.chars().count())),
            Value::List(items) => Ok(Value::from(items.len())),
            Value::Map(entries) => Ok(Value::from(entries.len())),
            Value::Node(node) => Ok(Value::from(node.iter().count())),
            other => Err(format!("{} has no len()", other.type_name())),
        }),
        "join" => arity(name, args, 1, 2).and_then(|_| {
            let sep = str_arg(name, args, 1)?;
            match &args[0] {
                Value::List(items) => Ok(Value::Str(
                    items.iter().map(Value::to_string).collect::<Vec<_>>().join(sep),
                )),
                other => Err(format!("join() expects a list, not {}", other.type_name())),
            }
        }),
        "range" => arity(name, args, 1, 2).and_then(|_| {
            let (start, end) = if args.len() == 1 {
                (0, int_arg(name, args, 0)?)
            } else {
                (int_arg(name, args, 0)?, int_arg(name, args, 1)?)
            };
            Ok(Value::List((start..end).map(Value::Int).collect()))
        }),
        "repeat" => arity(name, args, 2, 2).and_then(|_| {
            let text = args[0].to_string();
            let count = int_arg(name, args, 1)?;
            Ok(Value::Str(text.repeat(usize::try_from(count).unwrap_or(0))))
        }),
        "upper" => arity(name, args, 1, 1).map(|_| Value::Str(args[0].to_string().to_uppercase())),
        "lower" => arity(name, args, 1, 1).map(|_| Value::Str(args[0].to_string().to_lowercase())),
        "strip" => arity(name, args, 1, 1).map(|_| Value::Str(args[0].to_string().trim().to_string())),
        "escape_html" => arity(name, args, 1, 1).map(|_| Value::Str(escape_html(&args[0].to_string()))),
        "escape_markdown" => {
            arity(name, args, 1, 1).map(|_| Value::Str(escape_markdown(&args[0].to_string())))
        }
        _ => return None,
    };
    Some(result)
}

fn call_method(target: Value, method: &str, args: &[Value]) -> Result<Value, String> {
    match target {
        Value::Node(node) => node_method(&node, method, args),
        Value::Str(s) => str_method(&s, method, args),
        Value::Map(entries) => match method {
            "get" => {
                arity(method, args, 1, 2)?;
                let key = str_arg(method, args, 0)?;
                Ok(entries
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| args.get(1).cloned().unwrap_or_default()))
            }
            "keys" => Ok(Value::List(entries.into_keys().map(Value::Str).collect())),
            "values" => Ok(Value::List(entries.into_values().collect())),
            "items" => Ok(Value::List(
                entries
                    .into_iter()
                    .map(|(k, v)| Value::List(vec![Value::Str(k), v]))
                    .collect(),
            )),
            _ => Err(format!("map has no method `{}`", method)),
        },
        other => Err(format!("{} has no method `{}`", other.type_name(), method)),
    }
}

fn node_method(node: &Node, method: &str, args: &[Value]) -> Result<Value, String> {
    arity(method, args, 0, 1)?;
    let path = str_arg(method, args, 0)?;
    match method {
        "attr" => {
            arity(method, args, 1, 1)?;
            Ok(Value::from(node.attr(path)))
        }
        "child" => Ok(Value::Node(node.child(path))),
        "children" => Ok(Value::from(node.children(path))),
        "tag_name" => Ok(Value::Str(node.tag_name(path))),
        "text" => Ok(Value::Str(node.text(path))),
        "raw_text" => Ok(Value::Str(node.raw_text(path))),
        "trimmed_text" => Ok(Value::Str(node.trimmed_text(path))),
        _ => Err(format!("node has no method `{}`", method)),
    }
}

fn str_method(s: &str, method: &str, args: &[Value]) -> Result<Value, String> {
    let result = match method {
        "strip" => Value::from(s.trim()),
        "lstrip" => Value::from(s.trim_start()),
        "rstrip" => Value::from(s.trim_end()),
        "upper" => Value::Str(s.to_uppercase()),
        "lower" => Value::Str(s.to_lowercase()),
        "replace" => {
            arity(method, args, 2, 2)?;
            Value::Str(s.replace(str_arg(method, args, 0)?, str_arg(method, args, 1)?))
        }
        "startswith" => {
            arity(method, args, 1, 1)?;
            Value::Bool(s.starts_with(str_arg(method, args, 0)?))
        }
        "endswith" => {
            arity(method, args, 1, 1)?;
            Value::Bool(s.ends_with(str_arg(method, args, 0)?))
        }
        "split" => {
            arity(method, args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                Some(_) => s.split(str_arg(method, args, 0)?).map(Value::from).collect(),
                None => s.split_whitespace().map(Value::from).collect(),
            };
            Value::List(parts)
        }
        "join" => {
            arity(method, args, 1, 1)?;
            match &args[0] {
                Value::List(items) => Value::Str(
                    items.iter().map(Value::to_string).collect::<Vec<_>>().join(s),
                ),
                other => return Err(format!("join() expects a list, not {}", other.type_name())),
            }
        }
        _ => return Err(format!("str has no method `{}`", method)),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::node::NodeBuilder;

    fn run(source: &str) -> String {
        run_with(source, Environment::new())
    }

    fn run_with(source: &str, mut env: Environment) -> String {
        let template = Template::compile("test", source).unwrap();
        let mut out = String::new();
        template.execute(&mut env, &mut out).unwrap();
        out
    }

    fn failure(source: &str) -> TemplateError {
        let template = match Template::compile("test", source) {
            Ok(t) => t,
            Err(e) => return e,
        };
        let mut out = String::new();
        template
            .execute(&mut Environment::new(), &mut out)
            .expect_err("template should fail")
    }

    #[test]
    fn test_assignment_then_directive() {
        assert_eq!(run("x = 1\n: value is ${x}\n"), "value is 1\n");
    }

    #[test]
    fn test_conditionals_nest_directives() {
        let source = "\
for n in range(4):
    if n == 0:
        : zero
    elif n < 2:
        : one
    else:
        : many ${n}
";
        assert_eq!(run(source), "zero\none\nmany 2\nmany 3\n");
    }

    #[test]
    fn test_functions_and_return() {
        let source = "\
# helpers
def greet(who):
    : hello ${who}
    return len(who)

n = greet(\"world\")
: ${n}
";
        assert_eq!(run(source), "hello world\n5\n");
    }

    #[test]
    fn test_locals_do_not_leak() {
        let source = "\
x = 'global'
def f():
    x = 'local'
    return x
: ${f()} ${x}
";
        assert_eq!(run(source), "local global\n");
    }

    #[test]
    fn test_break_continue_and_unpacking() {
        let source = "\
for k, v in {'a': 1, 'b': 2, 'c': 3}.items():
    if k == 'b':
        continue
    if k == 'c':
        break
    : ${k}=${v}
";
        assert_eq!(run(source), "a=1\n");
    }

    #[test]
    fn test_expressions() {
        let source = "\
items = ['a', 'b'] + ['c']
total = 0
total += 2 * 3
: ${join(items, ', ')} ${total} ${'b' in items} ${'z' not in items}
: ${'yes' if total > 5 else 'no'} ${None or 'fallback'} ${'-' * 3}
: ${'  pad '.strip().upper()} ${'a.b'.split('.')} ${items[-1]}
";
        assert_eq!(
            run(source),
            "a, b, c 6 True True\nyes fallback ---\nPAD [a, b] c\n"
        );
    }

    #[test]
    fn test_bound_values_and_nodes() {
        let node = NodeBuilder::new("memberdef")
            .attr("kind", "function")
            .child(NodeBuilder::new("name").text(" area ").build())
            .build();
        let env = Environment::new()
            .with("elem", node)
            .with("conf", Value::Map(BTreeMap::new()));
        let source = ": ${elem.tag} ${elem.attr('kind')} [${elem.trimmed_text('name')}] [${conf.missing}]\n";
        assert_eq!(run_with(source, env), "memberdef function [area] []\n");
    }

    #[test]
    fn test_globals_survive_execution() {
        let template = Template::compile("t", "def hook(x):\n    : <${x}>\nmode = 'md'\n").unwrap();
        let mut env = Environment::new();
        let mut out = String::new();
        template.execute(&mut env, &mut out).unwrap();
        assert_eq!(env.get("mode"), Some(&Value::from("md")));

        template
            .call(&mut env, "hook", vec![Value::from("a")], &mut out, &mut NoHost)
            .unwrap();
        assert_eq!(out, "<a>\n");
    }

    #[test]
    fn test_host_functions() {
        struct Shout;
        impl Host for Shout {
            fn call(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
                (name == "shout").then(|| Ok(Value::Str(args[0].to_string().to_uppercase() + "!")))
            }
        }
        let template = Template::compile("t", ": ${shout('hi')}\n").unwrap();
        let mut out = String::new();
        template
            .execute_with(&mut Environment::new(), &mut out, &mut Shout)
            .unwrap();
        assert_eq!(out, "HI!\n");
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        match failure("x = 1\n\n: ${missing}\n") {
            TemplateError::Runtime { line, message, .. } => {
                assert_eq!(line, 3);
                assert!(message.contains("missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
        match failure("if x\n    pass\n") {
            TemplateError::Syntax { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other}"),
        }
        match failure("x = 1\n    y = 2\n") {
            TemplateError::Syntax { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("indent"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(failure(": ${1 + 'a'}\n"), TemplateError::Runtime { .. }));
        assert!(matches!(failure("else:\n    pass\n"), TemplateError::Syntax { .. }));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        assert_eq!(run("x = 0 - 9223372036854775807\n: ${-x}\n"), "9223372036854775807\n");
        match failure("x = 0 - 9223372036854775807 - 1\n: ${-x}\n") {
            TemplateError::Runtime { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("integer overflow"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            failure(": ${9223372036854775807 + 1}\n"),
            TemplateError::Runtime { .. }
        ));
    }

    #[test]
    fn test_bracketed_lines_continue() {
        let source = "\
rules = {
    'a': 'x',  # first
    'b': '#',
}
: ${rules.a}${rules.b} ${len(rules)}
";
        assert_eq!(run(source), "x# 2\n");
    }

    #[test]
    fn test_runaway_recursion_is_an_error() {
        let err = failure("def f():\n    return f()\nf()\n");
        assert!(err.to_string().contains("call depth"));
    }
}

//! In-process expression language backend.
//!
//! A small, dynamically typed language meant for glue scripts and services:
//!
//! ```text
//! let greeting = concat("hello ", uppercase(name));
//! {greet: |who| concat(greeting, " and ", who), size: len(greeting)}
//! ```
//!
//! Programs are parsed once at compile time and evaluated against a fresh
//! namespace per call, so compiled handles are reentrant. `obj.f(x)` calls the
//! function stored under `f` when `obj` is a map holding one, and the builtin
//! `f(obj, x)` otherwise.

pub mod builtins;
pub mod eval;
pub mod lexer;
pub mod parser;

use std::sync::Arc;

use async_trait::async_trait;

use crate::sandbox::Sandbox;
use crate::value::{Namespace, Value};

use super::backend::{BackendError, Executable, ExecutionBackend};
use eval::Interpreter;
use lexer::Lexer;
use parser::{Expr, Parser};

#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
}

impl From<ExprError> for BackendError {
    fn from(err: ExprError) -> Self {
        BackendError::Compile(err.to_string())
    }
}

/// Parse `source` into a program.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    Parser::new(Lexer::new(source).tokenize()?).parse_program()
}

#[derive(Debug, Default)]
pub struct ExprBackend;

impl ExprBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionBackend for ExprBackend {
    fn name(&self) -> &str {
        "expr"
    }

    fn aliases(&self) -> &[&str] {
        &["expression"]
    }

    fn compile(
        &self,
        source: &str,
        sandbox: &Arc<Sandbox>,
    ) -> Result<Option<Arc<dyn Executable>>, BackendError> {
        let program = Arc::new(parse(source)?);
        Ok(Some(Arc::new(CompiledExpr {
            program,
            interpreter: Interpreter::new(Arc::clone(sandbox)),
        })))
    }

    async fn eval(
        &self,
        source: &str,
        namespace: Namespace,
        sandbox: &Arc<Sandbox>,
    ) -> Result<Value, BackendError> {
        let program = parse(source)?;
        Interpreter::new(Arc::clone(sandbox)).run(&program, namespace)
    }
}

struct CompiledExpr {
    program: Arc<Expr>,
    interpreter: Arc<Interpreter>,
}

#[async_trait]
impl Executable for CompiledExpr {
    async fn run(&self, namespace: Namespace) -> Result<Value, BackendError> {
        self.interpreter.run(&self.program, namespace)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

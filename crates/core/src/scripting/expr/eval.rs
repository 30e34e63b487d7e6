//! Tree-walking evaluator.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::sandbox::Sandbox;
use crate::scripting::backend::BackendError;
use crate::value::{Callable, Namespace, Value};

use super::builtins;
use super::parser::{BinaryOp, Expr, Literal, Stmt, UnaryOp};

/// Lexical scope. `let` and lambda calls push a child scope.
pub struct Env {
    vars: HashMap<String, Value>,
    parent: Option<Arc<Env>>,
}

impl Env {
    fn root(namespace: Namespace) -> Arc<Self> {
        Arc::new(Self {
            vars: namespace.into_iter().collect(),
            parent: None,
        })
    }

    fn child(parent: &Arc<Env>, vars: HashMap<String, Value>) -> Arc<Self> {
        Arc::new(Self {
            vars,
            parent: Some(Arc::clone(parent)),
        })
    }

    fn get(&self, name: &str) -> Option<&Value> {
        match self.vars.get(name) {
            Some(value) => Some(value),
            None => self.parent.as_ref().and_then(|parent| parent.get(name)),
        }
    }
}

/// Evaluates programs for one sandbox. Lambdas keep a handle to the
/// interpreter that created them so builtins keep resolving through the
/// defining script's sandbox when called from elsewhere.
pub struct Interpreter {
    sandbox: Arc<Sandbox>,
}

impl Interpreter {
    pub fn new(sandbox: Arc<Sandbox>) -> Arc<Self> {
        Arc::new(Self { sandbox })
    }

    /// Evaluate `program` with `namespace` as the outermost scope.
    pub fn run(self: &Arc<Self>, program: &Expr, namespace: Namespace) -> Result<Value, BackendError> {
        self.eval(program, &Env::root(namespace))
    }

    fn eval(self: &Arc<Self>, expr: &Expr, env: &Arc<Env>) -> Result<Value, BackendError> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Identifier(name) => self.lookup(name, env),
            Expr::List(items) => Ok(Value::List(self.eval_all(items, env)?)),
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(value, env)?);
                }
                Ok(Value::Map(map))
            }
            Expr::Lambda { params, body } => Ok(Value::Function(Arc::new(Lambda {
                params: params.clone(),
                body: Arc::clone(body),
                env: Arc::clone(env),
                interpreter: Arc::clone(self),
            }))),
            Expr::Block(statements) => self.eval_block(statements, env),
            Expr::Unary { operator, operand } => {
                let value = self.eval(operand, env)?;
                unary(*operator, value)
            }
            Expr::Binary {
                left,
                operator: BinaryOp::And,
                right,
            } => Ok(Value::Bool(
                self.eval(left, env)?.is_truthy() && self.eval(right, env)?.is_truthy(),
            )),
            Expr::Binary {
                left,
                operator: BinaryOp::Or,
                right,
            } => Ok(Value::Bool(
                self.eval(left, env)?.is_truthy() || self.eval(right, env)?.is_truthy(),
            )),
            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                binary(*operator, left, right)
            }
            Expr::Member { object, property } => match self.eval(object, env)? {
                Value::Map(mut entries) => Ok(entries.remove(property).unwrap_or_default()),
                other => Err(runtime(format!(
                    "cannot access member '{property}' of a {}",
                    other.type_name()
                ))),
            },
            Expr::Call { callee, args } => {
                let args = self.eval_all(args, env)?;
                // Builtins are called directly unless shadowed by a binding.
                if let Expr::Identifier(name) = callee.as_ref() {
                    if env.get(name).is_none() && builtins::exists(name) {
                        return builtins::call(name, args, &self.sandbox);
                    }
                }
                match self.eval(callee, env)? {
                    Value::Function(function) => function.call(args),
                    other => Err(runtime(format!("a {} is not callable", other.type_name()))),
                }
            }
            Expr::MethodCall {
                object,
                method,
                args,
            } => {
                let object = self.eval(object, env)?;
                let mut args = self.eval_all(args, env)?;
                if let Value::Map(entries) = &object {
                    match entries.get(method) {
                        Some(Value::Function(function)) => return function.call(args),
                        Some(other) => {
                            return Err(runtime(format!(
                                "member '{method}' is a {}, not a function",
                                other.type_name()
                            )))
                        }
                        None => {}
                    }
                }
                if builtins::exists(method) {
                    args.insert(0, object);
                    return builtins::call(method, args, &self.sandbox);
                }
                Err(runtime(format!(
                    "no method '{method}' on a {}",
                    object.type_name()
                )))
            }
        }
    }

    fn eval_all(self: &Arc<Self>, exprs: &[Expr], env: &Arc<Env>) -> Result<Vec<Value>, BackendError> {
        exprs.iter().map(|expr| self.eval(expr, env)).collect()
    }

    fn eval_block(self: &Arc<Self>, statements: &[Stmt], env: &Arc<Env>) -> Result<Value, BackendError> {
        let mut scope = Arc::clone(env);
        let mut last = Value::Null;
        for statement in statements {
            match statement {
                Stmt::Let { name, value } => {
                    let value = self.eval(value, &scope)?;
                    scope = Env::child(&scope, HashMap::from([(name.clone(), value)]));
                    last = Value::Null;
                }
                Stmt::Expr(expr) => last = self.eval(expr, &scope)?,
            }
        }
        Ok(last)
    }

    fn lookup(self: &Arc<Self>, name: &str, env: &Arc<Env>) -> Result<Value, BackendError> {
        if let Some(value) = env.get(name) {
            return Ok(value.clone());
        }
        match builtins::lookup(name) {
            Some(builtin) => Ok(Value::Function(Arc::new(BuiltinRef {
                name: builtin,
                sandbox: Arc::clone(&self.sandbox),
            }))),
            None => Err(runtime(format!("unknown name '{name}'"))),
        }
    }
}

/// A closure over the scope it was defined in.
struct Lambda {
    params: Vec<String>,
    body: Arc<Expr>,
    env: Arc<Env>,
    interpreter: Arc<Interpreter>,
}

impl Callable for Lambda {
    fn call(&self, args: Vec<Value>) -> Result<Value, BackendError> {
        if args.len() != self.params.len() {
            return Err(runtime(format!(
                "function expects {} argument(s), got {}",
                self.params.len(),
                args.len()
            )));
        }
        let scope = Env::child(&self.env, self.params.iter().cloned().zip(args).collect());
        self.interpreter.eval(&self.body, &scope)
    }

    fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A builtin used as a value, e.g. passed to another function.
struct BuiltinRef {
    name: &'static str,
    sandbox: Arc<Sandbox>,
}

impl Callable for BuiltinRef {
    fn call(&self, args: Vec<Value>) -> Result<Value, BackendError> {
        builtins::call(self.name, args, &self.sandbox)
    }

    fn arity(&self) -> usize {
        1
    }
}

pub(crate) fn runtime(message: impl Into<String>) -> BackendError {
    BackendError::Runtime(message.into())
}

fn unary(operator: UnaryOp, value: Value) -> Result<Value, BackendError> {
    match (operator, value) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Negate, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| runtime("integer overflow")),
        (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Negate, other) => Err(runtime(format!("cannot negate a {}", other.type_name()))),
    }
}

fn binary(operator: BinaryOp, left: Value, right: Value) -> Result<Value, BackendError> {
    use BinaryOp::*;

    match operator {
        Equal => return Ok(Value::Bool(left == right)),
        NotEqual => return Ok(Value::Bool(left != right)),
        _ => {}
    }

    match (operator, left, right) {
        (Add, Value::Str(a), b) => Ok(Value::Str(a + &b.render())),
        (Add, a, Value::Str(b)) => Ok(Value::Str(a.render() + &b)),
        (Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (Less | LessEqual | Greater | GreaterEqual, Value::Str(a), Value::Str(b)) => {
            Ok(Value::Bool(compare(operator, a.cmp(&b))))
        }
        (op, Value::Int(a), Value::Int(b)) => integer(op, a, b),
        (op, a, b) => match (as_float(&a), as_float(&b)) {
            (Some(x), Some(y)) => float(op, x, y),
            _ => Err(runtime(format!(
                "unsupported operands for {op:?}: {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn integer(operator: BinaryOp, a: i64, b: i64) -> Result<Value, BackendError> {
    use BinaryOp::*;

    let checked = match operator {
        Add => a.checked_add(b),
        Subtract => a.checked_sub(b),
        Multiply => a.checked_mul(b),
        Divide | Modulo if b == 0 => return Err(runtime("division by zero")),
        Divide => a.checked_div(b),
        Modulo => a.checked_rem(b),
        _ => return Ok(Value::Bool(compare(operator, a.cmp(&b)))),
    };
    checked.map(Value::Int).ok_or_else(|| runtime("integer overflow"))
}

fn float(operator: BinaryOp, a: f64, b: f64) -> Result<Value, BackendError> {
    use BinaryOp::*;

    Ok(match operator {
        Add => Value::Float(a + b),
        Subtract => Value::Float(a - b),
        Multiply => Value::Float(a * b),
        Divide => Value::Float(a / b),
        Modulo => Value::Float(a % b),
        _ => match a.partial_cmp(&b) {
            Some(ordering) => Value::Bool(compare(operator, ordering)),
            None => Value::Bool(false),
        },
    })
}

fn compare(operator: BinaryOp, ordering: std::cmp::Ordering) -> bool {
    match operator {
        BinaryOp::Less => ordering.is_lt(),
        BinaryOp::LessEqual => ordering.is_le(),
        BinaryOp::Greater => ordering.is_gt(),
        BinaryOp::GreaterEqual => ordering.is_ge(),
        _ => false,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::scripting::expr::parse;
    use crate::scripting::test_helpers::{host_sandbox, namespace};

    fn eval(source: &str, ns: Namespace) -> Result<Value, BackendError> {
        let program = parse(source).expect("parse");
        Interpreter::new(host_sandbox()).run(&program, ns)
    }

    fn eval_ok(source: &str) -> Value {
        eval(source, Namespace::new()).expect("eval")
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval_ok("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval_ok("(1 + 2) * 3"), Value::Int(9));
        assert_eq!(eval_ok("7 % 4 - -1"), Value::Int(4));
        assert_eq!(eval_ok("1 / 2.0"), Value::Float(0.5));
    }

    #[test]
    fn string_concatenation_renders_other_operand() {
        assert_eq!(eval_ok("'n=' + 3"), Value::from("n=3"));
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval_ok("1 < 2 && 'b' > 'a'"), Value::Bool(true));
        assert_eq!(eval_ok("[1, 2] == [1, 2]"), Value::Bool(true));
        assert_eq!(eval_ok("null || !true"), Value::Bool(false));
    }

    #[test]
    fn let_bindings_shadow_namespace() {
        let value = eval(
            "let x = x + 1; x * 10",
            namespace(&[("x", Value::Int(1))]),
        )
        .expect("eval");
        assert_eq!(value, Value::Int(20));
    }

    #[test]
    fn lambdas_capture_their_scope() {
        assert_eq!(
            eval_ok("let k = 10; let add = |n| n + k; add(5)"),
            Value::Int(15)
        );
    }

    #[test]
    fn member_access_on_maps() {
        assert_eq!(eval_ok("{a: {b: 2}}.a.b"), Value::Int(2));
        assert_eq!(eval_ok("{a: 1}.missing"), Value::Null);
    }

    #[test]
    fn method_syntax_falls_back_to_builtins() {
        assert_eq!(eval_ok("'  hi  '.trim().uppercase()"), Value::from("HI"));
    }

    #[test]
    fn map_functions_win_over_builtins() {
        assert_eq!(
            eval_ok("{uppercase: |s| 'custom'}.uppercase('x')"),
            Value::from("custom")
        );
    }

    #[test]
    fn builtins_can_be_passed_as_values() {
        assert_eq!(
            eval_ok("let apply = |f, v| f(v); apply(uppercase, 'x')"),
            Value::from("X")
        );
    }

    #[test]
    fn bindings_shadow_builtins() {
        let value = eval(
            "uppercase('x')",
            namespace(&[("uppercase", eval_ok("|s| 'shadowed'"))]),
        )
        .expect("eval");
        assert_eq!(value, Value::from("shadowed"));
    }

    #[test]
    fn runtime_errors() {
        assert_matches!(eval("nope", Namespace::new()), Err(BackendError::Runtime(msg)) if msg.contains("nope"));
        assert_matches!(eval("1 / 0", Namespace::new()), Err(BackendError::Runtime(_)));
        assert_matches!(eval("(|a| a)(1, 2)", Namespace::new()), Err(BackendError::Runtime(_)));
        assert_matches!(eval("3(1)", Namespace::new()), Err(BackendError::Runtime(_)));
        assert_matches!(eval("{a: 1}.a()", Namespace::new()), Err(BackendError::Runtime(_)));
    }
}

//! Evaluator for the runner's mini-language.
//!
//! The interpreter owns a persistent global namespace that survives across
//! `execute` calls within one runner lifetime. Two bindings are special:
//!
//! - `context`: the read-only document map loaded from the `init` frame
//! - `llm_query` / `FINAL`: host functions; `llm_query` suspends evaluation
//!   for a controller round trip, `FINAL` aborts the script with an answer
//!
//! Evaluation is async because `llm_query` awaits the host; recursion into
//! sub-expressions goes through boxed futures.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::parser::{BinOp, Expr, Stmt, UnaryOp, parse};
use crate::value::Value;

/// Host-side services available to evaluated code.
#[async_trait]
pub trait ReplHost: Send {
    /// Round-trip a sub-LLM call through the controller.
    ///
    /// A returned `Err` is a broken session (the controller went away);
    /// recoverable sub-call failures arrive as `Ok` with an error string,
    /// which the evaluated code observes as the call's return value.
    async fn llm_query(&mut self, instruction: &str, content: &str) -> Result<String, String>;
}

/// Outcome of evaluating one `execute` payload.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Captured `print` output.
    pub stdout: String,
    /// Diagnostics channel; unused by the evaluator itself.
    pub stderr: String,
    /// Value of the trailing expression statement.
    pub return_value: Value,
    /// Set when the script called `FINAL(value)`.
    pub final_answer: Option<String>,
    /// Set when parsing or evaluation failed.
    pub error: Option<String>,
}

/// Non-local exits during evaluation.
enum Interrupt {
    /// `FINAL(value)` was called.
    Final(Value),
    /// A runtime error; the message is shown to the model verbatim.
    Fail(String),
}

type Eval<T> = Result<T, Interrupt>;

fn fail(message: impl Into<String>) -> Interrupt {
    Interrupt::Fail(message.into())
}

/// Per-execute evaluation state: captured output plus the host channel.
struct ExecCx<'h> {
    stdout: String,
    host: &'h mut dyn ReplHost,
}

/// The persistent evaluator.
pub struct Interpreter {
    globals: HashMap<String, Value>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            globals: HashMap::new(),
        }
    }

    /// Bind the document corpus as the read-only `context` map.
    ///
    /// Insertion order is preserved; it must match the inventory order
    /// shown in the system prompt.
    pub fn load_documents(&mut self, documents: Vec<(String, String)>) {
        let entries = documents
            .into_iter()
            .map(|(name, content)| (name, Value::Str(content)))
            .collect();
        self.globals.insert("context".to_string(), Value::Map(entries));
    }

    /// True once `load_documents` ran.
    pub fn has_context(&self) -> bool {
        self.globals.contains_key("context")
    }

    /// Evaluate `code`, capturing output and the terminal signal.
    ///
    /// Never returns an error: failures are folded into `ExecOutput.error`
    /// so the controller can feed them back as an observation.
    pub async fn execute(&mut self, code: &str, host: &mut dyn ReplHost) -> ExecOutput {
        let stmts = match parse(code) {
            Ok(stmts) => stmts,
            Err(message) => {
                return ExecOutput {
                    error: Some(message),
                    ..ExecOutput::default()
                };
            }
        };

        let mut cx = ExecCx {
            stdout: String::new(),
            host,
        };
        let mut last_value = Value::Null;

        for stmt in &stmts {
            match self.exec_stmt(stmt, &mut cx).await {
                Ok(value) => last_value = value,
                Err(Interrupt::Final(value)) => {
                    return ExecOutput {
                        stdout: cx.stdout,
                        final_answer: Some(value.to_display_string()),
                        ..ExecOutput::default()
                    };
                }
                Err(Interrupt::Fail(message)) => {
                    return ExecOutput {
                        stdout: cx.stdout,
                        error: Some(message),
                        ..ExecOutput::default()
                    };
                }
            }
        }

        // REPL convention: a trailing expression statement is the result.
        let return_value = match stmts.last() {
            Some(Stmt::Expr(_)) => last_value,
            _ => Value::Null,
        };
        ExecOutput {
            stdout: cx.stdout,
            return_value,
            ..ExecOutput::default()
        }
    }

    async fn exec_stmt(&mut self, stmt: &Stmt, cx: &mut ExecCx<'_>) -> Eval<Value> {
        match stmt {
            Stmt::Assign { name, value } => {
                if name == "context" {
                    return Err(fail("TypeError: 'context' is read-only"));
                }
                let value = self.eval(value, cx).await?;
                self.globals.insert(name.clone(), value);
                Ok(Value::Null)
            }
            Stmt::Expr(expr) => self.eval(expr, cx).await,
        }
    }

    fn eval<'a, 'h: 'a>(
        &'a mut self,
        expr: &'a Expr,
        cx: &'a mut ExecCx<'h>,
    ) -> BoxFuture<'a, Eval<Value>> {
        Box::pin(async move {
            match expr {
                Expr::Null => Ok(Value::Null),
                Expr::Bool(b) => Ok(Value::Bool(*b)),
                Expr::Int(n) => Ok(Value::Int(*n)),
                Expr::Str(s) => Ok(Value::Str(s.clone())),
                Expr::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item, cx).await?);
                    }
                    Ok(Value::List(values))
                }
                Expr::Name(name) => self
                    .globals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| fail(format!("NameError: name '{}' is not defined", name))),
                Expr::Unary { op, operand } => {
                    let value = self.eval(operand, cx).await?;
                    match op {
                        UnaryOp::Neg => match value {
                            Value::Int(n) => checked(n.checked_neg(), "-"),
                            other => Err(fail(format!(
                                "TypeError: cannot negate {}",
                                other.type_name()
                            ))),
                        },
                        UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    }
                }
                Expr::Binary { op, left, right } => {
                    // Short-circuit forms first.
                    match op {
                        BinOp::And => {
                            let l = self.eval(left, cx).await?;
                            if !l.is_truthy() {
                                return Ok(l);
                            }
                            return self.eval(right, cx).await;
                        }
                        BinOp::Or => {
                            let l = self.eval(left, cx).await?;
                            if l.is_truthy() {
                                return Ok(l);
                            }
                            return self.eval(right, cx).await;
                        }
                        _ => {}
                    }
                    let l = self.eval(left, cx).await?;
                    let r = self.eval(right, cx).await?;
                    eval_binary(*op, l, r)
                }
                Expr::Index { target, index } => {
                    let target = self.eval(target, cx).await?;
                    let index = self.eval(index, cx).await?;
                    eval_index(target, index)
                }
                Expr::Slice { target, start, end } => {
                    let target = self.eval(target, cx).await?;
                    let start = match start {
                        Some(e) => Some(expect_int(self.eval(e, cx).await?, "slice start")?),
                        None => None,
                    };
                    let end = match end {
                        Some(e) => Some(expect_int(self.eval(e, cx).await?, "slice end")?),
                        None => None,
                    };
                    eval_slice(target, start, end)
                }
                Expr::Call { name, args } => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg, cx).await?);
                    }
                    self.call_builtin(name, values, cx).await
                }
            }
        })
    }

    async fn call_builtin(
        &mut self,
        name: &str,
        args: Vec<Value>,
        cx: &mut ExecCx<'_>,
    ) -> Eval<Value> {
        match name {
            "print" => {
                let rendered: Vec<String> =
                    args.iter().map(|v| v.to_display_string()).collect();
                cx.stdout.push_str(&rendered.join(" "));
                cx.stdout.push('\n');
                Ok(Value::Null)
            }
            "FINAL" => {
                let value = single_arg("FINAL", args)?;
                Err(Interrupt::Final(value))
            }
            "llm_query" => {
                let [instruction, content] = two_args("llm_query", args)?;
                let instruction = instruction.to_display_string();
                let content = content.to_display_string();
                let reply = cx
                    .host
                    .llm_query(&instruction, &content)
                    .await
                    .map_err(|e| fail(format!("RuntimeError: llm_query failed: {}", e)))?;
                Ok(Value::Str(reply))
            }
            "len" => match single_arg("len", args)? {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                Value::Map(entries) => Ok(Value::Int(entries.len() as i64)),
                other => Err(fail(format!(
                    "TypeError: len() unsupported for {}",
                    other.type_name()
                ))),
            },
            "str" => Ok(Value::Str(single_arg("str", args)?.to_display_string())),
            "int" => match single_arg("int", args)? {
                Value::Int(n) => Ok(Value::Int(n)),
                Value::Bool(b) => Ok(Value::Int(b as i64)),
                Value::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| fail(format!("ValueError: invalid integer literal {:?}", s))),
                other => Err(fail(format!(
                    "TypeError: int() unsupported for {}",
                    other.type_name()
                ))),
            },
            "keys" => match single_arg("keys", args)? {
                Value::Map(entries) => Ok(Value::List(
                    entries
                        .iter()
                        .map(|(k, _)| Value::Str(k.clone()))
                        .collect(),
                )),
                other => Err(fail(format!(
                    "TypeError: keys() expects a map, got {}",
                    other.type_name()
                ))),
            },
            "count" => {
                let [haystack, needle] = two_args("count", args)?;
                match (&haystack, &needle) {
                    (Value::Str(h), Value::Str(n)) if !n.is_empty() => {
                        Ok(Value::Int(h.matches(n.as_str()).count() as i64))
                    }
                    (Value::Str(_), Value::Str(_)) => {
                        Err(fail("ValueError: count() needle must be non-empty"))
                    }
                    (Value::List(items), needle) => Ok(Value::Int(
                        items.iter().filter(|v| *v == needle).count() as i64,
                    )),
                    _ => Err(fail(format!(
                        "TypeError: count() unsupported for {}",
                        haystack.type_name()
                    ))),
                }
            }
            "find" => {
                let [haystack, needle] = two_args("find", args)?;
                match (haystack, needle) {
                    (Value::Str(h), Value::Str(n)) => Ok(Value::Int(
                        h.find(&n)
                            .map(|byte| h[..byte].chars().count() as i64)
                            .unwrap_or(-1),
                    )),
                    (h, _) => Err(fail(format!(
                        "TypeError: find() unsupported for {}",
                        h.type_name()
                    ))),
                }
            }
            "lines" => match single_arg("lines", args)? {
                Value::Str(s) => Ok(Value::List(
                    s.lines().map(|l| Value::Str(l.to_string())).collect(),
                )),
                other => Err(fail(format!(
                    "TypeError: lines() expects a string, got {}",
                    other.type_name()
                ))),
            },
            "split" => {
                let [target, sep] = two_args("split", args)?;
                match (target, sep) {
                    (Value::Str(s), Value::Str(sep)) if !sep.is_empty() => Ok(Value::List(
                        s.split(&sep).map(|p| Value::Str(p.to_string())).collect(),
                    )),
                    (Value::Str(_), Value::Str(_)) => {
                        Err(fail("ValueError: split() separator must be non-empty"))
                    }
                    (t, _) => Err(fail(format!(
                        "TypeError: split() unsupported for {}",
                        t.type_name()
                    ))),
                }
            }
            "join" => {
                let [sep, items] = two_args("join", args)?;
                match (sep, items) {
                    (Value::Str(sep), Value::List(items)) => {
                        let parts: Vec<String> =
                            items.iter().map(|v| v.to_display_string()).collect();
                        Ok(Value::Str(parts.join(&sep)))
                    }
                    _ => Err(fail("TypeError: join() expects (str, list)")),
                }
            }
            "strip" => match single_arg("strip", args)? {
                Value::Str(s) => Ok(Value::Str(s.trim().to_string())),
                other => Err(fail(format!(
                    "TypeError: strip() expects a string, got {}",
                    other.type_name()
                ))),
            },
            "upper" => match single_arg("upper", args)? {
                Value::Str(s) => Ok(Value::Str(s.to_uppercase())),
                other => Err(fail(format!(
                    "TypeError: upper() expects a string, got {}",
                    other.type_name()
                ))),
            },
            "lower" => match single_arg("lower", args)? {
                Value::Str(s) => Ok(Value::Str(s.to_lowercase())),
                other => Err(fail(format!(
                    "TypeError: lower() expects a string, got {}",
                    other.type_name()
                ))),
            },
            "sum" => match single_arg("sum", args)? {
                Value::List(items) => {
                    let mut total = 0i64;
                    for item in items {
                        total += expect_int(item, "sum() element")?;
                    }
                    Ok(Value::Int(total))
                }
                other => Err(fail(format!(
                    "TypeError: sum() expects a list, got {}",
                    other.type_name()
                ))),
            },
            "min" | "max" => {
                let items = if args.len() == 1 {
                    match args.into_iter().next().expect("length checked") {
                        Value::List(items) => items,
                        _ => {
                            return Err(fail(format!(
                                "TypeError: {}() expects a list or several values",
                                name
                            )));
                        }
                    }
                } else if args.len() >= 2 {
                    args
                } else {
                    return Err(fail(format!(
                        "TypeError: {}() expects a list or several values",
                        name
                    )));
                };
                if items.is_empty() {
                    return Err(fail(format!("ValueError: {}() of empty sequence", name)));
                }
                let mut ints = Vec::with_capacity(items.len());
                for item in items {
                    ints.push(expect_int(item, "comparison value")?);
                }
                let result = if name == "min" {
                    *ints.iter().min().expect("non-empty")
                } else {
                    *ints.iter().max().expect("non-empty")
                };
                Ok(Value::Int(result))
            }
            other => Err(fail(format!(
                "NameError: function '{}' is not defined",
                other
            ))),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn single_arg(name: &str, args: Vec<Value>) -> Eval<Value> {
    let mut args = args;
    if args.len() != 1 {
        return Err(fail(format!(
            "TypeError: {}() takes exactly 1 argument ({} given)",
            name,
            args.len()
        )));
    }
    Ok(args.remove(0))
}

fn two_args(name: &str, args: Vec<Value>) -> Eval<[Value; 2]> {
    let mut args = args;
    if args.len() != 2 {
        return Err(fail(format!(
            "TypeError: {}() takes exactly 2 arguments ({} given)",
            name,
            args.len()
        )));
    }
    let second = args.remove(1);
    let first = args.remove(0);
    Ok([first, second])
}

fn expect_int(value: Value, what: &str) -> Eval<i64> {
    match value {
        Value::Int(n) => Ok(n),
        other => Err(fail(format!(
            "TypeError: {} must be an int, got {}",
            what,
            other.type_name()
        ))),
    }
}

fn eval_binary(op: BinOp, l: Value, r: Value) -> Eval<Value> {
    use BinOp::*;
    match op {
        Add => match (l, r) {
            (Value::Int(a), Value::Int(b)) => checked(a.checked_add(b), "+"),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (l, r) => Err(fail(format!(
                "TypeError: cannot add {} and {}",
                l.type_name(),
                r.type_name()
            ))),
        },
        Sub => match (l, r) {
            (Value::Int(a), Value::Int(b)) => checked(a.checked_sub(b), "-"),
            (l, r) => Err(fail(format!(
                "TypeError: cannot subtract {} from {}",
                r.type_name(),
                l.type_name()
            ))),
        },
        Mul => match (l, r) {
            (Value::Int(a), Value::Int(b)) => checked(a.checked_mul(b), "*"),
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                if n < 0 {
                    Ok(Value::Str(String::new()))
                } else {
                    Ok(Value::Str(s.repeat(n as usize)))
                }
            }
            (l, r) => Err(fail(format!(
                "TypeError: cannot multiply {} and {}",
                l.type_name(),
                r.type_name()
            ))),
        },
        Div => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(fail("ZeroDivisionError: division by zero")),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a / b)),
            (l, r) => Err(fail(format!(
                "TypeError: cannot divide {} by {}",
                l.type_name(),
                r.type_name()
            ))),
        },
        Mod => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(fail("ZeroDivisionError: modulo by zero")),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a % b)),
            (l, r) => Err(fail(format!(
                "TypeError: cannot take {} modulo {}",
                l.type_name(),
                r.type_name()
            ))),
        },
        Eq => Ok(Value::Bool(l == r)),
        Ne => Ok(Value::Bool(l != r)),
        Lt | Le | Gt | Ge => {
            let ordering = match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => {
                    return Err(fail(format!(
                        "TypeError: cannot order {} and {}",
                        l.type_name(),
                        r.type_name()
                    )));
                }
            };
            let result = match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        And | Or => unreachable!("short-circuit ops handled by the evaluator"),
    }
}

fn checked(result: Option<i64>, op: &str) -> Eval<Value> {
    result
        .map(Value::Int)
        .ok_or_else(|| fail(format!("OverflowError: integer overflow in {}", op)))
}

fn eval_index(target: Value, index: Value) -> Eval<Value> {
    match (target, index) {
        (Value::Map(entries), Value::Str(key)) => entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| fail(format!("KeyError: {:?}", key))),
        (Value::Map(_), index) => Err(fail(format!(
            "TypeError: map keys are strings, got {}",
            index.type_name()
        ))),
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = resolve_index(i, chars.len())
                .ok_or_else(|| fail("IndexError: string index out of range"))?;
            Ok(Value::Str(chars[idx].to_string()))
        }
        (Value::List(items), Value::Int(i)) => {
            let idx = resolve_index(i, items.len())
                .ok_or_else(|| fail("IndexError: list index out of range"))?;
            Ok(items[idx].clone())
        }
        (target, _) => Err(fail(format!(
            "TypeError: {} is not subscriptable",
            target.type_name()
        ))),
    }
}

fn eval_slice(target: Value, start: Option<i64>, end: Option<i64>) -> Eval<Value> {
    match target {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (lo, hi) = resolve_slice(start, end, chars.len());
            Ok(Value::Str(chars[lo..hi].iter().collect()))
        }
        Value::List(items) => {
            let (lo, hi) = resolve_slice(start, end, items.len());
            Ok(Value::List(items[lo..hi].to_vec()))
        }
        other => Err(fail(format!(
            "TypeError: {} is not sliceable",
            other.type_name()
        ))),
    }
}

/// Python-style index resolution with negative offsets.
fn resolve_index(i: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if i < 0 { len + i } else { i };
    (0..len).contains(&idx).then_some(idx as usize)
}

/// Python-style slice clamping: out-of-range bounds never error.
fn resolve_slice(start: Option<i64>, end: Option<i64>, len: usize) -> (usize, usize) {
    let len = len as i64;
    let clamp = |i: i64| -> i64 {
        let i = if i < 0 { len + i } else { i };
        i.clamp(0, len)
    };
    let lo = clamp(start.unwrap_or(0));
    let hi = clamp(end.unwrap_or(len));
    (lo as usize, hi.max(lo) as usize)
}

//! A small form evaluator over the runtime's control core
//!
//! The special forms map one-to-one onto the runtime's construct wrappers;
//! everything else is a builtin applied to arguments evaluated onto the
//! context's stack.

use sable_runtime::{control_error, prelude::*};
use std::rc::Rc;

/// Evaluates a form in the given context
pub fn eval(ctx: &mut Context, form: &Value) -> Flow<Value> {
    match form {
        Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Str(_) => Ok(form.clone()),
        Value::Symbol(name) => match ctx.global(name) {
            Some(value) => Ok(value.clone()),
            None => control_error!("unbound variable '{name}'").map_err(Unwind::from),
        },
        Value::List(items) => ctx.call(|ctx| eval_list(ctx, items)),
    }
}

fn eval_list(ctx: &mut Context, items: &[Value]) -> Flow<Value> {
    let Some((head, rest)) = items.split_first() else {
        return Ok(Value::Nil);
    };

    let Some(name) = head.as_symbol() else {
        return control_error!("cannot call '{head}'").map_err(Unwind::from);
    };

    match name.as_ref() {
        "quote" => Ok(rest.first().cloned().unwrap_or(Value::Nil)),
        "progn" => eval_body(ctx, rest),
        "if" => {
            let test = form_at(rest, 0, "if")?;
            if eval(ctx, test)?.is_truthy() {
                eval(ctx, form_at(rest, 1, "if")?)
            } else {
                match rest.get(2) {
                    Some(alternative) => eval(ctx, alternative),
                    None => Ok(Value::Nil),
                }
            }
        }
        "let" => eval_let(ctx, rest),
        "setq" => {
            let name = symbol_at(rest, 0, "setq")?;
            let value = eval(ctx, form_at(rest, 1, "setq")?)?;
            ctx.set_global(name, value.clone());
            Ok(value)
        }
        "block" => {
            let block_name = form_at(rest, 0, "block")?.clone();
            let body = rest[1..].to_vec();
            ctx.block(block_name, |ctx| eval_body(ctx, &body))
        }
        "return-from" => {
            let block_name = form_at(rest, 0, "return-from")?.clone();
            let value = match rest.get(1) {
                Some(form) => eval(ctx, form)?,
                None => Value::Nil,
            };
            ctx.return_from(&block_name, value)
        }
        "catch" => {
            let tag = eval(ctx, form_at(rest, 0, "catch")?)?;
            let body = rest[1..].to_vec();
            ctx.catch_value(tag, |ctx| eval_body(ctx, &body))
        }
        "throw" => {
            let tag = eval(ctx, form_at(rest, 0, "throw")?)?;
            let value = match rest.get(1) {
                Some(form) => eval(ctx, form)?,
                None => Value::Nil,
            };
            ctx.throw_value(&tag, value)
        }
        "tagbody" => eval_tagbody(ctx, rest),
        "go" => ctx.go(form_at(rest, 0, "go")?),
        "unwind-protect" => {
            let protected = form_at(rest, 0, "unwind-protect")?.clone();
            let cleanup_forms = rest[1..].to_vec();
            ctx.unwind_protect(
                |ctx| eval(ctx, &protected),
                |ctx| eval_body(ctx, &cleanup_forms).map(|_| ()),
            )
        }
        "values" => {
            let mut values = Vec::with_capacity(rest.len());
            for form in rest {
                values.push(eval(ctx, form)?);
            }
            let primary = values.first().cloned().unwrap_or(Value::Nil);
            ctx.set_values(values);
            Ok(primary)
        }
        _ => apply(ctx, name.clone(), rest),
    }
}

fn eval_body(ctx: &mut Context, forms: &[Value]) -> Flow<Value> {
    let mut result = Value::Nil;
    for form in forms {
        result = eval(ctx, form)?;
    }
    Ok(result)
}

/// `let` binds dynamically and sequentially; each init form sees the bindings
/// before it.
fn eval_let(ctx: &mut Context, rest: &[Value]) -> Flow<Value> {
    let Some(Value::List(bindings)) = rest.first() else {
        return control_error!("let: expected a binding list").map_err(Unwind::from);
    };
    let bindings = bindings.clone();
    let body = rest[1..].to_vec();
    bind_then_eval(ctx, &bindings, &body)
}

fn bind_then_eval(ctx: &mut Context, bindings: &[Value], body: &[Value]) -> Flow<Value> {
    let Some((binding, remaining)) = bindings.split_first() else {
        return eval_body(ctx, body);
    };
    let (name, value) = match binding {
        Value::Symbol(name) => (name.clone(), Value::Nil),
        Value::List(pair) => {
            let name = pair
                .first()
                .and_then(Value::as_symbol)
                .cloned()
                .ok_or_else(|| bad_binding(binding))?;
            let value = match pair.get(1) {
                Some(form) => eval(ctx, form)?,
                None => Value::Nil,
            };
            (name, value)
        }
        _ => return Err(bad_binding(binding)),
    };
    let remaining = remaining.to_vec();
    let body = body.to_vec();
    ctx.with_binding(name, value, |ctx| bind_then_eval(ctx, &remaining, &body))
}

fn bad_binding(binding: &Value) -> Unwind {
    Error::from(format!("let: malformed binding '{binding}'")).into()
}

/// Symbols and integers between statements are labels; everything else is a
/// statement.
fn eval_tagbody(ctx: &mut Context, rest: &[Value]) -> Flow<Value> {
    let mut labels = Vec::new();
    let mut statements = Vec::new();
    for item in rest {
        match item {
            Value::Symbol(_) | Value::Int(_) => labels.push((item.clone(), statements.len())),
            _ => statements.push(item.clone()),
        }
    }
    ctx.tagbody(&labels, statements.len(), |ctx, index| {
        eval(ctx, &statements[index]).map(|_| ())
    })?;
    Ok(Value::Nil)
}

fn apply(ctx: &mut Context, name: Rc<str>, args: &[Value]) -> Flow<Value> {
    let mark = ctx.stack_len();
    for arg in args {
        let value = eval(ctx, arg)?;
        ctx.push_value(value);
    }
    let result = apply_builtin(ctx, &name, mark);
    ctx.truncate_stack(mark);
    result
}

fn apply_builtin(ctx: &mut Context, name: &str, mark: usize) -> Flow<Value> {
    let args = ctx.stack_from(mark);
    match name {
        "+" => Ok(Value::Int(ints(args)?.into_iter().sum())),
        "*" => Ok(Value::Int(ints(args)?.into_iter().product())),
        "-" => {
            let numbers = ints(args)?;
            match numbers.split_first() {
                None => control_error!("-: needs at least one argument").map_err(Unwind::from),
                Some((first, [])) => Ok(Value::Int(-first)),
                Some((first, rest)) => {
                    Ok(Value::Int(rest.iter().fold(*first, |acc, n| acc - n)))
                }
            }
        }
        "=" => Ok(Value::Bool(args.windows(2).all(|pair| pair[0] == pair[1]))),
        "<" => {
            let numbers = ints(args)?;
            Ok(Value::Bool(numbers.windows(2).all(|pair| pair[0] < pair[1])))
        }
        "list" => Ok(Value::list(args.to_vec())),
        "length" => match args.first() {
            Some(Value::List(items)) => Ok(Value::Int(items.len() as i64)),
            Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
            Some(other) => {
                control_error!("length: expected a list, found {}", other.type_as_string())
                    .map_err(Unwind::from)
            }
            None => control_error!("length: needs an argument").map_err(Unwind::from),
        },
        "print" => {
            let value = args.first().cloned().unwrap_or(Value::Nil);
            println!("{value}");
            Ok(value)
        }
        "crash" => {
            // Deliberately faults so the recovery boundary can be exercised
            // from the REPL.
            unsafe { std::ptr::null_mut::<u8>().write_volatile(1) };
            Ok(Value::Nil)
        }
        _ => control_error!("undefined function '{name}'").map_err(Unwind::from),
    }
}

fn form_at<'a>(forms: &'a [Value], index: usize, construct: &str) -> Flow<&'a Value> {
    forms
        .get(index)
        .ok_or_else(|| Error::from(format!("{construct}: missing an argument")).into())
}

fn symbol_at(forms: &[Value], index: usize, construct: &str) -> Flow<Rc<str>> {
    form_at(forms, index, construct)?
        .as_symbol()
        .cloned()
        .ok_or_else(|| Error::from(format!("{construct}: expected a symbol")).into())
}

fn ints(args: &[Value]) -> Flow<Vec<i64>> {
    args.iter()
        .map(|value| match value {
            Value::Int(n) => Ok(*n),
            other => Err(Unwind::from(Error::from(format!(
                "expected an int argument, found {}",
                other.type_as_string()
            )))),
        })
        .collect()
}

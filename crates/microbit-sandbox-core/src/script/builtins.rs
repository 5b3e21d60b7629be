//! Built-in functions and methods on built-in types.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::interpreter::OutputSink;
use super::value::{compare_values, expect_args, range_len, NativeFunction, Value};

pub(crate) fn create(output: OutputSink) -> HashMap<String, Value> {
    let mut builtins = HashMap::new();
    let mut define = |name: &str, value: Value| {
        builtins.insert(name.to_string(), value);
    };

    define(
        "print",
        NativeFunction::sync("print", move |args| {
            let line: Vec<String> = args.iter().map(Value::to_display).collect();
            output(&line.join(" "));
            Ok(Value::None)
        }),
    );
    define("str", NativeFunction::sync("str", builtin_str));
    define("int", NativeFunction::sync("int", builtin_int));
    define("float", NativeFunction::sync("float", builtin_float));
    define(
        "bool",
        NativeFunction::sync("bool", |args| {
            expect_args("bool", args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }),
    );
    define("len", NativeFunction::sync("len", builtin_len));
    define("range", NativeFunction::sync("range", builtin_range));
    define("abs", NativeFunction::sync("abs", builtin_abs));
    define(
        "min",
        NativeFunction::sync("min", |args| extreme("min", args, std::cmp::Ordering::Less)),
    );
    define(
        "max",
        NativeFunction::sync("max", |args| extreme("max", args, std::cmp::Ordering::Greater)),
    );
    define("round", NativeFunction::sync("round", builtin_round));
    builtins
}

fn builtin_str(args: &[Value]) -> ScriptResult<Value> {
    expect_args("str", args, 0, 1)?;
    Ok(Value::str(
        args.first().map(Value::to_display).unwrap_or_default(),
    ))
}

fn builtin_int(args: &[Value]) -> ScriptResult<Value> {
    expect_args("int", args, 0, 1)?;
    match args.first() {
        None => Ok(Value::Int(0)),
        Some(Value::Str(text)) => text
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| {
                ScriptError::value_error(format!(
                    "invalid literal for int() with base 10: '{}'",
                    text
                ))
            }),
        Some(value) => value.to_int().map(Value::Int),
    }
}

fn builtin_float(args: &[Value]) -> ScriptResult<Value> {
    expect_args("float", args, 0, 1)?;
    match args.first() {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(text)) => {
            let trimmed = text.trim().to_ascii_lowercase();
            let parsed = match trimmed.as_str() {
                "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" => Some(f64::NAN),
                other => other.parse::<f64>().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                ScriptError::value_error(format!(
                    "could not convert string to float: '{}'",
                    text
                ))
            })
        }
        Some(value) => value.to_float().map(Value::Float),
    }
}

fn builtin_len(args: &[Value]) -> ScriptResult<Value> {
    expect_args("len", args, 1, 1)?;
    let len = match &args[0] {
        Value::Str(s) => s.chars().count() as i64,
        Value::List(items) => items.borrow().len() as i64,
        range @ Value::Range { .. } => range_len(range),
        other => {
            return Err(ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(len))
}

fn builtin_range(args: &[Value]) -> ScriptResult<Value> {
    expect_args("range", args, 1, 3)?;
    let ints: Vec<i64> = args
        .iter()
        .map(Value::to_index)
        .collect::<ScriptResult<_>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("argument count checked above"),
    };
    if step == 0 {
        return Err(ScriptError::value_error("range() arg 3 must not be zero"));
    }
    Ok(Value::Range { start, stop, step })
}

fn builtin_abs(args: &[Value]) -> ScriptResult<Value> {
    expect_args("abs", args, 1, 1)?;
    match &args[0] {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| ScriptError::new(ErrorKind::Overflow, "integer result too large")),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(ScriptError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn extreme(name: &str, args: &[Value], wanted: std::cmp::Ordering) -> ScriptResult<Value> {
    let candidates: Vec<Value> = match args {
        [] => {
            return Err(ScriptError::type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )))
        }
        [Value::List(items)] => items.borrow().clone(),
        [range @ Value::Range { start, step, .. }] => (0..range_len(range))
            .map(|i| Value::Int(start + step * i))
            .collect(),
        [single] => {
            return Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                single.type_name()
            )))
        }
        many => many.to_vec(),
    };
    let mut best: Option<Value> = None;
    for candidate in candidates {
        best = Some(match best {
            None => candidate,
            Some(current) => {
                if compare_values(&candidate, &current, "<")? == wanted {
                    candidate
                } else {
                    current
                }
            }
        });
    }
    best.ok_or_else(|| ScriptError::value_error(format!("{}() arg is an empty sequence", name)))
}

fn builtin_round(args: &[Value]) -> ScriptResult<Value> {
    expect_args("round", args, 1, 2)?;
    let value = &args[0];
    match args.get(1) {
        None | Some(Value::None) => match value {
            Value::Int(i) => Ok(Value::Int(*i)),
            other => {
                let f = other.to_float()?;
                if !f.is_finite() {
                    return Err(ScriptError::new(
                        ErrorKind::Overflow,
                        "cannot convert float infinity or NaN to integer",
                    ));
                }
                Ok(Value::Int(f.round_ties_even() as i64))
            }
        },
        Some(digits) => {
            let digits = digits.to_index()?;
            if let Value::Int(i) = value {
                return Ok(Value::Int(*i));
            }
            let factor = 10f64.powi(digits.clamp(-300, 300) as i32);
            let f = value.to_float()?;
            Ok(Value::Float((f * factor).round_ties_even() / factor))
        }
    }
}

/// Bound methods on lists (`items.append(x)`).
pub(crate) fn list_method(items: &Rc<RefCell<Vec<Value>>>, name: &str) -> Option<Value> {
    let items = items.clone();
    let qualified = format!("list.{}", name);
    let method = match name {
        "append" => NativeFunction::sync(qualified, move |args| {
            expect_args("append", args, 1, 1)?;
            items.borrow_mut().push(args[0].clone());
            Ok(Value::None)
        }),
        "pop" => NativeFunction::sync(qualified, move |args| {
            expect_args("pop", args, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(ScriptError::new(ErrorKind::Index, "pop from empty list"));
            }
            let len = items.len() as i64;
            let index = match args.first() {
                Some(v) => v.to_index()?,
                None => len - 1,
            };
            let resolved = if index < 0 { index + len } else { index };
            if resolved < 0 || resolved >= len {
                return Err(ScriptError::new(ErrorKind::Index, "pop index out of range"));
            }
            Ok(items.remove(resolved as usize))
        }),
        "insert" => NativeFunction::sync(qualified, move |args| {
            expect_args("insert", args, 2, 2)?;
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let index = args[0].to_index()?;
            let resolved = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(resolved as usize, args[1].clone());
            Ok(Value::None)
        }),
        "clear" => NativeFunction::sync(qualified, move |args| {
            expect_args("clear", args, 0, 0)?;
            items.borrow_mut().clear();
            Ok(Value::None)
        }),
        "index" => NativeFunction::sync(qualified, move |args| {
            expect_args("index", args, 1, 1)?;
            items
                .borrow()
                .iter()
                .position(|v| *v == args[0])
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| {
                    ScriptError::value_error(format!("{} is not in list", args[0].repr()))
                })
        }),
        _ => return None,
    };
    Some(method)
}

/// Bound methods on strings.
pub(crate) fn str_method(text: &Rc<str>, name: &str) -> Option<Value> {
    let text = text.clone();
    let qualified = format!("str.{}", name);
    let method = match name {
        "upper" => NativeFunction::sync(qualified, move |args| {
            expect_args("upper", args, 0, 0)?;
            Ok(Value::str(text.to_uppercase()))
        }),
        "lower" => NativeFunction::sync(qualified, move |args| {
            expect_args("lower", args, 0, 0)?;
            Ok(Value::str(text.to_lowercase()))
        }),
        "strip" => NativeFunction::sync(qualified, move |args| {
            expect_args("strip", args, 0, 0)?;
            Ok(Value::str(text.trim()))
        }),
        _ => return None,
    };
    Some(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> ScriptResult<Value> {
        let builtins = create(Rc::new(|_| {}));
        match builtins.get(name) {
            Some(Value::Native(native)) => match &native.body {
                crate::script::value::NativeBody::Sync(f) => f(args),
                crate::script::value::NativeBody::Async(_) => panic!("unexpected async builtin"),
            },
            _ => panic!("missing builtin {}", name),
        }
    }

    #[test]
    fn test_int_conversions() {
        assert_eq!(call("int", &[Value::str(" 42 ")]).unwrap(), Value::Int(42));
        assert_eq!(call("int", &[Value::Float(-3.9)]).unwrap(), Value::Int(-3));
        let err = call("int", &[Value::str("abc")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
    }

    #[test]
    fn test_round_half_to_even() {
        assert_eq!(call("round", &[Value::Float(2.5)]).unwrap(), Value::Int(2));
        assert_eq!(call("round", &[Value::Float(3.5)]).unwrap(), Value::Int(4));
        assert_eq!(
            call("round", &[Value::Float(1.2345), Value::Int(2)]).unwrap(),
            Value::Float(1.23)
        );
    }

    #[test]
    fn test_min_max_over_args_and_lists() {
        let list = Value::list(vec![Value::Int(4), Value::Int(-1), Value::Int(7)]);
        assert_eq!(call("max", &[list.clone()]).unwrap(), Value::Int(7));
        assert_eq!(call("min", &[list]).unwrap(), Value::Int(-1));
        assert_eq!(
            call("max", &[Value::Int(1), Value::Float(2.5)]).unwrap(),
            Value::Float(2.5)
        );
        assert!(call("max", &[Value::list(vec![])]).is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(call("range", &[Value::Int(0), Value::Int(5), Value::Int(0)]).is_err());
        assert!(call("range", &[Value::Float(1.5)]).is_err());
        assert_eq!(
            call("len", &[call("range", &[Value::Int(2), Value::Int(8), Value::Int(3)]).unwrap()])
                .unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn test_list_pop_and_insert() {
        let items = Rc::new(RefCell::new(vec![Value::Int(1), Value::Int(2)]));
        let Some(Value::Native(insert)) = list_method(&items, "insert") else {
            panic!("insert missing");
        };
        if let crate::script::value::NativeBody::Sync(f) = &insert.body {
            f(&[Value::Int(0), Value::Int(0)]).unwrap();
        }
        let Some(Value::Native(pop)) = list_method(&items, "pop") else {
            panic!("pop missing");
        };
        if let crate::script::value::NativeBody::Sync(f) = &pop.body {
            assert_eq!(f(&[]).unwrap(), Value::Int(2));
        }
        assert_eq!(items.borrow().len(), 2);
        assert!(list_method(&items, "sort_by_magic").is_none());
    }
}

//! Host-process symbol table
//!
//! The builtins executed code may resolve against when a symbol is defined
//! by neither the linked image nor the adapter's resolver. This is the
//! analogue of looking a symbol up in the host process: the call-tree probe
//! callbacks live here, alongside a small C-flavoured runtime (stdio,
//! string and list helpers, `abort`).

use std::collections::HashMap;
use std::rc::Rc;

use super::value::Value;
use super::{HostFn, Trap};
use crate::calltree::{
    mutiny_enter_function, mutiny_leave_function, ENTER_FUNCTION_SYMBOL, LEAVE_FUNCTION_SYMBOL,
};

/// Mangled name → host implementation
pub(crate) struct HostRegistry {
    symbols: HashMap<String, HostFn>,
}

impl HostRegistry {
    /// Build the registry, keying every builtin through `mangle`
    pub(crate) fn new(mangle: impl Fn(&str) -> String) -> Self {
        let mut registry = Self {
            symbols: HashMap::new(),
        };

        registry.register(mangle(ENTER_FUNCTION_SYMBOL), Rc::new(host_enter_function));
        registry.register(mangle(LEAVE_FUNCTION_SYMBOL), Rc::new(host_leave_function));
        registry.register(mangle("puts"), Rc::new(host_puts));
        registry.register(mangle("eputs"), Rc::new(host_eputs));
        registry.register(mangle("strcmp"), Rc::new(host_strcmp));
        registry.register(mangle("strcat"), Rc::new(host_strcat));
        registry.register(mangle("list_len"), Rc::new(host_list_len));
        registry.register(mangle("list_get"), Rc::new(host_list_get));
        registry.register(mangle("list_push"), Rc::new(host_list_push));
        registry.register(mangle("abort"), Rc::new(host_abort));

        registry
    }

    pub(crate) fn register(&mut self, mangled: String, symbol: HostFn) {
        self.symbols.insert(mangled, symbol);
    }

    pub(crate) fn lookup(&self, mangled: &str) -> Option<HostFn> {
        self.symbols.get(mangled).cloned()
    }
}

fn expect_str(args: &[Value], index: usize, symbol: &'static str) -> Result<Rc<str>, Trap> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(Rc::clone(s)),
        other => Err(Trap::HostFault {
            symbol,
            message: format!(
                "argument {index} must be a string, got {}",
                other.map_or("nothing", Value::type_name)
            ),
        }),
    }
}

fn expect_list(args: &[Value], index: usize, symbol: &'static str) -> Result<Rc<Vec<Value>>, Trap> {
    match args.get(index) {
        Some(Value::List(l)) => Ok(Rc::clone(l)),
        other => Err(Trap::HostFault {
            symbol,
            message: format!(
                "argument {index} must be a list, got {}",
                other.map_or("nothing", Value::type_name)
            ),
        }),
    }
}

fn expect_i64(args: &[Value], index: usize, symbol: &'static str) -> Result<i64, Trap> {
    match args.get(index) {
        Some(Value::I64(v)) => Ok(*v),
        other => Err(Trap::HostFault {
            symbol,
            message: format!(
                "argument {index} must be an i64, got {}",
                other.map_or("nothing", Value::type_name)
            ),
        }),
    }
}

/// Call-tree entry probe: `(probe_ptr, function_id) -> ()`
fn host_enter_function(args: &[Value]) -> Result<Value, Trap> {
    if let (Some(Value::Ptr(ctx)), Some(Value::I64(id))) = (args.first(), args.get(1)) {
        // SAFETY: instrumented code passes the probe address the driver
        // baked in, and the driver keeps probe and mapping alive for the
        // whole run.
        unsafe { mutiny_enter_function(*ctx, *id as u64) };
    }
    Ok(Value::Unit)
}

/// Call-tree leave probe: `(probe_ptr, function_id) -> ()`
fn host_leave_function(args: &[Value]) -> Result<Value, Trap> {
    if let (Some(Value::Ptr(ctx)), Some(Value::I64(id))) = (args.first(), args.get(1)) {
        // SAFETY: as for the entry probe.
        unsafe { mutiny_leave_function(*ctx, *id as u64) };
    }
    Ok(Value::Unit)
}

fn host_puts(args: &[Value]) -> Result<Value, Trap> {
    let text = expect_str(args, 0, "puts")?;
    println!("{text}");
    Ok(Value::I64(0))
}

fn host_eputs(args: &[Value]) -> Result<Value, Trap> {
    let text = expect_str(args, 0, "eputs")?;
    eprintln!("{text}");
    Ok(Value::I64(0))
}

fn host_strcmp(args: &[Value]) -> Result<Value, Trap> {
    let a = expect_str(args, 0, "strcmp")?;
    let b = expect_str(args, 1, "strcmp")?;
    Ok(Value::I64(match a.cmp(&b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }))
}

fn host_strcat(args: &[Value]) -> Result<Value, Trap> {
    let a = expect_str(args, 0, "strcat")?;
    let b = expect_str(args, 1, "strcat")?;
    Ok(Value::str(format!("{a}{b}")))
}

fn host_list_len(args: &[Value]) -> Result<Value, Trap> {
    let list = expect_list(args, 0, "list_len")?;
    Ok(Value::I64(list.len() as i64))
}

fn host_list_get(args: &[Value]) -> Result<Value, Trap> {
    let list = expect_list(args, 0, "list_get")?;
    let index = expect_i64(args, 1, "list_get")?;
    usize::try_from(index)
        .ok()
        .and_then(|i| list.get(i).cloned())
        .ok_or(Trap::HostFault {
            symbol: "list_get",
            message: format!("index {index} out of bounds for length {}", list.len()),
        })
}

fn host_list_push(args: &[Value]) -> Result<Value, Trap> {
    let list = expect_list(args, 0, "list_push")?;
    let value = args.get(1).cloned().unwrap_or(Value::Unit);
    let mut extended = (*list).clone();
    extended.push(value);
    Ok(Value::List(Rc::new(extended)))
}

fn host_abort(_args: &[Value]) -> Result<Value, Trap> {
    Err(Trap::Aborted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> HostRegistry {
        HostRegistry::new(|name| name.to_string())
    }

    #[test]
    fn builtins_are_registered_unmangled_on_elf() {
        let registry = registry();
        assert!(registry.lookup("puts").is_some());
        assert!(registry.lookup(ENTER_FUNCTION_SYMBOL).is_some());
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn strcmp_orders_like_c() {
        assert_eq!(
            host_strcmp(&[Value::str("a"), Value::str("a")]).unwrap(),
            Value::I64(0)
        );
        assert_eq!(
            host_strcmp(&[Value::str("a"), Value::str("b")]).unwrap(),
            Value::I64(-1)
        );
        assert_eq!(
            host_strcmp(&[Value::str("b"), Value::str("a")]).unwrap(),
            Value::I64(1)
        );
    }

    #[test]
    fn strcat_concatenates() {
        assert_eq!(
            host_strcat(&[Value::str("--filter="), Value::str("t")]).unwrap(),
            Value::str("--filter=t")
        );
    }

    #[test]
    fn list_helpers_are_persistent() {
        let list = Value::list(vec![Value::I64(1)]);
        let pushed = host_list_push(&[list.clone(), Value::I64(2)]).unwrap();

        assert_eq!(host_list_len(&[list]).unwrap(), Value::I64(1));
        assert_eq!(host_list_len(&[pushed.clone()]).unwrap(), Value::I64(2));
        assert_eq!(
            host_list_get(&[pushed, Value::I64(1)]).unwrap(),
            Value::I64(2)
        );
    }

    #[test]
    fn list_get_bounds_are_checked() {
        let list = Value::list(Vec::new());
        assert!(host_list_get(&[list, Value::I64(0)]).is_err());
    }

    #[test]
    fn abort_raises_a_trap() {
        assert!(matches!(host_abort(&[]), Err(Trap::Aborted)));
    }

    #[test]
    fn type_mismatches_are_faults() {
        assert!(matches!(
            host_puts(&[Value::I64(1)]),
            Err(Trap::HostFault { symbol: "puts", .. })
        ));
    }
}

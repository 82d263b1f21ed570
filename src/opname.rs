//! Name predicates for recognizing extension operations at call sites.
//!
//! An operation `name` is declared either as a function with exactly that
//! name, or, when overloaded, as `name.<suffix>` (for example
//! `dialect.op.i32`).

/// `fn_name` declares the non-overloaded operation `name`.
#[inline]
pub fn is_simple_operation_decl(fn_name: &str, name: &str) -> bool {
    fn_name == name
}

/// `fn_name` declares an overload of `name`: it extends `name` with a
/// `.`-separated suffix.
pub fn is_overloaded_operation_decl(fn_name: &str, name: &str) -> bool {
    fn_name.len() > name.len()
        && fn_name.starts_with(name)
        && fn_name.as_bytes()[name.len()] == b'.'
}

/// Call-site form of `is_simple_operation_decl`. `callee` is the name of
/// the directly called function, `None` for indirect calls.
pub fn is_simple_operation(callee: Option<&str>, name: &str) -> bool {
    callee.is_some_and(|f| is_simple_operation_decl(f, name))
}

/// Call-site form of `is_overloaded_operation_decl`.
pub fn is_overloaded_operation(callee: Option<&str>, name: &str) -> bool {
    callee.is_some_and(|f| is_overloaded_operation_decl(f, name))
}

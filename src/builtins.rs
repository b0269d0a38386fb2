//! Library function signatures registered into the global scope at startup.
//!
//! These are external: no code is generated for them, only calls. The math
//! set and `pow`/`fmod` use the x87 calling sequence, `printf`/`scanf` are
//! varargs with their own push pseudo-ops.

use crate::symtab::{SymKind, SymbolTable};
use crate::types::TypeSeq;

/// Functions whose arguments travel through the x87 stack and whose result
/// comes back in ST(0). `printf`/`scanf` ride along for the caller-cleanup
/// quirk, matching the library call convention table.
pub const MATH_FUNCS: [&str; 17] = [
    "scanf", "printf", "sqrt", "ceil", "floor", "pow", "fabs", "log", "log10", "fmod", "exp",
    "cos", "sin", "acos", "asin", "tan", "atan",
];

/// Unary math routines taking one double on the x87 stack.
pub const UNARY_MATH_FUNCS: [&str; 13] = [
    "sqrt", "ceil", "floor", "fabs", "log", "log10", "exp", "cos", "sin", "acos", "asin", "tan",
    "atan",
];

/// Binary math routines (two doubles pushed without intermediate alignment).
pub const BINARY_MATH_FUNCS: [&str; 2] = ["pow", "fmod"];

pub fn is_math_func(name: &str) -> bool {
    MATH_FUNCS.contains(&name) && name != "printf" && name != "scanf"
}

pub fn is_varargs(name: &str) -> bool {
    name == "printf" || name == "scanf"
}

struct Builtin {
    name: &'static str,
    num_params: usize,
    ret: &'static str,
    ret_ptr: bool,
}

const BUILTINS: [Builtin; 29] = [
    Builtin { name: "printf", num_params: 2, ret: "void", ret_ptr: false },
    Builtin { name: "scanf", num_params: 2, ret: "void", ret_ptr: false },
    Builtin { name: "abs", num_params: 1, ret: "int", ret_ptr: false },
    Builtin { name: "sqrt", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "ceil", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "floor", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "pow", num_params: 2, ret: "float", ret_ptr: false },
    Builtin { name: "fabs", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "log", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "log10", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "fmod", num_params: 2, ret: "float", ret_ptr: false },
    Builtin { name: "exp", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "cos", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "sin", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "acos", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "asin", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "tan", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "atan", num_params: 1, ret: "float", ret_ptr: false },
    Builtin { name: "strlen", num_params: 1, ret: "int", ret_ptr: false },
    Builtin { name: "strlwr", num_params: 1, ret: "char", ret_ptr: true },
    Builtin { name: "strupr", num_params: 1, ret: "char", ret_ptr: true },
    Builtin { name: "strrev", num_params: 1, ret: "char", ret_ptr: true },
    Builtin { name: "strcpy", num_params: 2, ret: "char", ret_ptr: true },
    Builtin { name: "strcat", num_params: 2, ret: "char", ret_ptr: true },
    Builtin { name: "strcmp", num_params: 2, ret: "int", ret_ptr: false },
    Builtin { name: "malloc", num_params: 1, ret: "void", ret_ptr: true },
    Builtin { name: "calloc", num_params: 2, ret: "void", ret_ptr: true },
    Builtin { name: "realloc", num_params: 2, ret: "void", ret_ptr: true },
    Builtin { name: "free", num_params: 1, ret: "void", ret_ptr: false },
];

/// Pre-declare every library function in the (global) scope.
pub fn register(symtab: &mut SymbolTable) {
    for b in &BUILTINS {
        symtab.insert(b.name, 0, SymKind::Function);
        symtab.modify(b.name, |e| {
            e.ty = TypeSeq::base("function");
            e.num_params = b.num_params;
            let mut ret = TypeSeq::base(b.ret);
            if b.ret_ptr {
                ret.add_pointer();
            }
            e.ret_type = Some(ret);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_into_global_scope() {
        let mut st = SymbolTable::new();
        register(&mut st);
        let printf = st.lookup("printf").unwrap();
        assert_eq!(printf.kind, SymKind::Function);
        assert_eq!(printf.num_params, 2);
        let sqrt = st.lookup("sqrt").unwrap();
        assert_eq!(sqrt.ret_type.as_ref().unwrap().base_name(), "float");
        let malloc = st.lookup("malloc").unwrap();
        assert!(malloc.ret_type.as_ref().unwrap().is_pointer());
    }

    #[test]
    fn math_classification() {
        assert!(is_math_func("sqrt"));
        assert!(is_math_func("pow"));
        assert!(!is_math_func("printf"));
        assert!(!is_math_func("strlen"));
        assert!(is_varargs("scanf"));
    }
}

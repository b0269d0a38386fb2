//! minic compiler library.
//!
//! Compiles a C subset to 32-bit x86 assembly (AT&T syntax) through a
//! three-address-code intermediate form:
//!
//! tokens -> parse with fused semantic actions (symbol table, type checks,
//! TAC with backpatching) -> finished TAC (pools appended, dense
//! renumbering) -> linear lowering to assembly.
//!
//! ```rust,ignore
//! let asm = minic::compile_to_asm("int main(){ return 7; }")?;
//! ```

pub mod builtins;
pub mod codegen;
pub mod config;
pub mod diag;
pub mod lexer;
pub mod parser;
pub mod symtab;
pub mod tac;
pub mod types;

pub use config::{CompilerConfig, Emit};
pub use parser::{Compiler, Parser};

/// Run the front end and translator over a source string. On success the
/// TAC is finished (pools appended, targets renumbered).
pub fn compile(source: &str, color: bool) -> Result<Compiler, String> {
    let mut comp = Compiler::new(source, color);
    let aborted = {
        let mut parser = Parser::new(source, &mut comp);
        parser.parse().is_err()
    };
    if aborted || comp.diags.has_errors() {
        return Err(comp.diags.render());
    }
    comp.tac.finish();
    Ok(comp)
}

/// Compile to the textual TAC listing.
pub fn compile_to_tac(source: &str) -> Result<String, String> {
    let comp = compile(source, false)?;
    Ok(comp.tac.listing())
}

/// Compile all the way to assembly.
pub fn compile_to_asm(source: &str) -> Result<String, String> {
    let comp = compile(source, false)?;
    codegen::generate(&comp.tac).map_err(|e| e.to_string())
}

/// Compile a source file and write the selected artifact to `output_path`.
pub fn compile_file(
    source_path: &std::path::Path,
    output_path: &std::path::Path,
    config: &CompilerConfig,
) -> Result<(), String> {
    let source = std::fs::read_to_string(source_path)
        .map_err(|e| format!("Failed to read source file: {}", e))?;
    let comp = compile(&source, config.color)?;
    let artifact = match config.emit {
        Emit::Tac => comp.tac.listing(),
        Emit::Asm => codegen::generate(&comp.tac).map_err(|e| e.to_string())?,
    };
    std::fs::write(output_path, artifact)
        .map_err(|e| format!("Failed to write output file: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `(line_number, text)` pairs of a TAC listing.
    fn tac_lines(listing: &str) -> Vec<(usize, String)> {
        listing
            .lines()
            .filter_map(|l| {
                let (n, rest) = l.split_once(' ')?;
                Some((n.parse().ok()?, rest.to_string()))
            })
            .collect()
    }

    fn jump_target(text: &str) -> Option<usize> {
        let rest = text.strip_prefix("ifnz goto ").or(text.strip_prefix("goto "))?;
        rest.split_whitespace().next()?.parse().ok()
    }

    #[test]
    fn scenario_integer_arithmetic() {
        let tac = compile_to_tac("int main(){ int a=2,b=3; return a*b+1; }").unwrap();
        assert!(tac.contains("=_int"), "tac:\n{}", tac);
        assert!(tac.contains("*_int"), "tac:\n{}", tac);
        assert!(tac.contains("+_int"), "tac:\n{}", tac);
        assert!(tac.contains("retq"), "tac:\n{}", tac);
        let asm = compile_to_asm("int main(){ int a=2,b=3; return a*b+1; }").unwrap();
        assert!(asm.contains("imull"), "asm:\n{}", asm);
        assert!(asm.contains("addl"), "asm:\n{}", asm);
    }

    #[test]
    fn scenario_short_circuit_skips_division() {
        let tac = compile_to_tac("int main(){int x=0; if(x && 1/x) return 1; return 0;}").unwrap();
        let lines = tac_lines(&tac);
        let div_line = lines
            .iter()
            .find(|(_, t)| t.starts_with("/_int"))
            .map(|(n, _)| *n)
            .expect("division emitted");
        // x's false-list jump is the plain goto right after its ifnz pair;
        // it must skip past the division
        let false_jump = lines
            .iter()
            .find(|(_, t)| t.starts_with("goto "))
            .expect("false jump");
        let target = jump_target(&false_jump.1).expect("patched target");
        assert!(
            target > div_line,
            "false jump at {} targets {} but the division is at {}\n{}",
            false_jump.0,
            target,
            div_line,
            tac
        );
    }

    #[test]
    fn scenario_switch_dispatch() {
        let src = "int main(){ int c=2,x=0; switch(c){ case 1: x=10; break; case 2: x=20; default: x=30; } return x; }";
        let tac = compile_to_tac(src).unwrap();
        // each case test block appears twice: once in the body, once
        // duplicated into the dispatcher
        let eq_count = tac.lines().filter(|l| l.contains("==_int")).count();
        assert!(eq_count >= 4, "expected duplicated tests, got {}:\n{}", eq_count, tac);
        // dispatch has a conditional branch per case plus the default goto
        let ifnz_count = tac.lines().filter(|l| l.contains("ifnz goto")).count();
        assert!(ifnz_count >= 2, "tac:\n{}", tac);
        let asm = compile_to_asm(src).unwrap();
        assert!(asm.contains("jne"), "asm:\n{}", asm);
    }

    #[test]
    fn scenario_struct_field_offsets() {
        let src = "struct P{int x; char c; int y;}; int main(){ struct P p; p.x=1; p.c='A'; p.y=7; return p.y; }";
        let comp = compile(src, false).unwrap();
        let info = comp.symtab.lookup_struct("P").unwrap();
        assert_eq!(info.size, 9);
        assert_eq!(info.field("x").unwrap().offset, 0);
        assert_eq!(info.field("c").unwrap().offset, 4);
        assert_eq!(info.field("y").unwrap().offset, 5);
        // p sits at -9; p.y lands at base+5 = -4
        let tac = comp.tac.listing();
        assert!(tac.contains("=_int -9(%ebp)"), "p.x store:\n{}", tac);
        assert!(tac.contains("=_char -5(%ebp)"), "p.c store:\n{}", tac);
        assert!(tac.contains("=_int -4(%ebp)"), "p.y store:\n{}", tac);
    }

    #[test]
    fn scenario_float_comparison() {
        let src = "int main(){ float a=1.5,b=2.5; int x; if(a<b) x=1; else x=0; return x; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("<_float"), "tac:\n{}", tac);
        assert!(tac.contains("load_float .LF0"), "tac:\n{}", tac);
        let asm = compile_to_asm(src).unwrap();
        assert!(asm.contains("flds"), "asm:\n{}", asm);
        assert!(asm.contains("fucomip %st(1), %st"), "asm:\n{}", asm);
        assert!(asm.contains("fstp %st(0)"), "asm:\n{}", asm);
        assert!(asm.contains("seta"), "asm:\n{}", asm);
        assert!(asm.contains("movzbl"), "asm:\n{}", asm);
    }

    #[test]
    fn scenario_nested_scope_shadowing() {
        let src = "int main(){ int x=1; int y; int z; { int x=2; y=x; } z=x; return 0; }";
        let tac = compile_to_tac(src).unwrap();
        // layout: x=-4, t=-8, y=-12, z=-16, inner x=-20
        assert!(tac.contains("=_int -12(%ebp) -20(%ebp)"), "y=inner x:\n{}", tac);
        assert!(tac.contains("=_int -16(%ebp) -4(%ebp)"), "z=outer x:\n{}", tac);
    }

    #[test]
    fn boundary_empty_switch() {
        let src = "int main(){ int c=1; switch(c){} return 0; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("retq"), "tac:\n{}", tac);
    }

    #[test]
    fn boundary_empty_function_body() {
        let tac = compile_to_tac("void f(){} int main(){ return 0; }").unwrap();
        let lines = tac_lines(&tac);
        let f_at = lines.iter().position(|(_, t)| t == "f:").unwrap();
        assert_eq!(lines[f_at + 1].1, "retq", "tac:\n{}", tac);
    }

    #[test]
    fn boundary_char_promotion() {
        let src = "int main(){ char c; int i; c='a'; i = c + 1; return 0; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("cast"), "tac:\n{}", tac);
        assert!(tac.contains("int,char"), "tac:\n{}", tac);
        assert!(tac.contains("+_int"), "tac:\n{}", tac);
    }

    #[test]
    fn char_to_char_comparison_stays_byte_sized() {
        let src = "int main(){ char a='a',b='b'; if(a<b) return 1; return 0; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("<_char"), "tac:\n{}", tac);
    }

    #[test]
    fn invariant_all_jump_targets_valid_after_finish() {
        let src = "int main(){ int i; for(i=0;i<10;i=i+1){ if(i==5) continue; if(i==8) break; } return i; }";
        let tac = compile_to_tac(src).unwrap();
        let lines = tac_lines(&tac);
        let n = lines.len();
        for (ln, text) in &lines {
            if text.starts_with("goto") || text.starts_with("ifnz goto") {
                let t = jump_target(text)
                    .unwrap_or_else(|| panic!("empty target at line {}:\n{}", ln, tac));
                assert!(t >= 1 && t <= n, "target {} out of range at {}:\n{}", t, ln, tac);
            }
        }
    }

    #[test]
    fn invariant_no_consecutive_returns() {
        let src = "int main(){ return 1; }";
        let tac = compile_to_tac(src).unwrap();
        let lines = tac_lines(&tac);
        for pair in lines.windows(2) {
            assert!(
                !(pair[0].1.starts_with("retq") && pair[1].1.starts_with("retq")),
                "doubled return:\n{}",
                tac
            );
        }
    }

    #[test]
    fn invariant_scopes_balanced() {
        let src = "int main(){ { { int x; x=1; } } return 0; }";
        let comp = compile(src, false).unwrap();
        assert_eq!(comp.symtab.depth(), 1);
    }

    #[test]
    fn while_loop_jumps_back() {
        let src = "int main(){ int i=0; while(i<3) i=i+1; return i; }";
        let tac = compile_to_tac(src).unwrap();
        let asm = compile_to_asm(src).unwrap();
        assert!(asm.contains("jmp"), "asm:\n{}", asm);
        assert!(tac.contains("<_int"), "tac:\n{}", tac);
    }

    #[test]
    fn ternary_materializes_both_arms() {
        let src = "int main(){ int a; a = 1 ? 2 : 3; return a; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("=_int"), "tac:\n{}", tac);
    }

    #[test]
    fn compound_assignment_desugars() {
        let src = "int main(){ int x=1; x += 2; x <<= 1; return x; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("+_int"), "tac:\n{}", tac);
        assert!(tac.contains("<<_int"), "tac:\n{}", tac);
        assert!(!tac.contains("+=_"), "compound op leaked into TAC:\n{}", tac);
    }

    #[test]
    fn array_subscript_addresses_the_frame() {
        let src = "int main(){ int a[3]; a[1]=5; return a[1]; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("%ebp-12"), "tac:\n{}", tac);
        let asm = compile_to_asm(src).unwrap();
        assert!(asm.contains("leal -12(%ebp)"), "asm:\n{}", asm);
    }

    #[test]
    fn multi_dim_subscript_linearizes() {
        let src = "int main(){ int a[2][3]; a[1][2]=9; return a[1][2]; }";
        let tac = compile_to_tac(src).unwrap();
        // off = i*3 + j, then scaled by the element size
        assert!(tac.contains("*_int"), "tac:\n{}", tac);
        assert!(tac.contains("%ebp-24"), "tac:\n{}", tac);
    }

    #[test]
    fn pointer_roundtrip() {
        let src = "int main(){ int x=5; int *p; p=&x; *p=6; return x; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("UNARY&"), "tac:\n{}", tac);
        assert!(tac.contains("(-"), "indirected store expected:\n{}", tac);
    }

    #[test]
    fn printf_call_pools_the_format_string() {
        let src = "int main(){ printf(\"hi %d\\n\", 5); return 0; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("param $.LC0"), "tac:\n{}", tac);
        assert!(tac.contains("callq printf"), "tac:\n{}", tac);
        assert!(tac.contains(".string \"hi %d\\n\""), "tac:\n{}", tac);
        let asm = compile_to_asm(src).unwrap();
        assert!(asm.contains("call printf"), "asm:\n{}", asm);
        assert!(asm.contains(".LC0:"), "asm:\n{}", asm);
    }

    #[test]
    fn printf_promotes_float_and_char_args() {
        let src = "int main(){ float f=1.5; char c='x'; printf(\"%f %c\", f, c); return 0; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("printf_push_float"), "tac:\n{}", tac);
        assert!(tac.contains("printf_push_char"), "tac:\n{}", tac);
    }

    #[test]
    fn math_functions_use_the_x87_push() {
        let src = "int main(){ float r; r = sqrt(2.0); r = pow(2.0, 3.0); return 0; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("math_func_push_float"), "tac:\n{}", tac);
        assert!(tac.contains("pow_func_push_float"), "tac:\n{}", tac);
        let asm = compile_to_asm(src).unwrap();
        assert!(asm.contains("call sqrt"), "asm:\n{}", asm);
        assert!(asm.contains("fstpl"), "asm:\n{}", asm);
        assert!(asm.contains("addl $16, %esp"), "asm:\n{}", asm);
    }

    #[test]
    fn struct_return_uses_hidden_pointer() {
        let src = "struct P { int a; char b; };\n\
                   struct P mk(int v){ struct P p; p.a=v; p.b='x'; return p; }\n\
                   int main(){ struct P q; q = mk(3); return q.a; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("retq_struct"), "tac:\n{}", tac);
        assert!(tac.contains("callq_struct"), "tac:\n{}", tac);
        let asm = compile_to_asm(src).unwrap();
        assert!(asm.contains("movl 8(%ebp)"), "asm:\n{}", asm);
    }

    #[test]
    fn struct_copy_expands_field_by_field() {
        let src = "struct P{int x; char c;}; int main(){ struct P a,b; a.x=1; a.c='q'; b=a; return b.x; }";
        let tac = compile_to_tac(src).unwrap();
        let int_copies = tac.lines().filter(|l| l.contains("=_int")).count();
        let char_copies = tac.lines().filter(|l| l.contains("=_char")).count();
        assert!(int_copies >= 2, "tac:\n{}", tac);
        assert!(char_copies >= 2, "tac:\n{}", tac);
    }

    #[test]
    fn arrow_goes_through_the_pointer() {
        let src = "struct P{int x; int y;}; int main(){ struct P p; struct P *q; q=&p; q->y=4; return p.y; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("+_int"), "field offset add:\n{}", tac);
        assert!(tac.contains("UNARY&"), "tac:\n{}", tac);
    }

    #[test]
    fn sizeof_is_a_compile_time_constant() {
        let src = "struct P{int x; char c; int y;}; int main(){ return sizeof(struct P) + sizeof(int); }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains("$9"), "tac:\n{}", tac);
        assert!(tac.contains("$4"), "tac:\n{}", tac);
    }

    #[test]
    fn increments_desugar_to_add_and_store() {
        let src = "int main(){ int i=0; i++; ++i; return i; }";
        let tac = compile_to_tac(src).unwrap();
        let adds = tac.lines().filter(|l| l.contains("+_int")).count();
        assert!(adds >= 2, "tac:\n{}", tac);
    }

    #[test]
    fn globals_land_in_comm() {
        let src = "int g; char buf[10]; int main(){ g=1; return g; }";
        let tac = compile_to_tac(src).unwrap();
        assert!(tac.contains(".comm g,4"), "tac:\n{}", tac);
        assert!(tac.contains(".comm buf,10"), "tac:\n{}", tac);
        assert!(tac.contains("=_int g"), "tac:\n{}", tac);
    }

    // ---- error taxonomy ------------------------------------------------

    fn expect_error(src: &str, needle: &str) {
        let err = compile(src, false).err().unwrap_or_else(|| {
            panic!("expected an error containing {:?} for: {}", needle, src)
        });
        assert!(err.contains(needle), "diagnostics were:\n{}", err);
    }

    #[test]
    fn error_use_before_declaration() {
        expect_error("int main(){ x = 1; return 0; }", "not declared");
    }

    #[test]
    fn error_redeclaration_in_same_scope() {
        expect_error("int main(){ int x; int x; return 0; }", "Redeclaration");
    }

    #[test]
    fn shadowing_is_only_a_warning() {
        let comp = compile("int x; int main(){ int x; x=1; return x; }", false).unwrap();
        assert_eq!(comp.diags.warning_count(), 1);
    }

    #[test]
    fn error_modulo_on_float() {
        expect_error("int main(){ float f=1.5; int x; x = f % 2; return 0; }", "Modulo");
    }

    #[test]
    fn error_pointer_plus_pointer() {
        expect_error(
            "int main(){ int a, *p, *q; p=&a; q=&a; p = p + q; return 0; }",
            "pointers",
        );
    }

    #[test]
    fn error_assign_to_non_lvalue() {
        expect_error("int main(){ 3 = 4; return 0; }", "l-value");
    }

    #[test]
    fn error_assign_to_array() {
        expect_error("int main(){ int a[2], b[2]; a = b; return 0; }", "array");
    }

    #[test]
    fn error_void_variable() {
        expect_error("int main(){ void v; return 0; }", "void");
    }

    #[test]
    fn void_pointer_is_fine() {
        assert!(compile("int main(){ void *p; return 0; }", false).is_ok());
    }

    #[test]
    fn error_conflicting_sign_specifiers() {
        expect_error("int main(){ signed unsigned int x; return 0; }", "Conflicting");
    }

    #[test]
    fn error_multiple_default_labels() {
        expect_error(
            "int main(){ int c=1; switch(c){ default: c=2; default: c=3; } return 0; }",
            "default",
        );
    }

    #[test]
    fn error_wrong_argument_count() {
        expect_error(
            "int f(int a){ return a; } int main(){ return f(1,2); }",
            "argument",
        );
    }

    #[test]
    fn error_global_initializer() {
        expect_error("int g = 5; int main(){ return 0; }", "initializer");
    }

    #[test]
    fn error_non_positive_array_bound() {
        expect_error("int main(){ int a[0]; return 0; }", "positive");
    }

    #[test]
    fn error_dereference_non_pointer() {
        expect_error("int main(){ int x; return *x; }", "dereference");
    }

    #[test]
    fn error_member_access_on_non_struct() {
        expect_error("int main(){ int x; x.f = 1; return 0; }", "non-struct");
    }

    #[test]
    fn error_multi_level_struct_pointer() {
        expect_error(
            "struct P{int x;}; int main(){ struct P **pp; return 0; }",
            "Multi-level",
        );
    }

    #[test]
    fn error_nested_struct_definition() {
        expect_error(
            "struct A { struct B { int x; } b; }; int main(){ return 0; }",
            "Nested",
        );
    }

    #[test]
    fn error_self_referencing_initializer() {
        expect_error("int main(){ int x = x; return 0; }", "own initializer");
    }

    #[test]
    fn error_return_type_checked() {
        expect_error(
            "void f(){ return 1; } int main(){ return 0; }",
            "void function",
        );
    }

    #[test]
    fn syntax_error_stops_with_excerpt() {
        let err = compile("int main(){ int x = ; return 0; }", false).err().unwrap();
        assert!(err.contains("SyntaxError"), "got:\n{}", err);
        assert!(err.contains("int x = ;"), "excerpt missing:\n{}", err);
    }

    #[test]
    fn multiple_semantic_errors_accumulate() {
        let src = "int main(){ a = 1; b = 2; return 0; }";
        let err = compile(src, false).err().unwrap();
        assert!(err.matches("not declared").count() >= 2, "got:\n{}", err);
    }

    #[test]
    fn break_outside_loop_is_not_an_error() {
        // the pending list is simply never consumed
        assert!(compile("int main(){ break; return 0; }", false).is_ok());
    }

    #[test]
    fn union_is_rejected_at_parse_time() {
        let err = compile("union U { int x; }; int main(){ return 0; }", false)
            .err()
            .unwrap();
        assert!(err.contains("SyntaxError"), "got:\n{}", err);
    }

    #[test]
    fn compile_file_writes_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("t.c");
        std::fs::write(&src_path, "int main(){ return 0; }").unwrap();
        let out = dir.path().join("t.s");
        compile_file(&src_path, &out, &CompilerConfig::default()).unwrap();
        let asm = std::fs::read_to_string(&out).unwrap();
        assert!(asm.contains(".globl main"));
        assert!(asm.contains("main:"));
    }
}

//! TAC to 32-bit x86 (AT&T) code generation.
//!
//! The generator walks the finished TAC once. Every instruction starts from
//! a clean register file (coarse per-instruction reclamation); operand forms
//! are resolved to addressing modes on demand, loading through registers
//! where x86 requires it. Labels are materialized lazily: the first jump to
//! a TAC line allocates `.L<n>`, and a final pass replaces the per-line
//! markers with the labels that were actually referenced.
//!
//! # Module structure
//!
//! - `regs.rs`: the register file (slot handles, swap-on-specific-request)
//! - `arith.rs`: integer/char/float arithmetic, comparisons, unaries
//! - `abi.rs`: argument pushes, calls, prologue/epilogue, returns
//! - `flow.rs`: assignment, casts, jumps, address-of, float loads
//! - `error.rs`: error type

mod abi;
mod arith;
mod error;
mod flow;
mod regs;

pub use error::CodeGenError;
pub use regs::{Reg, RegisterFile, Slot};

use crate::tac::{Instr, Operand, Tac};
use regs::Grant;
use std::collections::HashMap;

/// A resolved operand location.
#[derive(Debug, Clone)]
pub(crate) enum Loc {
    /// Value lives in the register behind this slot.
    Slot(Slot),
    /// A direct memory or label reference (`-8(%ebp)`, `name`, `.LF0`).
    Mem(String),
    /// An immediate (`$5`).
    Imm(String),
    /// Memory addressed by the register behind this slot (`(%eax)`).
    SlotDeref(Slot),
}

enum Line {
    /// Placeholder for the label of a 1-based TAC line.
    Pending(usize),
    Text(String),
}

pub struct CodeGenerator {
    out: Vec<Line>,
    pub(crate) regs: RegisterFile,
    labels: HashMap<usize, String>,
    label_num: usize,
}

/// Generate the full assembly listing from finished TAC.
pub fn generate(tac: &Tac) -> Result<String, CodeGenError> {
    let mut g = CodeGenerator::new();
    for (i, instr) in tac.code.iter().enumerate() {
        g.out.push(Line::Pending(i + 1));
        g.regs.reset();
        g.lower(instr)?;
    }
    Ok(g.render())
}

impl CodeGenerator {
    fn new() -> Self {
        let mut g = CodeGenerator {
            out: Vec::new(),
            regs: RegisterFile::new(),
            labels: HashMap::new(),
            label_num: 1,
        };
        for line in [".data", ".text", ".globl main", ".type main, @function", ""] {
            g.out.push(Line::Text(line.to_string()));
        }
        g
    }

    fn lower(&mut self, instr: &Instr) -> Result<(), CodeGenError> {
        match instr {
            Instr::Assign { ty, dst, src } => self.lower_assign(*ty, dst, src),
            Instr::Bin { op, ty, dst, lhs, rhs } => self.lower_bin(*op, *ty, dst, lhs, rhs),
            Instr::Cmp { op, ty, dst, lhs, rhs } => self.lower_cmp(*op, *ty, dst, lhs, rhs),
            Instr::Unary { op, ty, dst, src } => self.lower_unary(*op, *ty, dst, src),
            Instr::AddrOf { dst, src } => self.lower_addr_of(dst, src),
            Instr::Cast { dst, src, to, from } => self.lower_cast(dst, src, *to, *from),
            Instr::Goto { target } => self.lower_goto(*target),
            Instr::IfnzGoto { target, cond } => self.lower_ifnz(*target, cond),
            Instr::Param { src, size } => self.lower_param(src, *size),
            Instr::PushChar { src } => self.lower_push_char(src),
            Instr::PrintfPushFloat { src } => self.lower_printf_push_float(src),
            Instr::PrintfPushChar { src } => self.lower_printf_push_char(src),
            Instr::MathPush { ty, src } => self.lower_math_push(*ty, src),
            Instr::PowPush { ty, src } => self.lower_pow_push(*ty, src),
            Instr::Call { kind, dst, func, .. } => self.lower_call(*kind, dst.as_ref(), func),
            Instr::Ret { val } => self.lower_ret(val.as_ref()),
            Instr::RetStruct { ptr, size } => self.lower_ret_struct(ptr, *size),
            Instr::LoadFloat { label, dst } => self.lower_load_float(label, dst),
            Instr::FuncLabel(name) => {
                self.lower_func_label(name);
                Ok(())
            }
            Instr::Directive(text) => {
                self.text(text.clone());
                Ok(())
            }
            Instr::PushScope => Ok(()), // dropped by finish; ignore stragglers
        }
    }

    // ---- emission -----------------------------------------------------

    pub(crate) fn text(&mut self, s: String) {
        self.out.push(Line::Text(s));
    }

    pub(crate) fn emit0(&mut self, op: &str) {
        self.out.push(Line::Text(op.to_string()));
    }

    pub(crate) fn emit1(&mut self, op: &str, a: impl AsRef<str>) {
        self.out.push(Line::Text(format!("{} {}", op, a.as_ref())));
    }

    pub(crate) fn emit2(&mut self, op: &str, a: impl AsRef<str>, b: impl AsRef<str>) {
        self.out
            .push(Line::Text(format!("{} {}, {}", op, a.as_ref(), b.as_ref())));
    }

    // ---- registers ----------------------------------------------------

    pub(crate) fn reg_any(&mut self) -> Result<Slot, CodeGenError> {
        self.regs.request_any().ok_or(CodeGenError::RegisterPressure)
    }

    /// Claim a specific register, emitting the swap move when an occupant
    /// has to yield.
    pub(crate) fn reg_specific(&mut self, r: Reg) -> Result<Slot, CodeGenError> {
        match self.regs.request_specific(r) {
            Some(Grant::Taken(slot)) => Ok(slot),
            Some(Grant::Swapped { slot, moved_to }) => {
                self.emit2("movl", r.name(), moved_to.name());
                Ok(slot)
            }
            None => Err(CodeGenError::RegisterPressure),
        }
    }

    pub(crate) fn name(&self, slot: Slot) -> &'static str {
        self.regs.phys(slot).name()
    }

    /// The 8-bit half of a slot's register; the register file never hands
    /// out `%esi`/`%edi` for byte work on the paths that need this.
    pub(crate) fn byte_name(&self, slot: Slot) -> Result<&'static str, CodeGenError> {
        self.regs
            .phys(slot)
            .byte_name()
            .ok_or_else(|| CodeGenError::Logic("byte access to a high register".to_string()))
    }

    pub(crate) fn loc_text(&self, loc: &Loc) -> String {
        match loc {
            Loc::Slot(s) => self.name(*s).to_string(),
            Loc::Mem(m) => m.clone(),
            Loc::Imm(i) => i.clone(),
            Loc::SlotDeref(s) => format!("({})", self.name(*s)),
        }
    }

    /// Release any register held by a resolved location.
    pub(crate) fn release_loc(&mut self, loc: &Loc) {
        match loc {
            Loc::Slot(s) | Loc::SlotDeref(s) => self.regs.release(*s, false),
            _ => {}
        }
    }

    // ---- operand resolution -------------------------------------------

    /// Resolve an operand into an addressing mode without forcing the value
    /// into a register: indirections load their address, frame-address
    /// forms compute it with `leal`.
    pub(crate) fn resolve(&mut self, op: &Operand, want: Option<Reg>) -> Result<Loc, CodeGenError> {
        match op {
            Operand::Deref(inner) => {
                let addr = self.resolve(&**inner, None)?;
                let slot = match want {
                    Some(r) => self.reg_specific(r)?,
                    None => self.reg_any()?,
                };
                let txt = self.loc_text(&addr);
                self.emit2("movl", txt, self.name(slot));
                self.release_loc(&addr);
                Ok(Loc::SlotDeref(slot))
            }
            Operand::FrameAddr(off) => {
                let slot = match want {
                    Some(r) => self.reg_specific(r)?,
                    None => self.reg_any()?,
                };
                self.emit2("leal", format!("{}(%ebp)", off), self.name(slot));
                Ok(Loc::Slot(slot))
            }
            Operand::Stack(off) => Ok(Loc::Mem(format!("{}(%ebp)", off))),
            Operand::Global(name) => Ok(Loc::Mem(name.clone())),
            Operand::Label(l) => Ok(Loc::Mem(l.clone())),
            Operand::Imm(v) => Ok(Loc::Imm(format!("${}", v))),
            Operand::Reg(r) => Ok(Loc::Mem(r.to_string())),
        }
    }

    /// Load an operand's value into a register. `byte` widens char-sized
    /// memory through `movzbl`.
    pub(crate) fn load(
        &mut self,
        op: &Operand,
        want: Option<Reg>,
        byte: bool,
    ) -> Result<Slot, CodeGenError> {
        let slot = match want {
            Some(r) => self.reg_specific(r)?,
            None => self.reg_any()?,
        };
        match op {
            Operand::Deref(inner) => {
                let addr = self.resolve(&**inner, None)?;
                let txt = self.loc_text(&addr);
                self.emit2("movl", txt, self.name(slot));
                self.release_loc(&addr);
                let mem = format!("({})", self.name(slot));
                if byte {
                    self.emit2("movzbl", mem, self.name(slot));
                } else {
                    self.emit2("movl", mem, self.name(slot));
                }
            }
            Operand::FrameAddr(off) => {
                self.emit2("leal", format!("{}(%ebp)", off), self.name(slot));
            }
            Operand::Imm(v) => {
                self.emit2("movl", format!("${}", v), self.name(slot));
            }
            _ => {
                let loc = self.resolve(op, None)?;
                let txt = self.loc_text(&loc);
                if byte {
                    self.emit2("movzbl", txt, self.name(slot));
                } else {
                    self.emit2("movl", txt, self.name(slot));
                }
                self.release_loc(&loc);
            }
        }
        Ok(slot)
    }

    /// Memory form of an operand for the x87 instructions (`flds`/`fildl`
    /// take no immediates or registers).
    pub(crate) fn float_loc(&mut self, op: &Operand) -> Result<Loc, CodeGenError> {
        match op {
            Operand::Deref(inner) => {
                let addr = self.resolve(&**inner, None)?;
                let slot = self.reg_any()?;
                let txt = self.loc_text(&addr);
                self.emit2("movl", txt, self.name(slot));
                self.release_loc(&addr);
                Ok(Loc::SlotDeref(slot))
            }
            _ => self.resolve(op, None),
        }
    }

    // ---- labels --------------------------------------------------------

    /// `.L<n>` for a 1-based TAC line, allocated at first reference.
    pub(crate) fn jump_label(&mut self, line: usize) -> String {
        if let Some(l) = self.labels.get(&line) {
            return l.clone();
        }
        let label = format!(".L{}", self.label_num);
        self.label_num += 1;
        self.labels.insert(line, label.clone());
        label
    }

    fn render(&self) -> String {
        let mut s = String::new();
        for line in &self.out {
            match line {
                Line::Pending(i) => {
                    if let Some(l) = self.labels.get(i) {
                        s.push_str(l);
                        s.push_str(":\n");
                    }
                }
                Line::Text(t) => {
                    s.push_str(t);
                    s.push('\n');
                }
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tac::{BinOp, CmpOp};
    use crate::types::ValType;

    fn gen(code: Vec<Instr>) -> String {
        let mut tac = Tac::new();
        for i in code {
            tac.emit(i);
        }
        tac.finish();
        generate(&tac).expect("codegen")
    }

    #[test]
    fn header_sections() {
        let asm = gen(vec![]);
        assert!(asm.starts_with(".data\n.text\n.globl main\n.type main, @function\n"));
    }

    #[test]
    fn int_add_lowers_to_addl() {
        let asm = gen(vec![Instr::Bin {
            op: BinOp::Add,
            ty: ValType::Int,
            dst: Operand::Stack(-12),
            lhs: Operand::Stack(-4),
            rhs: Operand::Stack(-8),
        }]);
        assert!(asm.contains("movl -4(%ebp), %edx"), "asm:\n{}", asm);
        assert!(asm.contains("movl -8(%ebp), %edi"), "asm:\n{}", asm);
        assert!(asm.contains("addl %edx, %edi"), "asm:\n{}", asm);
        assert!(asm.contains("movl %edi, -12(%ebp)"), "asm:\n{}", asm);
    }

    #[test]
    fn jump_targets_materialize_labels() {
        let asm = gen(vec![
        Instr::Goto { target: Some(1) },
            Instr::Ret { val: None },
        ]);
        assert!(asm.contains("jmp .L1"), "asm:\n{}", asm);
        assert!(asm.contains(".L1:"), "asm:\n{}", asm);
    }

    #[test]
    fn ifnz_compares_against_zero() {
        let asm = gen(vec![
            Instr::IfnzGoto {
                target: Some(1),
                cond: Operand::Stack(-4),
            },
            Instr::Ret { val: None },
        ]);
        assert!(asm.contains("cmp $0, %edx"), "asm:\n{}", asm);
        assert!(asm.contains("jne .L1"), "asm:\n{}", asm);
    }

    #[test]
    fn function_label_emits_prologue() {
        let asm = gen(vec![Instr::FuncLabel("main".to_string())]);
        let main_at = asm.find("main:").unwrap();
        let push_at = asm.find("push %ebp").unwrap();
        let mov_at = asm.find("movl %esp, %ebp").unwrap();
        assert!(main_at < push_at && push_at < mov_at);
    }

    #[test]
    fn empty_function_is_prologue_ret_epilogue() {
        let asm = gen(vec![
            Instr::FuncLabel("f".to_string()),
            Instr::Ret {
                val: Some(Operand::imm(0)),
            },
        ]);
        assert!(asm.contains("movl $0, %eax"), "asm:\n{}", asm);
        assert!(asm.contains("movl %ebp, %esp"), "asm:\n{}", asm);
        assert!(asm.contains("popl %ebp"), "asm:\n{}", asm);
        assert!(asm.contains("\nret"), "asm:\n{}", asm);
    }

    #[test]
    fn float_compare_uses_fucomip_and_seta() {
        let asm = gen(vec![Instr::Cmp {
            op: CmpOp::Lt,
            ty: ValType::Float,
            dst: Operand::Stack(-12),
            lhs: Operand::Stack(-4),
            rhs: Operand::Stack(-8),
        }]);
        assert!(asm.contains("flds -4(%ebp)"), "asm:\n{}", asm);
        assert!(asm.contains("flds -8(%ebp)"), "asm:\n{}", asm);
        assert!(asm.contains("fucomip %st(1), %st"), "asm:\n{}", asm);
        assert!(asm.contains("fstp %st(0)"), "asm:\n{}", asm);
        assert!(asm.contains("seta"), "asm:\n{}", asm);
        assert!(asm.contains("movzbl"), "asm:\n{}", asm);
    }

    #[test]
    fn char_ops_use_byte_moves() {
        let asm = gen(vec![Instr::Assign {
            ty: ValType::Char,
            dst: Operand::Stack(-5),
            src: Operand::imm(65),
        }]);
        assert!(asm.contains("movb $65, -5(%ebp)"), "asm:\n{}", asm);
    }

    #[test]
    fn division_routes_through_eax_edx() {
        let asm = gen(vec![Instr::Bin {
            op: BinOp::Div,
            ty: ValType::Int,
            dst: Operand::Stack(-12),
            lhs: Operand::Stack(-4),
            rhs: Operand::Stack(-8),
        }]);
        assert!(asm.contains("cltd"), "asm:\n{}", asm);
        assert!(asm.contains("idivl"), "asm:\n{}", asm);
        assert!(asm.contains("movl %eax, -12(%ebp)"), "asm:\n{}", asm);
    }

    #[test]
    fn modulo_takes_remainder_from_edx() {
        let asm = gen(vec![Instr::Bin {
            op: BinOp::Mod,
            ty: ValType::Int,
            dst: Operand::Stack(-12),
            lhs: Operand::Stack(-4),
            rhs: Operand::Stack(-8),
        }]);
        assert!(asm.contains("movl %edx, -12(%ebp)"), "asm:\n{}", asm);
    }

    #[test]
    fn shift_count_goes_through_cl() {
        let asm = gen(vec![Instr::Bin {
            op: BinOp::Shl,
            ty: ValType::Int,
            dst: Operand::Stack(-12),
            lhs: Operand::Stack(-4),
            rhs: Operand::Stack(-8),
        }]);
        assert!(asm.contains("shll %cl"), "asm:\n{}", asm);
    }

    #[test]
    fn cast_int_to_float_goes_through_x87() {
        let asm = gen(vec![Instr::Cast {
            dst: Operand::Stack(-8),
            src: Operand::Stack(-4),
            to: crate::types::CastTy::Float,
            from: crate::types::CastTy::Int,
        }]);
        assert!(asm.contains("fildl -4(%ebp)"), "asm:\n{}", asm);
        assert!(asm.contains("fstps -8(%ebp)"), "asm:\n{}", asm);
    }

    #[test]
    fn struct_call_pushes_return_slot() {
        let asm = gen(vec![Instr::Call {
            kind: crate::tac::CallKind::Struct,
            dst: Some(Operand::Stack(-12)),
            func: "mk".to_string(),
            nargs: 0,
        }]);
        assert!(asm.contains("leal -12(%ebp)"), "asm:\n{}", asm);
        assert!(asm.contains("call mk"), "asm:\n{}", asm);
    }
}

//! Three-address code: instruction buffer, operands, backpatching, literal
//! pools and the finishing pass.
//!
//! Instruction indices are stable for the whole translation; they are the
//! unit of backpatching. Jumps hold `Option<usize>` targets (0-based in the
//! buffer); `finish` appends the literal pools and globals, drops jumps whose
//! target was never patched along with redundant consecutive returns, and
//! renumbers the surviving targets densely. The textual form is line
//! oriented, 2-4 space-separated fields, 1-based jump targets.

use crate::types::{CastTy, ValType};
use std::fmt;

/// A TAC operand. The code generator resolves these into x86 addressing
/// modes; `Display` renders the textual TAC form.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `$5`, `$.LC0` - immediates and pooled-literal addresses.
    Imm(String),
    /// `-8(%ebp)` - a frame slot (negative locals, positive parameters).
    Stack(i32),
    /// A global, addressed by name.
    Global(String),
    /// `%ebp-24` - address computation form, lowered with `leal`.
    FrameAddr(i32),
    /// `.LF0` and friends.
    Label(String),
    /// `( ... )` - one level of indirection around another operand.
    Deref(Box<Operand>),
    /// A fixed machine register; only `%esp` appears, in scope adjustments.
    Reg(&'static str),
}

impl Operand {
    pub fn imm(v: impl fmt::Display) -> Self {
        Operand::Imm(v.to_string())
    }

    pub fn deref(inner: Operand) -> Self {
        Operand::Deref(Box::new(inner))
    }

    pub fn is_deref(&self) -> bool {
        matches!(self, Operand::Deref(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm(s) => write!(f, "${}", s),
            Operand::Stack(off) => write!(f, "{}(%ebp)", off),
            Operand::Global(name) => write!(f, "{}", name),
            Operand::FrameAddr(off) => {
                if *off >= 0 {
                    write!(f, "%ebp+{}", off)
                } else {
                    write!(f, "%ebp{}", off)
                }
            }
            Operand::Label(l) => write!(f, "{}", l),
            Operand::Deref(inner) => write!(f, "({})", inner),
            Operand::Reg(r) => write!(f, "{}", r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinOp {
    pub fn sigil(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn sigil(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    BitNot,
    LogNot,
}

impl UnOp {
    pub fn sigil(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::BitNot => "~",
            UnOp::LogNot => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Normal,
    Char,
    Struct,
}

/// One TAC instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Assign {
        ty: ValType,
        dst: Operand,
        src: Operand,
    },
    Bin {
        op: BinOp,
        ty: ValType,
        dst: Operand,
        lhs: Operand,
        rhs: Operand,
    },
    Cmp {
        op: CmpOp,
        ty: ValType,
        dst: Operand,
        lhs: Operand,
        rhs: Operand,
    },
    Unary {
        op: UnOp,
        ty: ValType,
        dst: Operand,
        src: Operand,
    },
    /// `UNARY& dst src` - address-of; also the rewritten scope adjustment
    /// (`UNARY& %esp N(%ebp)`).
    AddrOf {
        dst: Operand,
        src: Operand,
    },
    Cast {
        dst: Operand,
        src: Operand,
        to: CastTy,
        from: CastTy,
    },
    Goto {
        target: Option<usize>,
    },
    IfnzGoto {
        target: Option<usize>,
        cond: Operand,
    },
    Param {
        src: Operand,
        size: Option<u32>,
    },
    PushChar {
        src: Operand,
    },
    PrintfPushFloat {
        src: Operand,
    },
    PrintfPushChar {
        src: Operand,
    },
    MathPush {
        ty: ValType,
        src: Operand,
    },
    PowPush {
        ty: ValType,
        src: Operand,
    },
    Call {
        kind: CallKind,
        dst: Option<Operand>,
        func: String,
        nargs: u32,
    },
    Ret {
        val: Option<Operand>,
    },
    RetStruct {
        ptr: Operand,
        size: u32,
    },
    LoadFloat {
        label: String,
        dst: Operand,
    },
    FuncLabel(String),
    /// Placeholder emitted at scope entry, rewritten at scope exit; dropped
    /// by `finish` when the scope allocated nothing.
    PushScope,
    /// Assembler directive appended by `finish` (pools, globals, sections).
    Directive(String),
}

impl Instr {
    pub fn is_jump(&self) -> bool {
        matches!(self, Instr::Goto { .. } | Instr::IfnzGoto { .. })
    }

    pub fn target(&self) -> Option<usize> {
        match self {
            Instr::Goto { target } | Instr::IfnzGoto { target, .. } => *target,
            _ => None,
        }
    }

    fn set_target(&mut self, t: usize) {
        match self {
            Instr::Goto { target } | Instr::IfnzGoto { target, .. } => *target = Some(t),
            _ => {}
        }
    }

    fn is_ret(&self) -> bool {
        matches!(self, Instr::Ret { .. } | Instr::RetStruct { .. })
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tgt = |t: &Option<usize>| match t {
            Some(i) => (i + 1).to_string(),
            None => String::new(),
        };
        match self {
            Instr::Assign { ty, dst, src } => write!(f, "=_{} {} {}", ty, dst, src),
            Instr::Bin { op, ty, dst, lhs, rhs } => {
                write!(f, "{}_{} {} {} {}", op.sigil(), ty, dst, lhs, rhs)
            }
            Instr::Cmp { op, ty, dst, lhs, rhs } => {
                write!(f, "{}_{} {} {} {}", op.sigil(), ty, dst, lhs, rhs)
            }
            Instr::Unary { op, ty, dst, src } => {
                write!(f, "UNARY{}_{} {} {}", op.sigil(), ty, dst, src)
            }
            Instr::AddrOf { dst, src } => write!(f, "UNARY& {} {}", dst, src),
            Instr::Cast { dst, src, to, from } => {
                write!(f, "cast {} {} {},{}", dst, src, to, from)
            }
            Instr::Goto { target } => write!(f, "goto {}", tgt(target)),
            Instr::IfnzGoto { target, cond } => write!(f, "ifnz goto {} {}", tgt(target), cond),
            Instr::Param { src, size: None } => write!(f, "param {}", src),
            Instr::Param { src, size: Some(n) } => write!(f, "param {} ${}", src, n),
            Instr::PushChar { src } => write!(f, "push_char {}", src),
            Instr::PrintfPushFloat { src } => write!(f, "printf_push_float {}", src),
            Instr::PrintfPushChar { src } => write!(f, "printf_push_char {}", src),
            Instr::MathPush { ty, src } => write!(f, "math_func_push_{} {}", ty, src),
            Instr::PowPush { ty, src } => write!(f, "pow_func_push_{} {}", ty, src),
            Instr::Call { kind, dst, func, nargs } => {
                let op = match kind {
                    CallKind::Normal => "callq",
                    CallKind::Char => "callq_char",
                    CallKind::Struct => "callq_struct",
                };
                match dst {
                    Some(d) => write!(f, "{} {} {} ${}", op, d, func, nargs),
                    None => write!(f, "{} {}", op, func),
                }
            }
            Instr::Ret { val: Some(v) } => write!(f, "retq {}", v),
            Instr::Ret { val: None } => write!(f, "retq"),
            Instr::RetStruct { ptr, size } => write!(f, "retq_struct {} {}", ptr, size),
            Instr::LoadFloat { label, dst } => write!(f, "load_float {} {}", label, dst),
            Instr::FuncLabel(name) => write!(f, "{}:", name),
            Instr::PushScope => write!(f, "PushScope"),
            Instr::Directive(text) => write!(f, "{}", text),
        }
    }
}

/// The instruction buffer plus literal pools and counters.
pub struct Tac {
    pub code: Vec<Instr>,
    /// IEEE-754 bit patterns, one `.LF<n>` per entry.
    pub float_pool: Vec<u32>,
    /// Raw string literals (quotes and escapes preserved), `.LC<n>` each.
    pub string_pool: Vec<String>,
    /// `(name, size)` pairs emitted as `.comm`.
    pub globals: Vec<(String, u32)>,
    temp_counter: usize,
    scope_counter: usize,
    finished: bool,
}

impl Tac {
    pub fn new() -> Self {
        Tac {
            code: Vec::new(),
            float_pool: Vec::new(),
            string_pool: Vec::new(),
            globals: Vec::new(),
            temp_counter: 0,
            scope_counter: 0,
            finished: false,
        }
    }

    /// Index the next emitted instruction will occupy. This is the marker
    /// value captured before sub-expressions and statement bodies.
    pub fn next_index(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, instr: Instr) -> usize {
        debug_assert!(!self.finished, "emission after finish");
        self.code.push(instr);
        self.code.len() - 1
    }

    /// Overwrite the jump target of every instruction in `list`.
    /// Non-jump indices are left untouched.
    pub fn backpatch(&mut self, list: &[usize], target: usize) {
        for &i in list {
            if self.code[i].is_jump() {
                self.code[i].set_target(target);
            }
        }
    }

    pub fn fresh_temp_name(&mut self) -> String {
        self.temp_counter += 1;
        format!("temp_var_{}", self.temp_counter)
    }

    pub fn fresh_scope_num(&mut self) -> usize {
        self.scope_counter += 1;
        self.scope_counter
    }

    /// Intern a string literal, returning its `.LC<n>` label.
    pub fn intern_string(&mut self, raw: &str) -> String {
        if let Some(i) = self.string_pool.iter().position(|s| s == raw) {
            return format!(".LC{}", i);
        }
        self.string_pool.push(raw.to_string());
        format!(".LC{}", self.string_pool.len() - 1)
    }

    /// Intern a float constant, returning its `.LF<n>` label.
    pub fn intern_float(&mut self, value: f32) -> String {
        let bits = value.to_bits();
        if let Some(i) = self.float_pool.iter().position(|&b| b == bits) {
            return format!(".LF{}", i);
        }
        self.float_pool.push(bits);
        format!(".LF{}", self.float_pool.len() - 1)
    }

    pub fn add_global(&mut self, name: &str, size: u32) {
        self.globals.push((name.to_string(), size));
    }

    /// Append pools and globals, drop unpatched jumps, leftover scope
    /// placeholders and doubled returns, then remap every surviving target.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        for i in 0..self.string_pool.len() {
            self.code.push(Instr::Directive(format!(".LC{}:", i)));
            self.code
                .push(Instr::Directive(format!(".string {}", self.string_pool[i])));
        }
        for i in 0..self.float_pool.len() {
            self.code.push(Instr::Directive(format!(".LF{}:", i)));
            self.code
                .push(Instr::Directive(format!(".long {}", self.float_pool[i])));
        }
        for (name, size) in &self.globals {
            self.code.push(Instr::Directive(format!(".comm {},{}", name, size)));
        }
        self.code.push(Instr::Directive(".data".to_string()));

        // Deletion pass. old index -> new index for target remapping; a
        // dropped instruction maps to the slot the next survivor takes.
        let old = std::mem::take(&mut self.code);
        let mut remap = vec![0usize; old.len()];
        let mut kept: Vec<Instr> = Vec::with_capacity(old.len());
        let mut prev_was_ret = false;
        for (i, instr) in old.into_iter().enumerate() {
            remap[i] = kept.len();
            let drop = match &instr {
                Instr::Goto { target: None } | Instr::IfnzGoto { target: None, .. } => true,
                Instr::PushScope => true,
                ins if ins.is_ret() && prev_was_ret => true,
                _ => false,
            };
            if drop {
                continue;
            }
            prev_was_ret = instr.is_ret();
            kept.push(instr);
        }
        let kept_len = kept.len();
        for instr in &mut kept {
            if let Some(t) = instr.target() {
                let new_t = remap.get(t).copied().unwrap_or(kept_len - 1);
                instr.set_target(new_t.min(kept_len - 1));
            }
        }
        self.code = kept;
    }

    /// Textual TAC listing: 1-based index, then the instruction fields.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for (i, instr) in self.code.iter().enumerate() {
            out.push_str(&format!("{} {}\n", i + 1, instr));
        }
        out
    }
}

impl Default for Tac {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goto() -> Instr {
        Instr::Goto { target: None }
    }

    #[test]
    fn emit_returns_stable_indices() {
        let mut tac = Tac::new();
        let a = tac.emit(goto());
        let b = tac.emit(goto());
        assert_eq!((a, b), (0, 1));
        assert_eq!(tac.next_index(), 2);
    }

    #[test]
    fn backpatch_only_touches_jumps() {
        let mut tac = Tac::new();
        let j = tac.emit(goto());
        let r = tac.emit(Instr::Ret { val: None });
        tac.backpatch(&[j, r], 5);
        assert_eq!(tac.code[j].target(), Some(5));
        assert_eq!(tac.code[r].target(), None);
    }

    #[test]
    fn finish_drops_unpatched_jumps_and_remaps() {
        let mut tac = Tac::new();
        tac.emit(Instr::Assign {
            ty: ValType::Int,
            dst: Operand::Stack(-4),
            src: Operand::imm(1),
        });
        tac.emit(goto()); // never patched, dropped
        let j = tac.emit(goto());
        let target = tac.emit(Instr::Ret { val: None });
        tac.backpatch(&[j], target);
        tac.finish();
        // 1-based targets must stay inside the code after renumbering
        for instr in &tac.code {
            if let Some(t) = instr.target() {
                assert!(t < tac.code.len());
            }
        }
        let listing = tac.listing();
        // goto now jumps to instruction 3 (assign, goto, ret, .data)
        assert!(listing.contains("2 goto 3"), "listing was:\n{}", listing);
    }

    #[test]
    fn finish_drops_doubled_returns() {
        let mut tac = Tac::new();
        tac.emit(Instr::Ret { val: Some(Operand::imm(0)) });
        tac.emit(Instr::Ret { val: None });
        tac.finish();
        let rets = tac.code.iter().filter(|i| matches!(i, Instr::Ret { .. })).count();
        assert_eq!(rets, 1);
    }

    #[test]
    fn pools_dedup_and_label() {
        let mut tac = Tac::new();
        assert_eq!(tac.intern_float(1.5), ".LF0");
        assert_eq!(tac.intern_float(2.5), ".LF1");
        assert_eq!(tac.intern_float(1.5), ".LF0");
        assert_eq!(tac.intern_string("\"hi\""), ".LC0");
        assert_eq!(tac.intern_string("\"hi\""), ".LC0");
        tac.finish();
        let listing = tac.listing();
        assert!(listing.contains(".LF0:"));
        assert!(listing.contains(&format!(".long {}", 1.5f32.to_bits())));
        assert!(listing.contains(".string \"hi\""));
    }

    #[test]
    fn operand_display_forms() {
        assert_eq!(Operand::imm(7).to_string(), "$7");
        assert_eq!(Operand::Stack(-8).to_string(), "-8(%ebp)");
        assert_eq!(Operand::Stack(12).to_string(), "12(%ebp)");
        assert_eq!(Operand::FrameAddr(-24).to_string(), "%ebp-24");
        assert_eq!(
            Operand::deref(Operand::Stack(-4)).to_string(),
            "(-4(%ebp))"
        );
    }

    #[test]
    fn instr_display_forms() {
        let i = Instr::Bin {
            op: BinOp::Mul,
            ty: ValType::Int,
            dst: Operand::Stack(-12),
            lhs: Operand::Stack(-4),
            rhs: Operand::Stack(-8),
        };
        assert_eq!(i.to_string(), "*_int -12(%ebp) -4(%ebp) -8(%ebp)");
        let c = Instr::Cast {
            dst: Operand::Stack(-4),
            src: Operand::Stack(-8),
            to: CastTy::Float,
            from: CastTy::Int,
        };
        assert_eq!(c.to_string(), "cast -4(%ebp) -8(%ebp) float,int");
        let j = Instr::IfnzGoto {
            target: Some(4),
            cond: Operand::Stack(-4),
        };
        assert_eq!(j.to_string(), "ifnz goto 5 -4(%ebp)");
    }
}

//! Integer, char and float arithmetic, comparisons and unary operators.
//!
//! Every typed TAC opcode has a fixed register discipline: divisions own
//! `%eax`/`%edx`, shift counts travel through `%cl`, char results come back
//! through a byte half around a 32-bit carrier.

use super::{CodeGenError, CodeGenerator, Reg};
use crate::tac::{BinOp, CmpOp, Operand, UnOp};
use crate::types::ValType;

impl CodeGenerator {
    pub(crate) fn lower_bin(
        &mut self,
        op: BinOp,
        ty: ValType,
        dst: &Operand,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<(), CodeGenError> {
        if ty == ValType::Float {
            return self.bin_float(op, dst, lhs, rhs);
        }
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor => {
                self.bin_simple(op, ty, dst, lhs, rhs)
            }
            BinOp::Div => self.bin_div(ty, dst, lhs, rhs, false),
            BinOp::Mod => self.bin_div(ty, dst, lhs, rhs, true),
            BinOp::Shl | BinOp::Shr => self.bin_shift(op, ty, dst, lhs, rhs),
        }
    }

    fn bin_float(
        &mut self,
        op: BinOp,
        dst: &Operand,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<(), CodeGenError> {
        let mnemonic = match op {
            BinOp::Add => "fadds",
            BinOp::Sub => "fsubs",
            BinOp::Mul => "fmuls",
            BinOp::Div => "fdivs",
            other => {
                return Err(CodeGenError::Logic(format!(
                    "float lowering for integral-only operator {}",
                    other.sigil()
                )))
            }
        };
        let d = self.float_loc(dst)?;
        let a = self.float_loc(lhs)?;
        let b = self.float_loc(rhs)?;
        let (a, b, d) = (self.loc_text(&a), self.loc_text(&b), self.loc_text(&d));
        self.emit1("flds", a);
        self.emit1(mnemonic, b);
        self.emit1("fstps", d);
        Ok(())
    }

    /// add/sub/mul and the bitwise set: two loads, one ALU op, one store.
    fn bin_simple(
        &mut self,
        op: BinOp,
        ty: ValType,
        dst: &Operand,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<(), CodeGenError> {
        let mnemonic = match op {
            BinOp::Add => "addl",
            BinOp::Sub => "subl",
            BinOp::Mul => "imull",
            BinOp::And => "andl",
            BinOp::Or => "orl",
            BinOp::Xor => "xorl",
            _ => unreachable!(),
        };
        if ty == ValType::Char {
            // byte operands are widened into fixed carriers
            let (want1, want2) = match op {
                BinOp::Add | BinOp::Sub => (Reg::Edx, Reg::Eax),
                _ => (Reg::Eax, Reg::Edx),
            };
            let r1 = self.load(lhs, Some(want1), true)?;
            let r2 = self.load(rhs, Some(want2), true)?;
            let d = self.resolve(dst, None)?;
            match op {
                BinOp::Add | BinOp::Sub => {
                    // result accumulates in the lhs carrier
                    self.emit2(mnemonic, self.name(r2), self.name(r1));
                    let byte = self.byte_name(r1)?;
                    let d_txt = self.loc_text(&d);
                    self.emit2("movb", byte, d_txt);
                }
                _ => {
                    self.emit2(mnemonic, self.name(r1), self.name(r2));
                    let byte = self.byte_name(r2)?;
                    let d_txt = self.loc_text(&d);
                    self.emit2("movb", byte, d_txt);
                }
            }
            self.regs.release(r1, false);
            self.regs.release(r2, false);
            self.release_loc(&d);
            return Ok(());
        }

        let r1 = self.load(lhs, None, false)?;
        let r2 = self.load(rhs, None, false)?;
        let d = self.resolve(dst, None)?;
        match op {
            BinOp::Sub => {
                self.emit2(mnemonic, self.name(r2), self.name(r1));
                let d_txt = self.loc_text(&d);
                self.emit2("movl", self.name(r1), d_txt);
            }
            _ => {
                self.emit2(mnemonic, self.name(r1), self.name(r2));
                let d_txt = self.loc_text(&d);
                self.emit2("movl", self.name(r2), d_txt);
            }
        }
        self.regs.release(r1, false);
        self.regs.release(r2, false);
        self.release_loc(&d);
        Ok(())
    }

    /// Division and modulo both run `cltd; idivl`; the quotient lands in
    /// `%eax`, the remainder in `%edx`.
    fn bin_div(
        &mut self,
        ty: ValType,
        dst: &Operand,
        lhs: &Operand,
        rhs: &Operand,
        modulo: bool,
    ) -> Result<(), CodeGenError> {
        let edx = self.reg_specific(Reg::Edx)?;
        let eax = self.reg_specific(Reg::Eax)?;
        let byte = ty == ValType::Char;
        let (want1, want2) = if byte {
            if modulo {
                (Some(Reg::Ebx), Some(Reg::Ecx))
            } else {
                (Some(Reg::Ecx), Some(Reg::Ebx))
            }
        } else {
            (None, None)
        };
        let r1 = self.load(lhs, want1, byte)?;
        let r2 = self.load(rhs, want2, byte)?;
        self.emit2("movl", self.name(r1), "%eax");
        self.emit0("cltd");
        self.emit1("idivl", self.name(r2));
        let d = self.resolve(dst, None)?;
        let d_txt = self.loc_text(&d);
        let result = if modulo { "%edx" } else { "%eax" };
        if byte {
            let half = if modulo { "%dl" } else { "%al" };
            self.emit2("movb", half, d_txt);
        } else {
            self.emit2("movl", result, d_txt);
        }
        self.regs.release(r1, false);
        self.regs.release(r2, false);
        self.release_loc(&d);
        self.regs.release(edx, true);
        self.regs.release(eax, true);
        Ok(())
    }

    /// The shift count is consumed through `%cl`.
    fn bin_shift(
        &mut self,
        op: BinOp,
        ty: ValType,
        dst: &Operand,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<(), CodeGenError> {
        let mnemonic = if op == BinOp::Shl { "shll" } else { "sarl" };
        let byte = ty == ValType::Char;
        let want1 = if byte { Some(Reg::Eax) } else { None };
        let r1 = self.load(lhs, want1, byte)?;
        let r2 = self.load(rhs, Some(Reg::Ecx), byte)?;
        self.emit2(mnemonic, "%cl", self.name(r1));
        let d = self.resolve(dst, None)?;
        let d_txt = self.loc_text(&d);
        if byte {
            let half = self.byte_name(r1)?;
            self.emit2("movb", half, d_txt);
        } else {
            self.emit2("movl", self.name(r1), d_txt);
        }
        self.regs.release(r1, false);
        self.regs.release(r2, true);
        self.release_loc(&d);
        Ok(())
    }

    pub(crate) fn lower_cmp(
        &mut self,
        op: CmpOp,
        ty: ValType,
        dst: &Operand,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<(), CodeGenError> {
        if ty == ValType::Float {
            return self.cmp_float(op, dst, lhs, rhs);
        }
        let setcc = match op {
            CmpOp::Le => "setle",
            CmpOp::Ge => "setge",
            CmpOp::Eq => "sete",
            CmpOp::Ne => "setne",
            CmpOp::Lt => "setl",
            CmpOp::Gt => "setg",
        };
        let byte = ty == ValType::Char;
        let (want1, want2) = if byte {
            (Some(Reg::Eax), Some(Reg::Ecx))
        } else {
            (None, None)
        };
        let r1 = self.load(lhs, want1, byte)?;
        let r2 = self.load(rhs, want2, byte)?;
        self.emit2("cmpl", self.name(r2), self.name(r1));
        let flag = self.reg_specific(Reg::Edx)?;
        let half = self.byte_name(flag)?;
        self.emit1(setcc, half);
        self.emit2("movzbl", half, self.name(r2));
        let d = self.resolve(dst, None)?;
        let d_txt = self.loc_text(&d);
        if byte {
            let src_half = self.byte_name(r2)?;
            self.emit2("movb", src_half, d_txt);
        } else {
            self.emit2("movl", self.name(r2), d_txt);
        }
        self.regs.release(r1, false);
        self.regs.release(r2, false);
        self.regs.release(flag, false);
        self.release_loc(&d);
        Ok(())
    }

    /// x87 comparison: `fucomip` pops one operand, `fstp` drops the other.
    /// `==`/`!=` need a second compare to fold the NaN parity flag away.
    fn cmp_float(
        &mut self,
        op: CmpOp,
        dst: &Operand,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<(), CodeGenError> {
        let flag = self.reg_specific(Reg::Edx)?;
        let aux = if matches!(op, CmpOp::Eq | CmpOp::Ne) {
            Some(self.reg_specific(Reg::Ecx)?)
        } else {
            None
        };
        let d = self.float_loc(dst)?;
        let a = self.float_loc(lhs)?;
        let b = self.float_loc(rhs)?;
        let (d, a, b) = (self.loc_text(&d), self.loc_text(&a), self.loc_text(&b));
        let half = self.byte_name(flag)?;
        let flag_name = self.name(flag);

        let fcompare = |g: &mut Self, first: &str, second: &str| {
            g.emit1("flds", first);
            g.emit1("flds", second);
            g.emit2("fucomip", "%st(1)", "%st");
            g.emit1("fstp", "%st(0)");
        };

        match op {
            CmpOp::Lt => {
                fcompare(self, &a, &b);
                self.emit1("seta", half);
            }
            CmpOp::Gt => {
                fcompare(self, &b, &a);
                self.emit1("seta", half);
            }
            CmpOp::Le => {
                fcompare(self, &a, &b);
                self.emit1("setnb", half);
            }
            CmpOp::Ge => {
                fcompare(self, &b, &a);
                self.emit1("setnb", half);
            }
            CmpOp::Eq | CmpOp::Ne => {
                let aux_name = self.name(aux.expect("aux register reserved"));
                fcompare(self, &a, &b);
                if op == CmpOp::Eq {
                    self.emit1("setnp", half);
                    self.emit2("movl", "$0", aux_name);
                } else {
                    self.emit1("setp", half);
                    self.emit2("movl", "$1", aux_name);
                }
                fcompare(self, &a, &b);
                self.emit2("cmovne", aux_name, flag_name);
            }
        }
        self.emit2("movzbl", half, flag_name);
        self.emit2("movl", flag_name, d);
        self.regs.release(flag, false);
        if let Some(aux) = aux {
            self.regs.release(aux, false);
        }
        Ok(())
    }

    pub(crate) fn lower_unary(
        &mut self,
        op: UnOp,
        ty: ValType,
        dst: &Operand,
        src: &Operand,
    ) -> Result<(), CodeGenError> {
        match op {
            UnOp::Neg if ty == ValType::Float => {
                let d = self.float_loc(dst)?;
                let s = self.float_loc(src)?;
                let (d, s) = (self.loc_text(&d), self.loc_text(&s));
                self.emit1("flds", s);
                self.emit0("fchs");
                self.emit1("fstps", d);
                Ok(())
            }
            UnOp::Neg | UnOp::BitNot => {
                let mnemonic = if op == UnOp::Neg { "negl" } else { "notl" };
                let byte = ty == ValType::Char;
                let want = if byte { Some(Reg::Eax) } else { None };
                let r = self.load(src, want, byte)?;
                self.emit1(mnemonic, self.name(r));
                let d = self.resolve(dst, None)?;
                let d_txt = self.loc_text(&d);
                if byte {
                    let half = self.byte_name(r)?;
                    self.emit2("movb", half, d_txt);
                } else {
                    self.emit2("movl", self.name(r), d_txt);
                }
                self.regs.release(r, false);
                self.release_loc(&d);
                Ok(())
            }
            UnOp::LogNot => {
                let byte = ty == ValType::Char;
                let want = if byte { Some(Reg::Eax) } else { None };
                let r = self.load(src, want, byte)?;
                self.emit2("cmpl", "$0", self.name(r));
                let flag = self.reg_specific(Reg::Edx)?;
                let half = self.byte_name(flag)?;
                self.emit1("sete", half);
                self.emit2("movzbl", half, self.name(r));
                let d = self.resolve(dst, None)?;
                let d_txt = self.loc_text(&d);
                if byte {
                    let src_half = self.byte_name(r)?;
                    self.emit2("movb", src_half, d_txt);
                } else {
                    self.emit2("movl", self.name(r), d_txt);
                }
                self.regs.release(r, false);
                self.regs.release(flag, false);
                self.release_loc(&d);
                Ok(())
            }
        }
    }
}

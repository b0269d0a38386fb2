//! Assignment, casts, jumps, address-of and float literal loads.

use super::{CodeGenError, CodeGenerator, Reg};
use crate::tac::Operand;
use crate::types::{CastTy, ValType};

impl CodeGenerator {
    pub(crate) fn lower_assign(
        &mut self,
        ty: ValType,
        dst: &Operand,
        src: &Operand,
    ) -> Result<(), CodeGenError> {
        match ty {
            ValType::Char => {
                if let Operand::Imm(v) = src {
                    let d = self.resolve(dst, None)?;
                    let d_txt = self.loc_text(&d);
                    self.emit2("movb", format!("${}", v), d_txt);
                    self.release_loc(&d);
                    return Ok(());
                }
                let s = self.resolve(src, Some(Reg::Edx))?;
                let eax = self.reg_specific(Reg::Eax)?;
                let s_txt = self.loc_text(&s);
                self.emit2("movzbl", s_txt, "%eax");
                let d = self.resolve(dst, Some(Reg::Ecx))?;
                let d_txt = self.loc_text(&d);
                self.emit2("movb", "%al", d_txt);
                self.regs.release(eax, false);
                self.release_loc(&s);
                self.release_loc(&d);
                Ok(())
            }
            ValType::Float => {
                let d = self.float_loc(dst)?;
                let s = self.float_loc(src)?;
                let (d, s) = (self.loc_text(&d), self.loc_text(&s));
                self.emit1("flds", s);
                self.emit1("fstps", d);
                Ok(())
            }
            ValType::Int => {
                let r = self.load(src, None, false)?;
                let d = self.resolve(dst, None)?;
                let d_txt = self.loc_text(&d);
                self.emit2("movl", self.name(r), d_txt);
                self.regs.release(r, false);
                self.release_loc(&d);
                Ok(())
            }
        }
    }

    /// The conversion lattice: x87 for anything touching float, `%eax` as
    /// the widening/narrowing bridge for char.
    pub(crate) fn lower_cast(
        &mut self,
        dst: &Operand,
        src: &Operand,
        to: CastTy,
        from: CastTy,
    ) -> Result<(), CodeGenError> {
        let d = self.resolve(dst, Some(Reg::Ecx))?;
        let s = self.resolve(src, Some(Reg::Edx))?;
        let d_txt = self.loc_text(&d);
        let s_txt = self.loc_text(&s);
        let int_like = |t: CastTy| matches!(t, CastTy::Int | CastTy::UnsignedInt);

        match (to, from) {
            (CastTy::Float, f) if int_like(f) => {
                self.emit1("fildl", s_txt);
                self.emit1("fstps", d_txt);
            }
            (t, CastTy::Float) if int_like(t) => {
                self.emit1("flds", s_txt);
                self.emit1("fisttpl", d_txt);
            }
            (CastTy::Char, CastTy::Int) | (CastTy::Char, CastTy::UnsignedInt) => {
                let eax = self.reg_specific(Reg::Eax)?;
                self.emit2("movl", s_txt, "%eax");
                self.emit2("movb", "%al", d_txt);
                self.regs.release(eax, false);
            }
            (CastTy::Int, CastTy::Char) | (CastTy::UnsignedInt, CastTy::Char) => {
                let eax = self.reg_specific(Reg::Eax)?;
                self.emit2("movzbl", s_txt, "%eax");
                self.emit2("movl", "%eax", d_txt);
                self.regs.release(eax, false);
            }
            (CastTy::Char, CastTy::Float) => {
                // truncate through a scratch stack slot
                let eax = self.reg_specific(Reg::Eax)?;
                self.emit1("flds", s_txt);
                self.emit2("subl", "$4", "%esp");
                self.emit1("fisttpl", "0(%esp)");
                self.emit2("movl", "0(%esp)", "%eax");
                self.emit2("movb", "%al", d_txt);
                self.emit2("addl", "$4", "%esp");
                self.regs.release(eax, true);
            }
            (CastTy::Float, CastTy::Char) => {
                let eax = self.reg_specific(Reg::Eax)?;
                self.emit2("movsbl", s_txt, "%eax");
                self.emit1("push", "%eax");
                self.emit1("filds", "0(%esp)");
                self.emit1("fstps", d_txt);
                self.emit1("pop", "%eax");
                self.regs.release(eax, false);
            }
            _ => {
                // same-representation moves (signedness changes and friends)
                let r = self.reg_any()?;
                self.emit2("movl", s_txt, self.name(r));
                self.emit2("movl", self.name(r), d_txt);
                self.regs.release(r, false);
            }
        }
        self.release_loc(&d);
        self.release_loc(&s);
        Ok(())
    }

    pub(crate) fn lower_goto(&mut self, target: Option<usize>) -> Result<(), CodeGenError> {
        let t = target.ok_or_else(|| {
            CodeGenError::Logic("unpatched goto survived finishing".to_string())
        })?;
        let label = self.jump_label(t + 1);
        self.emit1("jmp", label);
        Ok(())
    }

    pub(crate) fn lower_ifnz(
        &mut self,
        target: Option<usize>,
        cond: &Operand,
    ) -> Result<(), CodeGenError> {
        let t = target.ok_or_else(|| {
            CodeGenError::Logic("unpatched conditional jump survived finishing".to_string())
        })?;
        let r = self.load(cond, None, false)?;
        self.emit2("cmp", "$0", self.name(r));
        let label = self.jump_label(t + 1);
        self.emit1("jne", label);
        self.regs.release(r, false);
        Ok(())
    }

    /// `UNARY& dst src` - also the frame adjustment at scope entry when the
    /// destination is `%esp`.
    pub(crate) fn lower_addr_of(
        &mut self,
        dst: &Operand,
        src: &Operand,
    ) -> Result<(), CodeGenError> {
        let r = self.reg_any()?;
        let s = self.resolve(src, None)?;
        let s_txt = self.loc_text(&s);
        self.emit2("leal", s_txt, self.name(r));
        let d = self.resolve(dst, None)?;
        let d_txt = self.loc_text(&d);
        self.emit2("movl", self.name(r), d_txt);
        self.regs.release(r, false);
        self.release_loc(&s);
        self.release_loc(&d);
        Ok(())
    }

    pub(crate) fn lower_load_float(
        &mut self,
        label: &str,
        dst: &Operand,
    ) -> Result<(), CodeGenError> {
        let d = self.float_loc(dst)?;
        let d_txt = self.loc_text(&d);
        self.emit1("flds", label);
        self.emit1("fstps", d_txt);
        Ok(())
    }

    pub(crate) fn lower_func_label(&mut self, name: &str) {
        self.text(format!("{}:", name));
        self.emit1("push", "%ebp");
        self.emit2("movl", "%esp", "%ebp");
    }
}

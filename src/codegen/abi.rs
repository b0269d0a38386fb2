//! Calling-convention sequences: argument pushes, calls, returns and the
//! struct-return copy through the hidden pointer.

use super::{CodeGenError, CodeGenerator, Reg};
use crate::builtins::is_math_func;
use crate::tac::{CallKind, Operand};
use crate::types::ValType;

impl CodeGenerator {
    /// `param x` pushes one word; `param x $n` pushes a struct of `n` bytes
    /// word by word, highest offset first.
    pub(crate) fn lower_param(
        &mut self,
        src: &Operand,
        size: Option<u32>,
    ) -> Result<(), CodeGenError> {
        match size {
            None => self.push_word(src),
            Some(n) => self.push_struct(src, n),
        }
    }

    fn push_word(&mut self, src: &Operand) -> Result<(), CodeGenError> {
        match src {
            Operand::FrameAddr(off) => {
                let r = self.reg_any()?;
                self.emit2("leal", format!("{}(%ebp)", off), self.name(r));
                self.emit1("push", self.name(r));
                self.regs.release(r, false);
            }
            Operand::Deref(_) => {
                let loc = self.resolve(src, None)?;
                let txt = self.loc_text(&loc);
                self.emit1("push", txt);
                self.release_loc(&loc);
            }
            _ => {
                let loc = self.resolve(src, None)?;
                let txt = self.loc_text(&loc);
                let r = self.reg_any()?;
                self.emit2("movl", txt, self.name(r));
                self.emit1("push", self.name(r));
                self.regs.release(r, false);
                self.release_loc(&loc);
            }
        }
        Ok(())
    }

    fn push_struct(&mut self, src: &Operand, size: u32) -> Result<(), CodeGenError> {
        let words = size.div_ceil(4);
        match src {
            Operand::Stack(off) => {
                // highest word first so the struct sits in order in memory
                for i in (0..words).rev() {
                    let at = off + (i * 4) as i32;
                    if at == 0 {
                        self.emit1("push", "(%ebp)");
                    } else {
                        self.emit1("push", format!("{}(%ebp)", at));
                    }
                }
            }
            Operand::Deref(inner) => {
                if size <= 4 {
                    let loc = self.resolve(src, None)?;
                    let txt = self.loc_text(&loc);
                    self.emit1("push", txt);
                    self.release_loc(&loc);
                    return Ok(());
                }
                let addr = self.resolve(&**inner, None)?;
                let r = self.reg_any()?;
                let txt = self.loc_text(&addr);
                self.emit2("movl", txt, self.name(r));
                self.release_loc(&addr);
                self.emit2("addl", format!("${}", (words - 1) * 4), self.name(r));
                for _ in 0..words {
                    self.emit1("push", format!("({})", self.name(r)));
                    self.emit2("subl", "$4", self.name(r));
                }
                self.regs.release(r, false);
            }
            other => {
                return Err(CodeGenError::Logic(format!(
                    "struct push of unsupported operand {}",
                    other
                )))
            }
        }
        Ok(())
    }

    pub(crate) fn lower_push_char(&mut self, src: &Operand) -> Result<(), CodeGenError> {
        let eax = self.reg_specific(Reg::Eax)?;
        let loc = self.resolve(src, Some(Reg::Edx))?;
        let txt = self.loc_text(&loc);
        self.emit2("movzbl", txt, "%eax");
        self.emit2("subl", "$1", "%esp");
        self.emit2("movb", "%al", "0(%esp)");
        self.regs.release(eax, false);
        self.release_loc(&loc);
        Ok(())
    }

    /// Varargs promotion: char arguments widen to a full word.
    pub(crate) fn lower_printf_push_char(&mut self, src: &Operand) -> Result<(), CodeGenError> {
        let eax = self.reg_specific(Reg::Eax)?;
        let loc = self.resolve(src, Some(Reg::Edx))?;
        let txt = self.loc_text(&loc);
        self.emit2("movzbl", txt, "%eax");
        self.emit2("movsbl", "%al", "%eax");
        self.emit1("push", "%eax");
        self.regs.release(eax, false);
        self.release_loc(&loc);
        Ok(())
    }

    /// Varargs promotion: floats go out as 8-byte doubles via the x87 stack.
    pub(crate) fn lower_printf_push_float(&mut self, src: &Operand) -> Result<(), CodeGenError> {
        let loc = self.float_loc(src)?;
        let txt = self.loc_text(&loc);
        self.emit1("flds", txt);
        self.emit2("subl", "$4", "%esp");
        self.emit2("leal", "-8(%esp)", "%esp");
        self.emit1("fstpl", "(%esp)");
        Ok(())
    }

    pub(crate) fn lower_math_push(
        &mut self,
        ty: ValType,
        src: &Operand,
    ) -> Result<(), CodeGenError> {
        let loc = self.float_loc(src)?;
        let txt = self.loc_text(&loc);
        let load = if ty == ValType::Float { "flds" } else { "fildl" };
        self.emit1(load, txt);
        self.emit2("subl", "$4", "%esp");
        self.emit2("leal", "-8(%esp)", "%esp");
        self.emit1("fstpl", "(%esp)");
        Ok(())
    }

    /// `pow`/`fmod` push two doubles back to back without the alignment
    /// word.
    pub(crate) fn lower_pow_push(
        &mut self,
        ty: ValType,
        src: &Operand,
    ) -> Result<(), CodeGenError> {
        let loc = self.float_loc(src)?;
        let txt = self.loc_text(&loc);
        let load = if ty == ValType::Float { "flds" } else { "fildl" };
        self.emit1(load, txt);
        self.emit2("leal", "-8(%esp)", "%esp");
        self.emit1("fstpl", "(%esp)");
        Ok(())
    }

    pub(crate) fn lower_call(
        &mut self,
        kind: CallKind,
        dst: Option<&Operand>,
        func: &str,
    ) -> Result<(), CodeGenError> {
        if kind == CallKind::Struct {
            let dst = dst.ok_or_else(|| {
                CodeGenError::Logic("struct call without a return slot".to_string())
            })?;
            let r = self.reg_any()?;
            let d = self.resolve(dst, None)?;
            let d_txt = self.loc_text(&d);
            self.emit2("leal", d_txt, self.name(r));
            self.emit1("push", self.name(r));
            self.regs.release(r, false);
            self.release_loc(&d);
            self.emit1("call", func);
            return Ok(());
        }

        self.emit1("call", func);
        let Some(dst) = dst else {
            return Ok(());
        };
        if is_math_func(func) {
            let d = self.float_loc(dst)?;
            let d_txt = self.loc_text(&d);
            self.emit1("fstps", d_txt);
            self.emit2("addl", "$16", "%esp");
            return Ok(());
        }
        let d = self.resolve(dst, None)?;
        let d_txt = self.loc_text(&d);
        if kind == CallKind::Char {
            self.emit2("movb", "%al", d_txt);
        } else {
            self.emit2("movl", "%eax", d_txt);
        }
        self.release_loc(&d);
        Ok(())
    }

    fn epilogue(&mut self) {
        self.emit2("movl", "%ebp", "%esp");
        self.emit1("popl", "%ebp");
        self.emit0("ret");
        self.text(String::new());
    }

    pub(crate) fn lower_ret(&mut self, val: Option<&Operand>) -> Result<(), CodeGenError> {
        if let Some(v) = val {
            let eax = self.reg_specific(Reg::Eax)?;
            let loc = self.resolve(v, None)?;
            let txt = self.loc_text(&loc);
            self.emit2("movl", txt, "%eax");
            self.regs.release(eax, true);
            self.release_loc(&loc);
        }
        self.epilogue();
        Ok(())
    }

    /// Copy the return value out through the caller's pointer at `8(%ebp)`:
    /// whole words first, then the byte tail for odd sizes.
    pub(crate) fn lower_ret_struct(
        &mut self,
        ptr: &Operand,
        size: u32,
    ) -> Result<(), CodeGenError> {
        let out = self.reg_any()?;
        self.emit2("movl", "8(%ebp)", self.name(out));
        let words = size / 4;
        let tail = size % 4;

        // resolve the source base: either an address register or a frame
        // offset
        enum Base {
            Reg(super::Slot),
            Frame(i32),
        }
        let base = match ptr {
            Operand::Deref(inner) => {
                let addr = self.resolve(&**inner, None)?;
                let r = self.reg_any()?;
                let txt = self.loc_text(&addr);
                self.emit2("movl", txt, self.name(r));
                self.release_loc(&addr);
                Base::Reg(r)
            }
            Operand::Stack(off) => Base::Frame(*off),
            other => {
                return Err(CodeGenError::Logic(format!(
                    "struct return of unsupported operand {}",
                    other
                )))
            }
        };
        let src_at = |g: &Self, at: u32| -> String {
            match &base {
                Base::Reg(r) => {
                    if at == 0 {
                        format!("({})", g.name(*r))
                    } else {
                        format!("{}({})", at, g.name(*r))
                    }
                }
                Base::Frame(off) => {
                    let o = off + at as i32;
                    if o == 0 {
                        "(%ebp)".to_string()
                    } else {
                        format!("{}(%ebp)", o)
                    }
                }
            }
        };

        for i in 0..words {
            let src = src_at(self, i * 4);
            let dst = if i == 0 {
                format!("({})", self.name(out))
            } else {
                format!("{}({})", i * 4, self.name(out))
            };
            let scratch = self.reg_any()?;
            self.emit2("movl", src, self.name(scratch));
            self.emit2("movl", self.name(scratch), dst);
            self.regs.release(scratch, false);
        }
        for b in 0..tail {
            let at = words * 4 + b;
            let src = src_at(self, at);
            let dst = if at == 0 {
                format!("({})", self.name(out))
            } else {
                format!("{}({})", at, self.name(out))
            };
            let scratch = self.reg_specific(Reg::Ebx)?;
            let half = self.byte_name(scratch)?;
            self.emit2("movzbl", src, self.name(scratch));
            self.emit2("movb", half, dst);
            self.regs.release(scratch, true);
        }

        if let Base::Reg(r) = base {
            self.regs.release(r, false);
        }
        self.regs.release(out, false);
        self.epilogue();
        Ok(())
    }
}

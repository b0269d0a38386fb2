//! Expression parsing and translation.
//!
//! One function per precedence level, mirroring the grammar. Every function
//! returns the synthesized `ExprAttr`; emission happens inline, markers are
//! captures of `tac.next_index()`.

use super::{ExprAttr, PResult, Parser};
use crate::builtins::{is_math_func, is_varargs, BINARY_MATH_FUNCS, UNARY_MATH_FUNCS};
use crate::symtab::SymKind;
use crate::tac::{BinOp, CallKind, CmpOp, Instr, Operand, UnOp};
use crate::types::{promote, promote_unary, TypeSeq, ValType};

const ASSIGN_OPS: [&str; 11] = [
    "=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>=",
];

impl<'a> Parser<'a> {
    /// `expression : assignment_expression (',' assignment_expression)*`
    pub(crate) fn expression(&mut self) -> PResult<ExprAttr> {
        let mut e = self.assignment_expr()?;
        while self.consume(",") {
            e = self.assignment_expr()?;
        }
        Ok(e)
    }

    pub(crate) fn assignment_expr(&mut self) -> PResult<ExprAttr> {
        let lhs = self.conditional_expr()?;
        let op = self.peek_text().to_string();
        if !ASSIGN_OPS.contains(&op.as_str()) {
            return Ok(lhs);
        }
        let (line, col) = self.here();
        self.bump();
        let rhs = self.assignment_expr()?;
        Ok(self.translate_assign(lhs, &op, rhs, line, col))
    }

    /// `C ? T : F` with three captured positions and a join goto.
    pub(crate) fn conditional_expr(&mut self) -> PResult<ExprAttr> {
        let mut cond = self.logical_or_expr()?;
        if !self.check("?") {
            return Ok(cond);
        }
        let (line, _) = self.here();
        self.bump();
        let (tl, fl) = self.bool_lists(&mut cond);

        let t_start = self.comp.tac.next_index();
        let mut t_arm = self.expression()?;
        let t_val = self.rvalue(&mut t_arm);
        self.expect(":")?;

        if !cond.ok() || !t_arm.ok() {
            // keep parsing the third arm for recovery
            let _ = self.conditional_expr()?;
            return Ok(ExprAttr::poisoned());
        }

        let t_ty = t_arm.ty.clone().unwrap();
        // result slot is shared by both arms
        let result_ty = t_ty.clone();
        let result = self.new_temp(&result_ty, line);
        if let Some(v) = t_val {
            self.comp.tac.emit(Instr::Assign {
                ty: result_ty.carrier(),
                dst: result.clone(),
                src: v,
            });
        }
        let skip = self.comp.tac.emit(Instr::Goto { target: None });

        let f_start = self.comp.tac.next_index();
        let mut f_arm = self.conditional_expr()?;
        let f_val = self.rvalue(&mut f_arm);
        if !f_arm.ok() {
            return Ok(ExprAttr::poisoned());
        }
        let f_ty = f_arm.ty.clone().unwrap();
        let src = match f_val {
            Some(v) => self.cast_to(v, &f_ty, &result_ty, line),
            None => return Ok(ExprAttr::poisoned()),
        };
        self.comp.tac.emit(Instr::Assign {
            ty: result_ty.carrier(),
            dst: result.clone(),
            src,
        });

        let join = self.comp.tac.next_index();
        self.comp.tac.backpatch(&tl, t_start);
        self.comp.tac.backpatch(&fl, f_start);
        self.comp.tac.backpatch(&[skip], join);
        Ok(ExprAttr::value(result_ty, result))
    }

    /// `E1 || E2`: false list falls into E2, true lists union.
    fn logical_or_expr(&mut self) -> PResult<ExprAttr> {
        let mut lhs = self.logical_and_expr()?;
        while self.check("||") {
            self.bump();
            let (tl, fl) = self.bool_lists(&mut lhs);
            let marker = self.comp.tac.next_index();
            let mut rhs = self.logical_and_expr()?;
            let (rtl, rfl) = self.bool_lists(&mut rhs);
            self.comp.tac.backpatch(&fl, marker);
            let mut true_list = tl;
            true_list.extend(rtl);
            lhs = ExprAttr::control(TypeSeq::base("int"), true_list, rfl);
        }
        Ok(lhs)
    }

    /// `E1 && E2`: true list falls into E2, false lists union.
    fn logical_and_expr(&mut self) -> PResult<ExprAttr> {
        let mut lhs = self.inclusive_or_expr()?;
        while self.check("&&") {
            self.bump();
            let (tl, fl) = self.bool_lists(&mut lhs);
            let marker = self.comp.tac.next_index();
            let mut rhs = self.inclusive_or_expr()?;
            let (rtl, rfl) = self.bool_lists(&mut rhs);
            self.comp.tac.backpatch(&tl, marker);
            let mut false_list = fl;
            false_list.extend(rfl);
            lhs = ExprAttr::control(TypeSeq::base("int"), rtl, false_list);
        }
        Ok(lhs)
    }

    fn inclusive_or_expr(&mut self) -> PResult<ExprAttr> {
        let mut lhs = self.exclusive_or_expr()?;
        while self.check("|") {
            let (line, col) = self.here();
            self.bump();
            let rhs = self.exclusive_or_expr()?;
            lhs = self.translate_binary("|", lhs, rhs, line, col);
        }
        Ok(lhs)
    }

    fn exclusive_or_expr(&mut self) -> PResult<ExprAttr> {
        let mut lhs = self.and_expr()?;
        while self.check("^") {
            let (line, col) = self.here();
            self.bump();
            let rhs = self.and_expr()?;
            lhs = self.translate_binary("^", lhs, rhs, line, col);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> PResult<ExprAttr> {
        let mut lhs = self.equality_expr()?;
        while self.check("&") {
            let (line, col) = self.here();
            self.bump();
            let rhs = self.equality_expr()?;
            lhs = self.translate_binary("&", lhs, rhs, line, col);
        }
        Ok(lhs)
    }

    fn equality_expr(&mut self) -> PResult<ExprAttr> {
        let mut lhs = self.relational_expr()?;
        while self.check("==") || self.check("!=") {
            let (line, col) = self.here();
            let op = self.bump().text;
            let rhs = self.relational_expr()?;
            lhs = self.translate_compare(&op, lhs, rhs, line, col);
        }
        Ok(lhs)
    }

    fn relational_expr(&mut self) -> PResult<ExprAttr> {
        let mut lhs = self.shift_expr()?;
        while ["<", ">", "<=", ">="].contains(&self.peek_text()) {
            let (line, col) = self.here();
            let op = self.bump().text;
            let rhs = self.shift_expr()?;
            lhs = self.translate_compare(&op, lhs, rhs, line, col);
        }
        Ok(lhs)
    }

    fn shift_expr(&mut self) -> PResult<ExprAttr> {
        let mut lhs = self.additive_expr()?;
        while self.check("<<") || self.check(">>") {
            let (line, col) = self.here();
            let op = self.bump().text;
            let rhs = self.additive_expr()?;
            lhs = self.translate_binary(&op, lhs, rhs, line, col);
        }
        Ok(lhs)
    }

    fn additive_expr(&mut self) -> PResult<ExprAttr> {
        let mut lhs = self.multiplicative_expr()?;
        while self.check("+") || self.check("-") {
            let (line, col) = self.here();
            let op = self.bump().text;
            let rhs = self.multiplicative_expr()?;
            lhs = self.translate_binary(&op, lhs, rhs, line, col);
        }
        Ok(lhs)
    }

    fn multiplicative_expr(&mut self) -> PResult<ExprAttr> {
        let mut lhs = self.cast_expr()?;
        while ["*", "/", "%"].contains(&self.peek_text()) {
            let (line, col) = self.here();
            let op = self.bump().text;
            let rhs = self.cast_expr()?;
            lhs = self.translate_binary(&op, lhs, rhs, line, col);
        }
        Ok(lhs)
    }

    /// `( type-name ) cast_expression | unary_expression`
    pub(crate) fn cast_expr(&mut self) -> PResult<ExprAttr> {
        if self.check("(") && self.is_type_token(self.peek_ahead(1)) {
            let (line, col) = self.here();
            self.bump();
            let target = self.parse_type_name()?;
            self.expect(")")?;
            let mut operand = self.cast_expr()?;
            let val = self.rvalue(&mut operand);
            let (Some(from), Some(v)) = (operand.ty.clone(), val) else {
                return Ok(ExprAttr::poisoned());
            };
            if !from.is_scalar() || (!target.is_scalar() && !target.is_void()) {
                self.comp
                    .diags
                    .error(line, col, format!("Cannot cast {} to {}", from, target));
                return Ok(ExprAttr::poisoned());
            }
            let out = self.cast_to(v, &from, &target, line);
            return Ok(ExprAttr::value(target, out));
        }
        self.unary_expr()
    }

    fn unary_expr(&mut self) -> PResult<ExprAttr> {
        let (line, col) = self.here();
        match self.peek_text() {
            "++" | "--" => {
                let op = self.bump().text;
                let target = self.unary_expr()?;
                Ok(self.translate_incdec(target, &op, true, line, col))
            }
            "sizeof" => {
                self.bump();
                let size = if self.check("(") && self.is_type_token(self.peek_ahead(1)) {
                    self.bump();
                    let ty = self.parse_type_name()?;
                    self.expect(")")?;
                    self.size_of(&ty, line, col)
                } else {
                    let mut e = self.unary_expr()?;
                    let _ = self.rvalue(&mut e);
                    match e.ty {
                        Some(ty) => self.size_of(&ty, line, col),
                        None => None,
                    }
                };
                match size {
                    Some(n) => {
                        let ty = TypeSeq::base("int");
                        let t = self.new_temp(&ty, line);
                        self.comp.tac.emit(Instr::Assign {
                            ty: ValType::Int,
                            dst: t.clone(),
                            src: Operand::imm(n),
                        });
                        Ok(ExprAttr::value(ty, t))
                    }
                    None => Ok(ExprAttr::poisoned()),
                }
            }
            "+" => {
                self.bump();
                let mut e = self.cast_expr()?;
                let val = self.rvalue(&mut e);
                let (Some(ty), Some(v)) = (e.ty.clone(), val) else {
                    return Ok(ExprAttr::poisoned());
                };
                if !ty.is_arith() {
                    self.comp
                        .diags
                        .error(line, col, format!("Unary + needs an arithmetic operand, got {}", ty));
                    return Ok(ExprAttr::poisoned());
                }
                let result_ty = promote_unary(&ty);
                let v = self.cast_to(v, &ty, &result_ty, line);
                Ok(ExprAttr::value(result_ty, v))
            }
            "-" => {
                self.bump();
                let mut e = self.cast_expr()?;
                let val = self.rvalue(&mut e);
                let (Some(ty), Some(v)) = (e.ty.clone(), val) else {
                    return Ok(ExprAttr::poisoned());
                };
                if !ty.is_arith() {
                    self.comp
                        .diags
                        .error(line, col, format!("Unary - needs an arithmetic operand, got {}", ty));
                    return Ok(ExprAttr::poisoned());
                }
                let result_ty = promote_unary(&ty);
                let v = self.cast_to(v, &ty, &result_ty, line);
                let dst = self.new_temp(&result_ty, line);
                self.comp.tac.emit(Instr::Unary {
                    op: UnOp::Neg,
                    ty: result_ty.carrier(),
                    dst: dst.clone(),
                    src: v,
                });
                Ok(ExprAttr::value(result_ty, dst))
            }
            "~" => {
                self.bump();
                let mut e = self.cast_expr()?;
                let val = self.rvalue(&mut e);
                let (Some(ty), Some(v)) = (e.ty.clone(), val) else {
                    return Ok(ExprAttr::poisoned());
                };
                if !ty.is_integral() {
                    self.comp
                        .diags
                        .error(line, col, format!("Operand of ~ must be integral, got {}", ty));
                    return Ok(ExprAttr::poisoned());
                }
                let result_ty = promote_unary(&ty);
                let v = self.cast_to(v, &ty, &result_ty, line);
                let dst = self.new_temp(&result_ty, line);
                self.comp.tac.emit(Instr::Unary {
                    op: UnOp::BitNot,
                    ty: result_ty.carrier(),
                    dst: dst.clone(),
                    src: v,
                });
                Ok(ExprAttr::value(result_ty, dst))
            }
            "!" => {
                self.bump();
                let mut e = self.cast_expr()?;
                let Some(ty) = e.ty.clone() else {
                    return Ok(ExprAttr::poisoned());
                };
                if !ty.is_scalar() {
                    self.comp
                        .diags
                        .error(line, col, format!("Operand of ! must be scalar, got {}", ty));
                    return Ok(ExprAttr::poisoned());
                }
                let src = self.rvalue(&mut e);
                let (tl, fl) = self.bool_lists(&mut e);
                let result_ty = TypeSeq::base("int");
                let mut out = match src {
                    Some(v) => {
                        let dst = self.new_temp(&result_ty, line);
                        self.comp.tac.emit(Instr::Unary {
                            op: UnOp::LogNot,
                            ty: ty.carrier(),
                            dst: dst.clone(),
                            src: v,
                        });
                        ExprAttr::value(result_ty, dst)
                    }
                    None => ExprAttr::control(result_ty, Vec::new(), Vec::new()),
                };
                // the defining property: lists swap
                out.true_list = fl;
                out.false_list = tl;
                Ok(out)
            }
            "*" => {
                self.bump();
                let mut e = self.cast_expr()?;
                let val = self.rvalue(&mut e);
                let (Some(ty), Some(v)) = (e.ty.clone(), val) else {
                    return Ok(ExprAttr::poisoned());
                };
                let Some(pointee) = ty.deref() else {
                    self.comp
                        .diags
                        .error(line, col, format!("Cannot dereference non-pointer type {}", ty));
                    return Ok(ExprAttr::poisoned());
                };
                let mut out = ExprAttr::value(pointee, Operand::deref(v));
                out.is_var = true;
                Ok(out)
            }
            "&" => {
                self.bump();
                let e = self.cast_expr()?;
                let Some(ty) = e.ty.clone() else {
                    return Ok(ExprAttr::poisoned());
                };
                if !e.is_var && !ty.is_struct() && !ty.is_array() {
                    self.comp
                        .diags
                        .error(line, col, "Cannot take the address of a non-l-value");
                    return Ok(ExprAttr::poisoned());
                }
                let Some(src) = e.temp.clone() else {
                    return Ok(ExprAttr::poisoned());
                };
                let result_ty = ty.addr_of();
                let dst = self.new_temp(&result_ty, line);
                self.comp.tac.emit(Instr::AddrOf {
                    dst: dst.clone(),
                    src,
                });
                Ok(ExprAttr::value(result_ty, dst))
            }
            _ => self.postfix_expr(),
        }
    }

    fn postfix_expr(&mut self) -> PResult<ExprAttr> {
        let mut base = self.primary_expr()?;
        loop {
            let (line, col) = self.here();
            if self.check("[") {
                base = self.translate_subscript(base, line, col)?;
            } else if self.check("(") {
                base = self.translate_call(base, line, col)?;
            } else if self.check(".") {
                self.bump();
                let field = self.expect_ident()?;
                base = self.translate_member(base, &field, false, line, col);
            } else if self.check("->") {
                self.bump();
                let field = self.expect_ident()?;
                base = self.translate_member(base, &field, true, line, col);
            } else if self.check("++") || self.check("--") {
                let op = self.bump().text;
                base = self.translate_incdec(base, &op, false, line, col);
            } else {
                break;
            }
        }
        Ok(base)
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.current() {
            Some(t) if t.kind == crate::lexer::TokKind::Ident => Ok(self.bump().text),
            _ => Err(self.syntax_error("expected an identifier")),
        }
    }

    fn primary_expr(&mut self) -> PResult<ExprAttr> {
        let (line, col) = self.here();
        let Some(tok) = self.current().cloned() else {
            return Err(self.syntax_error("expected an expression"));
        };
        use crate::lexer::TokKind;
        match tok.kind {
            TokKind::IntConst => {
                self.bump();
                let ty = TypeSeq::base("int");
                let t = self.new_temp(&ty, line);
                self.comp.tac.emit(Instr::Assign {
                    ty: ValType::Int,
                    dst: t.clone(),
                    src: Operand::imm(tok.int_val),
                });
                Ok(ExprAttr::value(ty, t))
            }
            TokKind::CharConst => {
                self.bump();
                let ty = TypeSeq::base("char");
                let t = self.new_temp(&ty, line);
                self.comp.tac.emit(Instr::Assign {
                    ty: ValType::Char,
                    dst: t.clone(),
                    src: Operand::imm(tok.char_val),
                });
                Ok(ExprAttr::value(ty, t))
            }
            TokKind::FloatConst => {
                self.bump();
                let ty = TypeSeq::base("float");
                let label = self.comp.tac.intern_float(tok.float_val);
                let t = self.new_temp(&ty, line);
                self.comp.tac.emit(Instr::LoadFloat {
                    label,
                    dst: t.clone(),
                });
                Ok(ExprAttr::value(ty, t))
            }
            TokKind::StrConst => {
                self.bump();
                let label = self.comp.tac.intern_string(&tok.text);
                Ok(ExprAttr::value(TypeSeq::base("str"), Operand::Imm(label)))
            }
            TokKind::Keyword if tok.text == "true" || tok.text == "false" => {
                self.bump();
                let ty = TypeSeq::base("int");
                let t = self.new_temp(&ty, line);
                self.comp.tac.emit(Instr::Assign {
                    ty: ValType::Int,
                    dst: t.clone(),
                    src: Operand::imm(if tok.text == "true" { 1 } else { 0 }),
                });
                Ok(ExprAttr::value(ty, t))
            }
            TokKind::Ident => {
                self.bump();
                Ok(self.translate_identifier(&tok.text, line, col))
            }
            TokKind::Op if tok.text == "(" => {
                self.bump();
                let e = self.expression()?;
                self.expect(")")?;
                Ok(e)
            }
            _ => Err(self.syntax_error("expected an expression")),
        }
    }

    fn translate_identifier(&mut self, name: &str, line: usize, col: usize) -> ExprAttr {
        if self.declaring.as_deref() == Some(name) {
            self.comp.diags.error(
                line,
                col,
                format!("Variable {} used in its own initializer", name),
            );
            return ExprAttr::poisoned();
        }
        let Some(entry) = self.comp.symtab.lookup(name).cloned() else {
            self.comp
                .diags
                .error(line, col, format!("The variable {} is not declared", name));
            return ExprAttr::poisoned();
        };
        if entry.kind == SymKind::Function {
            let mut attr = ExprAttr {
                ty: Some(TypeSeq::base("function")),
                func: Some(name.to_string()),
                ..ExprAttr::default()
            };
            attr.line = line;
            attr.col = col;
            return attr;
        }
        let mut ty = entry.ty.clone();
        ty.normalize();
        let mut attr = ExprAttr {
            ty: Some(ty.clone()),
            temp: entry.operand.clone(),
            is_var: true,
            line,
            col,
            ..ExprAttr::default()
        };
        // uniform boolean-context preparation for every referenced scalar
        if ty.is_scalar() {
            if let Some(v) = attr.temp.clone() {
                let (t, f) = self.emit_bool_pair(v);
                attr.true_list = vec![t];
                attr.false_list = vec![f];
            }
        }
        attr
    }

    // ---- operators ----------------------------------------------------

    fn translate_binary(
        &mut self,
        op_text: &str,
        mut lhs: ExprAttr,
        mut rhs: ExprAttr,
        line: usize,
        col: usize,
    ) -> ExprAttr {
        let lv = self.rvalue(&mut lhs);
        let rv = self.rvalue(&mut rhs);
        let (Some(lt), Some(rt), Some(lv), Some(rv)) =
            (lhs.ty.clone(), rhs.ty.clone(), lv, rv)
        else {
            return ExprAttr::poisoned();
        };
        let op = match op_text {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Mod,
            "&" => BinOp::And,
            "|" => BinOp::Or,
            "^" => BinOp::Xor,
            "<<" => BinOp::Shl,
            ">>" => BinOp::Shr,
            _ => unreachable!("binary operator {}", op_text),
        };

        // pointer arithmetic: only ptr +/- int and int + ptr
        let l_ptr = lt.is_pointer() || lt.is_array();
        let r_ptr = rt.is_pointer() || rt.is_array();
        if l_ptr || r_ptr {
            if l_ptr && r_ptr {
                self.comp.diags.error(
                    line,
                    col,
                    format!("Invalid operands to {}: both are pointers", op_text),
                );
                return ExprAttr::poisoned();
            }
            if op != BinOp::Add && !(op == BinOp::Sub && l_ptr) {
                self.comp.diags.error(
                    line,
                    col,
                    format!("Invalid pointer arithmetic with {}", op_text),
                );
                return ExprAttr::poisoned();
            }
            let (ptr_ty, ptr_v, int_ty, int_v) = if l_ptr {
                (lt, lv, rt, rv)
            } else {
                (rt, rv, lt, lv)
            };
            if !int_ty.is_integral() {
                self.comp.diags.error(
                    line,
                    col,
                    format!("Pointer offset must be integral, got {}", int_ty),
                );
                return ExprAttr::poisoned();
            }
            let pointee = ptr_ty.deref().unwrap_or_else(|| ptr_ty.element());
            let esize = self.size_of(&pointee, line, col).unwrap_or(4).max(1);
            let int_ty2 = TypeSeq::base("int");
            let int_v = self.cast_to(int_v, &int_ty, &int_ty2, line);
            let scaled = if esize == 1 {
                int_v
            } else {
                let t = self.new_temp(&int_ty2, line);
                self.comp.tac.emit(Instr::Bin {
                    op: BinOp::Mul,
                    ty: ValType::Int,
                    dst: t.clone(),
                    lhs: int_v,
                    rhs: Operand::imm(esize),
                });
                t
            };
            let dst = self.new_temp(&ptr_ty, line);
            self.comp.tac.emit(Instr::Bin {
                op,
                ty: ValType::Int,
                dst: dst.clone(),
                lhs: ptr_v,
                rhs: scaled,
            });
            return ExprAttr::value(ptr_ty, dst);
        }

        if !lt.is_arith() || !rt.is_arith() {
            self.comp.diags.error(
                line,
                col,
                format!("Type mismatch: cannot apply {} to {} and {}", op_text, lt, rt),
            );
            return ExprAttr::poisoned();
        }

        let integral_only = matches!(
            op,
            BinOp::Mod | BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Shl | BinOp::Shr
        );
        if integral_only && (!lt.is_integral() || !rt.is_integral()) {
            let what = if op == BinOp::Mod {
                "Modulo needs integral operands".to_string()
            } else {
                format!("Operands of {} must be integral", op_text)
            };
            self.comp.diags.error(line, col, what);
            return ExprAttr::poisoned();
        }

        if matches!(op, BinOp::Shl | BinOp::Shr) {
            // result is the promoted LHS; the shift count is cast to int
            let result_ty = promote_unary(&lt);
            let lv = self.cast_to(lv, &lt, &result_ty, line);
            let int_ty = TypeSeq::base("int");
            let rv = self.cast_to(rv, &rt, &int_ty, line);
            let dst = self.new_temp(&result_ty, line);
            self.comp.tac.emit(Instr::Bin {
                op,
                ty: result_ty.carrier(),
                dst: dst.clone(),
                lhs: lv,
                rhs: rv,
            });
            return ExprAttr::value(result_ty, dst);
        }

        let p = promote(&lt, &rt);
        let result_ty = p.result;
        let lv = self.cast_to(lv, &lt, &result_ty, line);
        let rv = self.cast_to(rv, &rt, &result_ty, line);
        let dst = self.new_temp(&result_ty, line);
        self.comp.tac.emit(Instr::Bin {
            op,
            ty: result_ty.carrier(),
            dst: dst.clone(),
            lhs: lv,
            rhs: rv,
        });
        ExprAttr::value(result_ty, dst)
    }

    fn translate_compare(
        &mut self,
        op_text: &str,
        mut lhs: ExprAttr,
        mut rhs: ExprAttr,
        line: usize,
        col: usize,
    ) -> ExprAttr {
        let lv = self.rvalue(&mut lhs);
        let rv = self.rvalue(&mut rhs);
        let (Some(lt), Some(rt), Some(lv), Some(rv)) =
            (lhs.ty.clone(), rhs.ty.clone(), lv, rv)
        else {
            return ExprAttr::poisoned();
        };
        let op = match op_text {
            "<" => CmpOp::Lt,
            ">" => CmpOp::Gt,
            "<=" => CmpOp::Le,
            ">=" => CmpOp::Ge,
            "==" => CmpOp::Eq,
            "!=" => CmpOp::Ne,
            _ => unreachable!("comparison operator {}", op_text),
        };

        let comparable = (lt.is_arith() && rt.is_arith())
            || (lt.is_pointer() && rt.is_pointer())
            || (lt.is_string() && rt.is_string());
        if !comparable {
            self.comp.diags.error(
                line,
                col,
                format!("Type mismatch: cannot compare {} with {}", lt, rt),
            );
            return ExprAttr::poisoned();
        }

        let (suffix, lv, rv) = if lt.is_arith() && rt.is_arith() {
            let common = promote(&lt, &rt).result;
            let lv = self.cast_to(lv, &lt, &common, line);
            let rv = self.cast_to(rv, &rt, &common, line);
            (common.carrier(), lv, rv)
        } else {
            (ValType::Int, lv, rv)
        };

        let result_ty = TypeSeq::base("int");
        let dst = self.new_temp(&result_ty, line);
        self.comp.tac.emit(Instr::Cmp {
            op,
            ty: suffix,
            dst: dst.clone(),
            lhs: lv,
            rhs: rv,
        });
        ExprAttr::value(result_ty, dst)
    }

    pub(crate) fn translate_assign(
        &mut self,
        lhs: ExprAttr,
        op: &str,
        mut rhs: ExprAttr,
        line: usize,
        col: usize,
    ) -> ExprAttr {
        if !lhs.ok() || !rhs.ok() {
            return ExprAttr::poisoned();
        }
        let lt = lhs.ty.clone().unwrap();
        if lt.is_array() {
            self.comp
                .diags
                .error(line, col, "Cannot assign to an array");
            return ExprAttr::poisoned();
        }
        if !lhs.is_var && !lt.is_struct() {
            self.comp
                .diags
                .error(line, col, "Assignment target is not an l-value");
            return ExprAttr::poisoned();
        }
        let Some(dst) = lhs.temp.clone() else {
            return ExprAttr::poisoned();
        };

        // compound operators split into the binary op plus a plain store
        if op != "=" {
            let bin = &op[..op.len() - 1];
            let computed = self.translate_binary(bin, lhs.clone(), rhs, line, col);
            return self.translate_assign(lhs, "=", computed, line, col);
        }

        if lt.is_struct() {
            let rt = rhs.ty.clone().unwrap();
            if rt.struct_name() != lt.struct_name() {
                self.comp.diags.error(
                    line,
                    col,
                    format!("Type mismatch: cannot assign {} to {}", rt, lt),
                );
                return ExprAttr::poisoned();
            }
            let Some(src) = rhs.temp.clone() else {
                return ExprAttr::poisoned();
            };
            let name = lt.struct_name().unwrap_or("").to_string();
            self.emit_struct_copy(&dst, &src, &name, line);
            let mut out = ExprAttr::value(lt, dst);
            out.line = line;
            return out;
        }

        let rt = rhs.ty.clone().unwrap();
        if !rt.is_scalar() {
            self.comp.diags.error(
                line,
                col,
                format!("Type mismatch: cannot assign {} to {}", rt, lt),
            );
            return ExprAttr::poisoned();
        }
        let Some(src) = self.rvalue(&mut rhs) else {
            return ExprAttr::poisoned();
        };
        let src = self.cast_to(src, &rt, &lt, line);
        self.comp.tac.emit(Instr::Assign {
            ty: lt.carrier(),
            dst: dst.clone(),
            src,
        });
        let mut out = ExprAttr::value(lt, dst);
        out.line = line;
        out
    }

    /// Whole-struct copy, expanded field by field with computed offsets,
    /// descending into nested struct fields.
    pub(crate) fn emit_struct_copy(
        &mut self,
        dst_base: &Operand,
        src_base: &Operand,
        struct_name: &str,
        line: usize,
    ) {
        let Some(info) = self.comp.symtab.lookup_struct(struct_name).cloned() else {
            return;
        };
        for (_, field) in &info.fields {
            let off = field.offset;
            if let Some(inner) = field.ty.struct_name().filter(|_| field.ty.is_struct()) {
                let inner = inner.to_string();
                let d = self.field_operand(dst_base, off, line);
                let s = self.field_operand(src_base, off, line);
                self.emit_struct_copy(&d, &s, &inner, line);
                continue;
            }
            if field.ty.is_array() || field.size > 4 {
                // bulk copy: words first, then the byte tail
                let words = field.size / 4;
                let tail = field.size % 4;
                for w in 0..words {
                    let d = self.field_operand(dst_base, off + (w * 4) as i32, line);
                    let s = self.field_operand(src_base, off + (w * 4) as i32, line);
                    self.comp.tac.emit(Instr::Assign {
                        ty: ValType::Int,
                        dst: d,
                        src: s,
                    });
                }
                for b in 0..tail {
                    let at = off + (words * 4 + b) as i32;
                    let d = self.field_operand(dst_base, at, line);
                    let s = self.field_operand(src_base, at, line);
                    self.comp.tac.emit(Instr::Assign {
                        ty: ValType::Char,
                        dst: d,
                        src: s,
                    });
                }
                continue;
            }
            let d = self.field_operand(dst_base, off, line);
            let s = self.field_operand(src_base, off, line);
            self.comp.tac.emit(Instr::Assign {
                ty: field.ty.carrier(),
                dst: d,
                src: s,
            });
        }
    }

    /// Address the field at `base + off`. Frame slots fold the displacement
    /// statically; indirect bases get an explicit address add.
    pub(crate) fn field_operand(&mut self, base: &Operand, off: i32, line: usize) -> Operand {
        match base {
            Operand::Stack(n) => Operand::Stack(n + off),
            Operand::Deref(inner) => {
                if off == 0 {
                    return base.clone();
                }
                let ty = TypeSeq::base("int");
                let t = self.new_temp(&ty, line);
                self.comp.tac.emit(Instr::Bin {
                    op: BinOp::Add,
                    ty: ValType::Int,
                    dst: t.clone(),
                    lhs: (**inner).clone(),
                    rhs: Operand::imm(off),
                });
                Operand::deref(t)
            }
            Operand::Global(name) => {
                let ty = TypeSeq::base("int");
                let t = self.new_temp(&ty, line);
                self.comp.tac.emit(Instr::Bin {
                    op: BinOp::Add,
                    ty: ValType::Int,
                    dst: t.clone(),
                    lhs: Operand::Imm(name.clone()),
                    rhs: Operand::imm(off),
                });
                Operand::deref(t)
            }
            other => other.clone(),
        }
    }

    fn translate_member(
        &mut self,
        base: ExprAttr,
        field: &str,
        arrow: bool,
        line: usize,
        col: usize,
    ) -> ExprAttr {
        let Some(ty) = base.ty.clone() else {
            return ExprAttr::poisoned();
        };
        let sname = if arrow {
            if ty.pointer_depth() != 1 || ty.base_name() != "struct" {
                self.comp.diags.error(
                    line,
                    col,
                    format!("-> needs a pointer to a struct, got {}", ty),
                );
                return ExprAttr::poisoned();
            }
            ty.struct_name().unwrap_or("").to_string()
        } else {
            if !ty.is_struct() {
                self.comp.diags.error(
                    line,
                    col,
                    format!("Member access on non-struct type {}", ty),
                );
                return ExprAttr::poisoned();
            }
            ty.struct_name().unwrap_or("").to_string()
        };
        let Some(info) = self.comp.symtab.lookup_struct(&sname).cloned() else {
            self.comp.diags.error(
                line,
                col,
                format!("The data structure struct {} is not declared", sname),
            );
            return ExprAttr::poisoned();
        };
        let Some(fentry) = info.field(field).cloned() else {
            self.comp.diags.error(
                line,
                col,
                format!("struct {} has no member named {}", sname, field),
            );
            return ExprAttr::poisoned();
        };
        let Some(base_op) = base.temp.clone() else {
            return ExprAttr::poisoned();
        };
        let operand = if arrow {
            // base holds the struct address as a value
            let ty_int = TypeSeq::base("int");
            let t = if fentry.offset == 0 {
                base_op
            } else {
                let t = self.new_temp(&ty_int, line);
                self.comp.tac.emit(Instr::Bin {
                    op: BinOp::Add,
                    ty: ValType::Int,
                    dst: t.clone(),
                    lhs: base_op,
                    rhs: Operand::imm(fentry.offset),
                });
                t
            };
            Operand::deref(t)
        } else {
            self.field_operand(&base_op, fentry.offset, line)
        };
        let mut out = ExprAttr::value(fentry.ty.clone(), operand);
        out.is_var = true;
        out.line = line;
        out
    }

    fn translate_subscript(
        &mut self,
        base: ExprAttr,
        line: usize,
        col: usize,
    ) -> PResult<ExprAttr> {
        let Some(ty) = base.ty.clone() else {
            // swallow the bracket group for recovery
            self.bump();
            let _ = self.expression()?;
            self.expect("]")?;
            return Ok(ExprAttr::poisoned());
        };

        // plain pointer subscript: one level, scaled by pointee size
        if ty.is_pointer() && !ty.is_array() {
            self.bump();
            let mut idx = self.expression()?;
            self.expect("]")?;
            let iv = self.rvalue(&mut idx);
            let (Some(it), Some(iv)) = (idx.ty.clone(), iv) else {
                return Ok(ExprAttr::poisoned());
            };
            if !it.is_integral() {
                self.comp
                    .diags
                    .error(line, col, format!("Subscript must be integral, got {}", it));
                return Ok(ExprAttr::poisoned());
            }
            let pointee = ty.deref().unwrap();
            let esize = self.size_of(&pointee, line, col).unwrap_or(4).max(1);
            let int_ty = TypeSeq::base("int");
            let iv = self.cast_to(iv, &it, &int_ty, line);
            let scaled = if esize == 1 {
                iv
            } else {
                let t = self.new_temp(&int_ty, line);
                self.comp.tac.emit(Instr::Bin {
                    op: BinOp::Mul,
                    ty: ValType::Int,
                    dst: t.clone(),
                    lhs: iv,
                    rhs: Operand::imm(esize),
                });
                t
            };
            let Some(pv) = base.temp.clone() else {
                return Ok(ExprAttr::poisoned());
            };
            let addr = self.new_temp(&int_ty, line);
            self.comp.tac.emit(Instr::Bin {
                op: BinOp::Add,
                ty: ValType::Int,
                dst: addr.clone(),
                lhs: pv,
                rhs: scaled,
            });
            let mut out = ExprAttr::value(pointee, Operand::deref(addr));
            out.is_var = true;
            return Ok(out);
        }

        if !ty.is_array() {
            self.comp
                .diags
                .error(line, col, format!("Cannot subscript non-array type {}", ty));
            self.bump();
            let _ = self.expression()?;
            self.expect("]")?;
            return Ok(ExprAttr::poisoned());
        }

        let dims = ty.dims();
        let elem = ty.element();
        let esize = self.size_of(&elem, line, col).unwrap_or(4).max(1);
        let int_ty = TypeSeq::base("int");

        // the array base: locals are addressed relative to the frame,
        // parameters hold the caller's address, globals are link-time names
        let Some(slot) = base.temp.clone() else {
            self.bump();
            let _ = self.expression()?;
            self.expect("]")?;
            return Ok(ExprAttr::poisoned());
        };
        let base_addr = match &slot {
            Operand::Stack(n) if *n < 0 => Operand::FrameAddr(*n),
            Operand::Stack(n) => Operand::Stack(*n),
            Operand::Global(name) => Operand::Imm(name.clone()),
            other => other.clone(),
        };

        // incremental linearization: off = off * dim[k] + idx[k]
        let mut level = 0usize;
        let mut off: Option<Operand> = None;
        while self.check("[") && level < dims.len() {
            self.bump();
            let mut idx = self.expression()?;
            self.expect("]")?;
            let iv = self.rvalue(&mut idx);
            let (Some(it), Some(iv)) = (idx.ty.clone(), iv) else {
                return Ok(ExprAttr::poisoned());
            };
            if !it.is_integral() {
                self.comp
                    .diags
                    .error(line, col, format!("Subscript must be integral, got {}", it));
                return Ok(ExprAttr::poisoned());
            }
            let iv = self.cast_to(iv, &it, &int_ty, line);
            off = Some(match off {
                None => iv,
                Some(prev) => {
                    let scaled = self.new_temp(&int_ty, line);
                    self.comp.tac.emit(Instr::Bin {
                        op: BinOp::Mul,
                        ty: ValType::Int,
                        dst: scaled.clone(),
                        lhs: prev,
                        rhs: Operand::imm(dims[level]),
                    });
                    let summed = self.new_temp(&int_ty, line);
                    self.comp.tac.emit(Instr::Bin {
                        op: BinOp::Add,
                        ty: ValType::Int,
                        dst: summed.clone(),
                        lhs: scaled,
                        rhs: iv,
                    });
                    summed
                }
            });
            level += 1;
        }
        let off = off.expect("subscript chain without index");

        // remaining dimensions widen the stride (partial subscripts yield
        // the address of the sub-array)
        let stride: u32 = dims[level..].iter().product::<u32>().max(1) * esize;
        let scaled = if stride == 1 {
            off
        } else {
            let t = self.new_temp(&int_ty, line);
            self.comp.tac.emit(Instr::Bin {
                op: BinOp::Mul,
                ty: ValType::Int,
                dst: t.clone(),
                lhs: off,
                rhs: Operand::imm(stride),
            });
            t
        };
        let addr = self.new_temp(&int_ty, line);
        self.comp.tac.emit(Instr::Bin {
            op: BinOp::Add,
            ty: ValType::Int,
            dst: addr.clone(),
            lhs: base_addr,
            rhs: scaled,
        });

        if level == dims.len() {
            let mut out = ExprAttr::value(elem, Operand::deref(addr));
            out.is_var = true;
            Ok(out)
        } else {
            let mut sub = elem.clone();
            for d in &dims[level..] {
                sub.push_dim(*d);
            }
            Ok(ExprAttr::value(sub.addr_of(), addr))
        }
    }

    fn translate_incdec(
        &mut self,
        target: ExprAttr,
        op: &str,
        prefix: bool,
        line: usize,
        col: usize,
    ) -> ExprAttr {
        let Some(ty) = target.ty.clone() else {
            return ExprAttr::poisoned();
        };
        if !target.is_var || !ty.is_scalar() {
            self.comp.diags.error(
                line,
                col,
                format!("Operand of {} must be a scalar l-value", op),
            );
            return ExprAttr::poisoned();
        }
        let Some(slot) = target.temp.clone() else {
            return ExprAttr::poisoned();
        };
        let bin = if op == "++" { BinOp::Add } else { BinOp::Sub };

        // pointers step by the pointee size, floats through the pool
        let step: Operand = if ty.is_pointer() {
            let pointee = ty.deref().unwrap();
            let esize = self.size_of(&pointee, line, col).unwrap_or(4).max(1);
            Operand::imm(esize)
        } else if ty.carrier() == ValType::Float {
            let label = self.comp.tac.intern_float(1.0);
            let one = self.new_temp(&ty, line);
            self.comp.tac.emit(Instr::LoadFloat {
                label,
                dst: one.clone(),
            });
            one
        } else {
            Operand::imm(1)
        };

        let old = if !prefix {
            let t = self.new_temp(&ty, line);
            self.comp.tac.emit(Instr::Assign {
                ty: ty.carrier(),
                dst: t.clone(),
                src: slot.clone(),
            });
            Some(t)
        } else {
            None
        };

        let sum = self.new_temp(&ty, line);
        self.comp.tac.emit(Instr::Bin {
            op: bin,
            ty: ty.carrier(),
            dst: sum.clone(),
            lhs: slot.clone(),
            rhs: step,
        });
        self.comp.tac.emit(Instr::Assign {
            ty: ty.carrier(),
            dst: slot.clone(),
            src: sum,
        });

        match old {
            Some(t) => ExprAttr::value(ty, t),
            None => ExprAttr::value(ty, slot),
        }
    }

    // ---- calls ---------------------------------------------------------

    fn translate_call(
        &mut self,
        callee: ExprAttr,
        line: usize,
        col: usize,
    ) -> PResult<ExprAttr> {
        self.expect("(")?;
        let mut args: Vec<ExprAttr> = Vec::new();
        if !self.check(")") {
            loop {
                args.push(self.assignment_expr()?);
                if !self.consume(",") {
                    break;
                }
            }
        }
        self.expect(")")?;

        if !callee.ok() {
            return Ok(ExprAttr::poisoned());
        }
        let Some(fname) = callee.func.clone() else {
            self.comp
                .diags
                .error(line, col, "Called object is not a function");
            return Ok(ExprAttr::poisoned());
        };
        let Some(entry) = self.comp.symtab.lookup(&fname).cloned() else {
            return Ok(ExprAttr::poisoned());
        };

        if !is_varargs(&fname) && args.len() != entry.num_params {
            self.comp.diags.error(
                line,
                col,
                format!(
                    "{} expects {} argument(s), got {}",
                    fname,
                    entry.num_params,
                    args.len()
                ),
            );
            return Ok(ExprAttr::poisoned());
        }

        // evaluate left to right, collecting the operand and type of each
        let mut lowered: Vec<(Operand, TypeSeq)> = Vec::new();
        for (i, mut arg) in args.into_iter().enumerate() {
            let av = if arg.ty.as_ref().map(|t| t.is_struct()).unwrap_or(false) {
                arg.temp.clone()
            } else {
                self.rvalue(&mut arg)
            };
            let (Some(at), Some(av)) = (arg.ty.clone(), av) else {
                return Ok(ExprAttr::poisoned());
            };
            // declared-parameter conversion for user-defined functions
            let (av, at) = match entry.param_types.get(i) {
                Some(pt) if pt.is_scalar() && at.is_scalar() && pt.cast_ty() != at.cast_ty() => {
                    (self.cast_to(av, &at, pt, line), pt.clone())
                }
                Some(pt) if !pt.is_scalar() || !at.is_scalar() => {
                    let compatible = (pt.is_struct()
                        && at.is_struct()
                        && pt.struct_name() == at.struct_name())
                        || (!pt.is_struct() && !at.is_struct());
                    if !compatible {
                        self.comp.diags.error(
                            line,
                            col,
                            format!(
                                "Argument {} of {} has type {}, expected {}",
                                i + 1,
                                fname,
                                at,
                                pt
                            ),
                        );
                        return Ok(ExprAttr::poisoned());
                    }
                    (av, at)
                }
                _ => (av, at),
            };
            lowered.push((av, at));
        }

        // pushes go out in reverse declaration order
        let nargs = lowered.len() as u32;
        for (av, at) in lowered.into_iter().rev() {
            self.emit_arg_push(&fname, av, &at, line, col);
        }

        let ret = entry
            .ret_type
            .clone()
            .unwrap_or_else(|| TypeSeq::base("int"));
        if is_math_func(&fname) {
            let dst = self.new_temp(&TypeSeq::base("float"), line);
            self.comp.tac.emit(Instr::Call {
                kind: CallKind::Normal,
                dst: Some(dst.clone()),
                func: fname,
                nargs,
            });
            return Ok(ExprAttr::value(TypeSeq::base("float"), dst));
        }
        if ret.is_void() {
            self.comp.tac.emit(Instr::Call {
                kind: CallKind::Normal,
                dst: None,
                func: fname,
                nargs,
            });
            return Ok(ExprAttr {
                ty: Some(ret),
                line,
                col,
                ..ExprAttr::default()
            });
        }
        if ret.is_struct() {
            let dst = self.new_temp(&ret, line);
            self.comp.tac.emit(Instr::Call {
                kind: CallKind::Struct,
                dst: Some(dst.clone()),
                func: fname,
                nargs,
            });
            return Ok(ExprAttr::value(ret, dst));
        }
        let kind = if ret.carrier() == ValType::Char {
            CallKind::Char
        } else {
            CallKind::Normal
        };
        let dst = self.new_temp(&ret, line);
        self.comp.tac.emit(Instr::Call {
            kind,
            dst: Some(dst.clone()),
            func: fname,
            nargs,
        });
        Ok(ExprAttr::value(ret, dst))
    }

    /// Argument push selection: varargs and the x87 library routines have
    /// their own ABI sequences.
    fn emit_arg_push(
        &mut self,
        fname: &str,
        av: Operand,
        at: &TypeSeq,
        line: usize,
        col: usize,
    ) {
        if fname == "printf" {
            let instr = match at.carrier() {
                ValType::Float => Instr::PrintfPushFloat { src: av },
                ValType::Char if !at.is_pointer() => Instr::PrintfPushChar { src: av },
                _ => Instr::Param { src: av, size: None },
            };
            self.comp.tac.emit(instr);
            return;
        }
        if fname == "scanf" {
            self.comp.tac.emit(Instr::Param { src: av, size: None });
            return;
        }
        if UNARY_MATH_FUNCS.contains(&fname) {
            let ty = if at.carrier() == ValType::Float {
                ValType::Float
            } else {
                ValType::Int
            };
            self.comp.tac.emit(Instr::MathPush { ty, src: av });
            return;
        }
        if BINARY_MATH_FUNCS.contains(&fname) {
            let ty = if at.carrier() == ValType::Float {
                ValType::Float
            } else {
                ValType::Int
            };
            self.comp.tac.emit(Instr::PowPush { ty, src: av });
            return;
        }
        if at.is_struct() {
            let size = self.size_of(at, line, col).unwrap_or(4);
            self.comp.tac.emit(Instr::Param {
                src: av,
                size: Some(size),
            });
            return;
        }
        if at.carrier() == ValType::Char && !at.is_pointer() && !at.is_array() {
            self.comp.tac.emit(Instr::PushChar { src: av });
            return;
        }
        self.comp.tac.emit(Instr::Param { src: av, size: None });
    }
}

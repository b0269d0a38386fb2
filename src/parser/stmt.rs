//! Statement translation: the backpatching protocol for control flow.
//!
//! Each statement synthesizes `next_list` (fall-through jumps), `break_list`
//! and `continue_list`; the lists bubble up the statement tree until the
//! nearest enclosing loop or switch consumes them.

use super::{CaseRec, PResult, Parser, StmtAttr, SwitchCtx};
use crate::tac::{CmpOp, Instr, Operand};
use crate::types::{TypeSeq, ValType};
use tracing::debug;

impl<'a> Parser<'a> {
    pub(crate) fn statement(&mut self) -> PResult<StmtAttr> {
        match self.peek_text() {
            "{" => self.compound_statement(),
            "if" => self.if_statement(),
            "while" => self.while_statement(),
            "do" => self.do_while_statement(),
            "for" => self.for_statement(),
            "switch" => self.switch_statement(),
            "case" | "default" => self.labeled_statement(),
            "break" => {
                self.bump();
                self.expect(";")?;
                let idx = self.comp.tac.emit(Instr::Goto { target: None });
                Ok(StmtAttr {
                    break_list: vec![idx],
                    ..StmtAttr::default()
                })
            }
            "continue" => {
                self.bump();
                self.expect(";")?;
                let idx = self.comp.tac.emit(Instr::Goto { target: None });
                Ok(StmtAttr {
                    continue_list: vec![idx],
                    ..StmtAttr::default()
                })
            }
            "return" => self.return_statement(),
            ";" => {
                self.bump();
                Ok(StmtAttr::default())
            }
            _ => {
                let _ = self.expression()?;
                self.expect(";")?;
                Ok(StmtAttr::default())
            }
        }
    }

    /// `{ declaration* statement* }` in its own scope.
    pub(crate) fn compound_statement(&mut self) -> PResult<StmtAttr> {
        self.expect("{")?;
        self.comp.symtab.push_scope(&mut self.comp.tac);
        let attr = self.block_body();
        self.comp.symtab.pop_scope(&mut self.comp.tac);
        self.expect("}")?;
        attr
    }

    /// Block contents without the scope bookkeeping (function bodies manage
    /// their own scope for parameters).
    pub(crate) fn block_body(&mut self) -> PResult<StmtAttr> {
        let mut out = StmtAttr::default();
        while self.starts_declaration() {
            self.declaration()?;
        }
        while !self.check("}") && !self.at_end() {
            // sequencing: the previous statement's fall-through lands here
            let here = self.comp.tac.next_index();
            self.comp.tac.backpatch(&out.next_list, here);
            out.next_list.clear();
            let s = self.statement()?;
            out.absorb(s);
        }
        Ok(out)
    }

    /// `if (E) S1 [else S2]` - the else binds to the nearest if.
    fn if_statement(&mut self) -> PResult<StmtAttr> {
        self.bump();
        self.expect("(")?;
        let mut cond = self.expression()?;
        self.expect(")")?;
        let (tl, fl) = self.bool_lists(&mut cond);

        let then_start = self.comp.tac.next_index();
        let mut s1 = self.statement()?;
        self.comp.tac.backpatch(&tl, then_start);

        if self.consume("else") {
            let skip = self.comp.tac.emit(Instr::Goto { target: None });
            let else_start = self.comp.tac.next_index();
            let s2 = self.statement()?;
            self.comp.tac.backpatch(&fl, else_start);
            s1.absorb(s2);
            s1.next_list.push(skip);
        } else {
            s1.next_list.extend(fl);
        }
        Ok(s1)
    }

    /// `while (E) S` - loop top and body markers, back edge at the end.
    fn while_statement(&mut self) -> PResult<StmtAttr> {
        self.bump();
        let loop_top = self.comp.tac.next_index();
        self.expect("(")?;
        let mut cond = self.expression()?;
        self.expect(")")?;
        let (tl, fl) = self.bool_lists(&mut cond);

        let body_start = self.comp.tac.next_index();
        let body = self.statement()?;
        self.comp.tac.backpatch(&tl, body_start);
        self.comp.tac.backpatch(&body.next_list, loop_top);
        self.comp.tac.backpatch(&body.continue_list, loop_top);
        self.comp.tac.emit(Instr::Goto {
            target: Some(loop_top),
        });

        let mut out = StmtAttr::default();
        out.next_list.extend(fl);
        out.next_list.extend(body.break_list);
        Ok(out)
    }

    /// `do S while (E);` - the test sits after the body.
    fn do_while_statement(&mut self) -> PResult<StmtAttr> {
        self.bump();
        let body_top = self.comp.tac.next_index();
        let body = self.statement()?;

        self.expect("while")?;
        self.expect("(")?;
        let test_top = self.comp.tac.next_index();
        let mut cond = self.expression()?;
        self.expect(")")?;
        self.expect(";")?;
        let (tl, fl) = self.bool_lists(&mut cond);

        self.comp.tac.backpatch(&tl, body_top);
        self.comp.tac.backpatch(&body.next_list, test_top);
        self.comp.tac.backpatch(&body.continue_list, test_top);

        let mut out = StmtAttr::default();
        out.next_list.extend(fl);
        out.next_list.extend(body.break_list);
        Ok(out)
    }

    /// `for (init; cond; step) S` - emission order is init, cond, step,
    /// body; the body jumps back to the step, the step to the cond.
    fn for_statement(&mut self) -> PResult<StmtAttr> {
        self.bump();
        self.expect("(")?;
        if !self.check(";") {
            let _ = self.expression()?;
        }
        self.expect(";")?;

        let cond_start = self.comp.tac.next_index();
        let (tl, fl) = if self.check(";") {
            // missing condition: always true
            let ty = TypeSeq::base("int");
            let t = self.new_temp(&ty, 0);
            self.comp.tac.emit(Instr::Assign {
                ty: ValType::Int,
                dst: t.clone(),
                src: Operand::imm(1),
            });
            let (ti, fi) = self.emit_bool_pair(t);
            (vec![ti], vec![fi])
        } else {
            let mut cond = self.expression()?;
            self.bool_lists(&mut cond)
        };
        self.expect(";")?;

        let step_start = self.comp.tac.next_index();
        if !self.check(")") {
            let _ = self.expression()?;
        }
        self.comp.tac.emit(Instr::Goto {
            target: Some(cond_start),
        });
        self.expect(")")?;

        let body_start = self.comp.tac.next_index();
        let body = self.statement()?;
        self.comp.tac.emit(Instr::Goto {
            target: Some(step_start),
        });

        self.comp.tac.backpatch(&tl, body_start);
        self.comp.tac.backpatch(&body.next_list, step_start);
        self.comp.tac.backpatch(&body.continue_list, step_start);

        let mut out = StmtAttr::default();
        out.next_list.extend(fl);
        out.next_list.extend(body.break_list);
        Ok(out)
    }

    /// `switch (E) S` - a placeholder jump skips the body; the dispatcher
    /// after it re-runs each recorded test block and branches to its case.
    fn switch_statement(&mut self) -> PResult<StmtAttr> {
        self.bump();
        self.expect("(")?;
        let mut scrutinee = self.expression()?;
        self.expect(")")?;
        let temp = match self.rvalue(&mut scrutinee) {
            Some(v) => v,
            None => Operand::imm(0),
        };

        let dispatch_jump = self.comp.tac.emit(Instr::Goto { target: None });
        self.switch_stack.push(SwitchCtx {
            temp,
            cases: Vec::new(),
            default_entry: None,
            default_line: 0,
            open: false,
            joins: Vec::new(),
        });

        let body = self.statement()?;
        let mut ctx = self.switch_stack.pop().expect("switch context");
        if ctx.open {
            // the last case falls out of the switch
            let j = self.comp.tac.emit(Instr::Goto { target: None });
            ctx.joins.push(j);
        }

        let dispatch_start = self.comp.tac.next_index();
        self.comp.tac.backpatch(&[dispatch_jump], dispatch_start);
        for case in &ctx.cases {
            // duplicate the recorded test block into the dispatcher
            let copied: Vec<Instr> =
                self.comp.tac.code[case.test_start..case.code_start].to_vec();
            for instr in copied {
                self.comp.tac.emit(instr);
            }
            self.comp.tac.emit(Instr::IfnzGoto {
                target: Some(case.code_start),
                cond: case.cond.clone(),
            });
        }
        if let Some(entry) = ctx.default_entry {
            self.comp.tac.emit(Instr::Goto {
                target: Some(entry),
            });
        }
        debug!(
            cases = ctx.cases.len(),
            has_default = ctx.default_entry.is_some(),
            "switch dispatch synthesized"
        );

        let mut out = StmtAttr::default();
        out.next_list.extend(ctx.joins);
        out.next_list.extend(body.next_list);
        out.next_list.extend(body.break_list);
        out.continue_list.extend(body.continue_list);
        Ok(out)
    }

    /// `case E: statement` and `default: statement` inside a switch.
    fn labeled_statement(&mut self) -> PResult<StmtAttr> {
        let (line, col) = self.here();
        let is_default = self.check("default");
        self.bump();

        if self.switch_stack.is_empty() {
            self.comp.diags.error(
                line,
                col,
                if is_default {
                    "default label outside of a switch"
                } else {
                    "case label outside of a switch"
                },
            );
            if !is_default {
                let _ = self.conditional_expr()?;
            }
            self.expect(":")?;
            return self.statement();
        }

        // close the previous case region
        let was_open = self.switch_stack.last().unwrap().open;
        if was_open {
            let j = self.comp.tac.emit(Instr::Goto { target: None });
            self.switch_stack.last_mut().unwrap().joins.push(j);
        }

        if is_default {
            self.expect(":")?;
            let entry = self.comp.tac.next_index();
            {
                let ctx = self.switch_stack.last_mut().unwrap();
                if ctx.default_entry.is_some() {
                    let prior = ctx.default_line;
                    self.comp.diags.error(
                        line,
                        col,
                        format!(
                            "Multiple default labels in one switch (previous on line {})",
                            prior
                        ),
                    );
                } else {
                    ctx.default_entry = Some(entry);
                    ctx.default_line = line;
                }
                ctx.open = true;
            }
            return self.statement();
        }

        // case value: a constant expression, evaluated in the test block
        let test_start = self.comp.tac.next_index();
        let mut value = self.conditional_expr()?;
        self.expect(":")?;
        let sw_temp = self.switch_stack.last().unwrap().temp.clone();
        let cond = match self.rvalue(&mut value) {
            Some(v) => {
                let int_ty = TypeSeq::base("int");
                let (vt, vline) = (value.ty.clone().unwrap_or_else(|| int_ty.clone()), line);
                let v = self.cast_to(v, &vt, &int_ty, vline);
                let t = self.new_temp(&int_ty, line);
                self.comp.tac.emit(Instr::Cmp {
                    op: CmpOp::Eq,
                    ty: ValType::Int,
                    dst: t.clone(),
                    lhs: sw_temp,
                    rhs: v,
                });
                t
            }
            None => Operand::imm(0),
        };
        let code_start = self.comp.tac.next_index();
        {
            let ctx = self.switch_stack.last_mut().unwrap();
            ctx.cases.push(CaseRec {
                test_start,
                code_start,
                cond,
            });
            ctx.open = true;
        }
        self.statement()
    }

    /// `return [E];` with the result converted to the function's type.
    fn return_statement(&mut self) -> PResult<StmtAttr> {
        let (line, col) = self.here();
        self.bump();
        let (ret_type, struct_return) = match &self.current_fn {
            Some(ctx) => (ctx.ret_type.clone(), ctx.struct_return),
            None => (TypeSeq::base("int"), false),
        };

        if self.consume(";") {
            if !ret_type.is_void() {
                self.comp.diags.error(
                    line,
                    col,
                    format!("Return without a value in a function returning {}", ret_type),
                );
            }
            self.comp.tac.emit(Instr::Ret { val: None });
            return Ok(StmtAttr::default());
        }

        let mut e = self.expression()?;
        self.expect(";")?;
        if !e.ok() {
            self.comp.tac.emit(Instr::Ret { val: None });
            return Ok(StmtAttr::default());
        }
        let ty = e.ty.clone().unwrap();

        if ret_type.is_void() {
            self.comp
                .diags
                .error(line, col, "Return with a value in a void function");
            self.comp.tac.emit(Instr::Ret { val: None });
            return Ok(StmtAttr::default());
        }

        if struct_return {
            if ty.struct_name() != ret_type.struct_name() || !ty.is_struct() {
                self.comp.diags.error(
                    line,
                    col,
                    format!("Return type mismatch: expected {}, got {}", ret_type, ty),
                );
                self.comp.tac.emit(Instr::Ret { val: None });
                return Ok(StmtAttr::default());
            }
            let size = self.size_of(&ret_type, line, col).unwrap_or(4);
            let ptr = e.temp.clone().unwrap_or(Operand::imm(0));
            self.comp.tac.emit(Instr::RetStruct { ptr, size });
            return Ok(StmtAttr::default());
        }

        if !ty.is_scalar() {
            self.comp.diags.error(
                line,
                col,
                format!("Return type mismatch: expected {}, got {}", ret_type, ty),
            );
            self.comp.tac.emit(Instr::Ret { val: None });
            return Ok(StmtAttr::default());
        }
        let val = match self.rvalue(&mut e) {
            Some(v) => self.cast_to(v, &ty, &ret_type, line),
            None => Operand::imm(0),
        };
        self.comp.tac.emit(Instr::Ret { val: Some(val) });
        Ok(StmtAttr::default())
    }
}

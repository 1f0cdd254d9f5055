//! The x86_64 System-V frame.
//!
//! Integer arguments arrive in RDI, RSI, RDX, RCX, R8, R9 and SSE arguments
//! in XMM0-XMM7; the rest spill to the incoming-argument area above the
//! saved frame pointer. RBX and R12-R15 are callee-save and get parked in
//! temps across the body; everything else is caller-save.

use super::{Access, Frame};
use crate::constants::REGISTER_WIDTH;
use crate::ir::{IrEntry, IrVector, Operand, TempAllocator};
use crate::types::{round_up, AllocKind};

use std::rc::Rc;

pub const RAX: usize = 0;
pub const RBX: usize = 1;
pub const RCX: usize = 2;
pub const RDX: usize = 3;
pub const RSI: usize = 4;
pub const RDI: usize = 5;
pub const RSP: usize = 6;
pub const RBP: usize = 7;
pub const R8: usize = 8;
pub const R9: usize = 9;
pub const R10: usize = 10;
pub const R11: usize = 11;
pub const R12: usize = 12;
pub const R13: usize = 13;
pub const R14: usize = 14;
pub const R15: usize = 15;
pub const XMM0: usize = 16;
pub const XMM15: usize = 31;

pub const INT_ARG_REGS: [usize; 6] = [RDI, RSI, RDX, RCX, R8, R9];
pub const SSE_ARG_REGS: [usize; 8] = [XMM0, XMM0 + 1, XMM0 + 2, XMM0 + 3, XMM0 + 4, XMM0 + 5, XMM0 + 6, XMM0 + 7];
pub const CALLEE_SAVE: [usize; 5] = [RBX, R12, R13, R14, R15];

pub fn is_sse(reg: usize) -> bool {
    (XMM0..=XMM15).contains(&reg)
}

/// Frame constructor handed to the translator.
pub fn frame_ctor(name: String) -> Box<dyn Frame> {
    Box::new(X86_64Frame::new(name))
}

pub struct X86_64Frame {
    name: String,
    next_int_arg: usize,
    next_sse_arg: usize,
    /// next incoming stack argument; above the return address and saved RBP
    incoming_offset: i64,
    /// grows downward for escaping and memory-shaped locals
    local_offset: i64,
    /// deepest extent of `local_offset` across scopes
    max_locals: i64,
    scope_marks: Vec<i64>,
    /// entry moves that land incoming arguments in their accesses
    arg_moves: IrVector,
    /// the return slot, moved into RAX/XMM0 by the epilogue
    ret_slot: Option<(Operand, AllocKind)>,
}

impl X86_64Frame {
    pub fn new(name: String) -> Self {
        Self {
            name,
            next_int_arg: 0,
            next_sse_arg: 0,
            incoming_offset: 16,
            local_offset: 0,
            max_locals: 0,
            scope_marks: Vec::new(),
            arg_moves: IrVector::new(),
            ret_slot: None,
        }
    }

    fn stack_slot(&mut self, size: u64, align: u64) -> i64 {
        let next = (self.local_offset - size as i64).unsigned_abs();
        self.local_offset = -(round_up(next, align.max(1)) as i64);
        self.max_locals = self.max_locals.min(self.local_offset);
        self.local_offset
    }
}

impl Frame for X86_64Frame {
    fn name(&self) -> &str {
        &self.name
    }

    fn frame_size(&self) -> u64 {
        (-self.max_locals) as u64
    }

    fn scope_start(&mut self) {
        self.scope_marks.push(self.local_offset);
    }

    fn scope_end(&mut self, body: IrVector, _temps: &mut TempAllocator) -> IrVector {
        let mark = self.scope_marks.pop().unwrap_or(0);
        // sibling scopes reuse the space of scopes already closed
        self.local_offset = mark;
        body
    }

    fn alloc_arg(
        &mut self,
        size: u64,
        align: u64,
        kind: AllocKind,
        escapes: bool,
        temps: &mut TempAllocator,
    ) -> Rc<dyn Access> {
        let reg = match kind {
            AllocKind::Gp if self.next_int_arg < INT_ARG_REGS.len() => {
                let r = INT_ARG_REGS[self.next_int_arg];
                self.next_int_arg += 1;
                Some(r)
            }
            AllocKind::Sse if self.next_sse_arg < SSE_ARG_REGS.len() => {
                let r = SSE_ARG_REGS[self.next_sse_arg];
                self.next_sse_arg += 1;
                Some(r)
            }
            _ => None,
        };

        match reg {
            Some(reg) => {
                if escapes {
                    let offset = self.stack_slot(size, align);
                    self.arg_moves
                        .push(IrEntry::stk_store(size, offset, Operand::Reg(reg)));
                    Rc::new(StackAccess { offset, size, align, kind })
                } else {
                    let temp = Operand::temp(temps.allocate(), size, align, kind);
                    self.arg_moves
                        .push(IrEntry::mov(size, temp.clone(), Operand::Reg(reg)));
                    Rc::new(TempAccess { temp })
                }
            }
            None => {
                // memory-class or overflow arguments live where the caller
                // put them
                let offset = round_up(self.incoming_offset as u64, align.max(1)) as i64;
                self.incoming_offset = offset + round_up(size, REGISTER_WIDTH) as i64;
                Rc::new(StackAccess { offset, size, align, kind })
            }
        }
    }

    fn alloc_ret_val(
        &mut self,
        size: u64,
        kind: AllocKind,
        temps: &mut TempAllocator,
    ) -> Rc<dyn Access> {
        let temp = Operand::temp(temps.allocate(), size, size.max(1), kind);
        self.ret_slot = Some((temp.clone(), kind));
        Rc::new(ReturnAccess { temp })
    }

    fn alloc_local(
        &mut self,
        size: u64,
        align: u64,
        kind: AllocKind,
        escapes: bool,
        temps: &mut TempAllocator,
    ) -> Rc<dyn Access> {
        if escapes || kind == AllocKind::Mem {
            let offset = self.stack_slot(size, align);
            Rc::new(StackAccess { offset, size, align, kind })
        } else {
            let temp = Operand::temp(temps.allocate(), size, align, kind);
            Rc::new(TempAccess { temp })
        }
    }

    fn pass_arguments(
        &mut self,
        out: &mut IrVector,
        args: &[(Operand, u64, AllocKind)],
        _temps: &mut TempAllocator,
    ) {
        let mut int_used = 0;
        let mut sse_used = 0;
        let mut overflow = 0i64;
        for (operand, size, kind) in args {
            match kind {
                AllocKind::Gp if int_used < INT_ARG_REGS.len() => {
                    out.push(IrEntry::mov(
                        *size,
                        Operand::Reg(INT_ARG_REGS[int_used]),
                        operand.clone(),
                    ));
                    int_used += 1;
                }
                AllocKind::Sse if sse_used < SSE_ARG_REGS.len() => {
                    out.push(IrEntry::mov(
                        *size,
                        Operand::Reg(SSE_ARG_REGS[sse_used]),
                        operand.clone(),
                    ));
                    sse_used += 1;
                }
                _ => {
                    // outgoing overflow slots sit below the frame, in call
                    // order
                    overflow += round_up(*size, REGISTER_WIDTH) as i64;
                    let offset = self.max_locals - overflow;
                    out.push(IrEntry::stk_store(*size, offset, operand.clone()));
                }
            }
        }
    }

    fn fetch_return(
        &mut self,
        out: &mut IrVector,
        size: u64,
        align: u64,
        kind: AllocKind,
        temps: &mut TempAllocator,
    ) -> Operand {
        let reg = if kind == AllocKind::Sse { XMM0 } else { RAX };
        let dest = Operand::temp(temps.allocate(), size, align, kind);
        out.push(IrEntry::mov(size, dest.clone(), Operand::Reg(reg)));
        dest
    }

    fn generate_entry_exit(&mut self, body: IrVector, temps: &mut TempAllocator) -> IrVector {
        let mut wrapped = IrVector::new();

        let mut saved = Vec::new();
        for reg in CALLEE_SAVE {
            let temp = Operand::temp(temps.allocate(), REGISTER_WIDTH, REGISTER_WIDTH, AllocKind::Gp);
            wrapped.push(IrEntry::mov(REGISTER_WIDTH, temp.clone(), Operand::Reg(reg)));
            saved.push((reg, temp));
        }
        wrapped.append(&mut self.arg_moves);
        wrapped.extend(body);
        if let Some((slot, kind)) = self.ret_slot.take() {
            let size = crate::ir::operand_size(&slot);
            let reg = if kind == AllocKind::Sse { XMM0 } else { RAX };
            wrapped.push(IrEntry::mov(size, Operand::Reg(reg), slot));
        }
        for (reg, temp) in saved {
            wrapped.push(IrEntry::mov(REGISTER_WIDTH, Operand::Reg(reg), temp));
        }
        wrapped.push(IrEntry::ret());
        wrapped
    }
}

/// A value living in a virtual register.
struct TempAccess {
    temp: Operand,
}

impl Access for TempAccess {
    fn load(&self, _out: &mut IrVector, _temps: &mut TempAllocator) -> Operand {
        self.temp.clone()
    }

    fn store(&self, out: &mut IrVector, source: Operand, _temps: &mut TempAllocator) {
        let Operand::Temp { size, .. } = self.temp else {
            crate::internal_error!("temp access without a temp operand");
        };
        out.push(IrEntry::mov(size, self.temp.clone(), source));
    }

    fn label(&self) -> Option<&str> {
        None
    }

    fn address(&self) -> Option<Operand> {
        None
    }
}

/// A value living in the frame at a fixed offset.
struct StackAccess {
    offset: i64,
    size: u64,
    align: u64,
    kind: AllocKind,
}

impl Access for StackAccess {
    fn load(&self, out: &mut IrVector, temps: &mut TempAllocator) -> Operand {
        if self.kind == AllocKind::Mem {
            // aggregates are handled by address
            return Operand::StackOffset(self.offset);
        }
        let dest = Operand::temp(temps.allocate(), self.size, self.align, self.kind);
        out.push(IrEntry::stk_load(self.size, dest.clone(), self.offset));
        dest
    }

    fn store(&self, out: &mut IrVector, source: Operand, _temps: &mut TempAllocator) {
        out.push(IrEntry::stk_store(self.size, self.offset, source));
    }

    fn label(&self) -> Option<&str> {
        None
    }

    fn address(&self) -> Option<Operand> {
        Some(Operand::StackOffset(self.offset))
    }
}

/// The return-value slot; the frame's epilogue moves it into the
/// convention register.
struct ReturnAccess {
    temp: Operand,
}

impl Access for ReturnAccess {
    fn load(&self, _out: &mut IrVector, _temps: &mut TempAllocator) -> Operand {
        self.temp.clone()
    }

    fn store(&self, out: &mut IrVector, source: Operand, _temps: &mut TempAllocator) {
        let Operand::Temp { size, .. } = self.temp else {
            crate::internal_error!("return access without a temp operand");
        };
        out.push(IrEntry::mov(size, self.temp.clone(), source));
    }

    fn label(&self) -> Option<&str> {
        None
    }

    fn address(&self) -> Option<Operand> {
        None
    }
}

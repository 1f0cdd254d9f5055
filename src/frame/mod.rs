//! Abstract frames used in the translate phase.
//!
//! A [`Frame`] owns one function's calling convention: where incoming
//! arguments land, where the return value goes, and how locals are placed.
//! An [`Access`] is one storage location with load/store operations. The
//! translator only ever talks to these traits; the target lives behind
//! them.

pub mod x86_64;

use crate::ir::{IrEntry, IrVector, Operand, TempAllocator};
use crate::types::AllocKind;

use std::rc::Rc;

/// An abstract storage location.
pub trait Access {
    /// Produces the operand holding the value, emitting loads as needed.
    fn load(&self, out: &mut IrVector, temps: &mut TempAllocator) -> Operand;
    /// Stores `source` into the location.
    fn store(&self, out: &mut IrVector, source: Operand, temps: &mut TempAllocator);
    /// The linker-visible label, for globals and functions.
    fn label(&self) -> Option<&str>;
    /// The address of the storage; `None` for register-allocated values.
    fn address(&self) -> Option<Operand>;
}

/// Per-function storage allocator, abstracting the target ABI.
pub trait Frame {
    fn name(&self) -> &str;
    /// Stack bytes the function's escaping and memory-shaped locals need;
    /// recorded on the TEXT fragment for the register allocator.
    fn frame_size(&self) -> u64;
    /// Opens a nested scope; sibling scopes may reuse stack space.
    fn scope_start(&mut self);
    /// Closes the scope opened last, wrapping its body.
    fn scope_end(&mut self, body: IrVector, temps: &mut TempAllocator) -> IrVector;
    /// Storage for the next incoming parameter, in declaration order.
    fn alloc_arg(
        &mut self,
        size: u64,
        align: u64,
        kind: AllocKind,
        escapes: bool,
        temps: &mut TempAllocator,
    ) -> Rc<dyn Access>;
    /// Storage for the return value; the caller handles void itself.
    fn alloc_ret_val(&mut self, size: u64, kind: AllocKind, temps: &mut TempAllocator)
        -> Rc<dyn Access>;
    /// Storage for a local binding.
    fn alloc_local(
        &mut self,
        size: u64,
        align: u64,
        kind: AllocKind,
        escapes: bool,
        temps: &mut TempAllocator,
    ) -> Rc<dyn Access>;
    /// Moves evaluated call arguments into place per the convention.
    fn pass_arguments(
        &mut self,
        out: &mut IrVector,
        args: &[(Operand, u64, AllocKind)],
        temps: &mut TempAllocator,
    );
    /// Copies a call's return value out of its convention slot.
    fn fetch_return(
        &mut self,
        out: &mut IrVector,
        size: u64,
        align: u64,
        kind: AllocKind,
        temps: &mut TempAllocator,
    ) -> Operand;
    /// Wraps a finished body with prologue and epilogue.
    fn generate_entry_exit(&mut self, body: IrVector, temps: &mut TempAllocator) -> IrVector;
}

/// Constructor the translator is parameterized over; the argument is the
/// function's mangled label.
pub type FrameCtor = fn(String) -> Box<dyn Frame>;

/// A named global variable: loads and stores go through its label.
pub struct GlobalAccess {
    label: String,
    size: u64,
    align: u64,
    kind: AllocKind,
}

impl GlobalAccess {
    pub fn new(label: String, size: u64, align: u64, kind: AllocKind) -> Rc<dyn Access> {
        Rc::new(Self {
            label,
            size,
            align,
            kind,
        })
    }
}

impl Access for GlobalAccess {
    fn load(&self, out: &mut IrVector, temps: &mut TempAllocator) -> Operand {
        let dest = Operand::temp(temps.allocate(), self.size, self.align, self.kind);
        out.push(IrEntry::mem_load(
            self.size,
            dest.clone(),
            Operand::name(self.label.clone()),
        ));
        dest
    }

    fn store(&self, out: &mut IrVector, source: Operand, _temps: &mut TempAllocator) {
        out.push(IrEntry::mem_store(
            self.size,
            Operand::name(self.label.clone()),
            source,
        ));
    }

    fn label(&self) -> Option<&str> {
        Some(&self.label)
    }

    fn address(&self) -> Option<Operand> {
        Some(Operand::name(self.label.clone()))
    }
}

/// A function: its value is its label.
pub struct FunctionAccess {
    label: String,
}

impl FunctionAccess {
    pub fn new(label: String) -> Rc<dyn Access> {
        Rc::new(Self { label })
    }
}

impl Access for FunctionAccess {
    fn load(&self, _out: &mut IrVector, _temps: &mut TempAllocator) -> Operand {
        Operand::name(self.label.clone())
    }

    fn store(&self, _out: &mut IrVector, _source: Operand, _temps: &mut TempAllocator) {
        crate::internal_error!("attempted to store into a function");
    }

    fn label(&self) -> Option<&str> {
        Some(&self.label)
    }

    fn address(&self) -> Option<Operand> {
        Some(Operand::name(self.label.clone()))
    }
}

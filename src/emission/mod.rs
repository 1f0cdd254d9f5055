//! Renders fragments as assembler text.
//!
//! Data fragments become GNU-as directives, one per `CONST` entry, sized by
//! the entry's `opSize`. Text fragments emit the linearized IR one entry
//! per line; turning that into machine instructions is the external
//! backend's job.

use crate::ir::{Fragment, IrEntry, IrOp, Operand};

use std::fmt;

/// One output file: every fragment of a translated module.
pub struct AssemblyFile<'a>(pub &'a [Fragment]);

impl fmt::Display for AssemblyFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for fragment in self.0 {
            write!(f, "{fragment}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bss { label, size, align } => {
                writeln!(f, "\t.bss")?;
                writeln!(f, "\t.globl {label}")?;
                writeln!(f, "\t.align {align}")?;
                writeln!(f, "{label}:")?;
                writeln!(f, "\t.zero {size}")
            }
            Self::Rodata { label, align, ir } => {
                writeln!(f, "\t.section .rodata")?;
                writeln!(f, "\t.align {align}")?;
                writeln!(f, "{label}:")?;
                write_data(f, ir)
            }
            Self::Data { label, align, ir } => {
                writeln!(f, "\t.data")?;
                writeln!(f, "\t.globl {label}")?;
                writeln!(f, "\t.align {align}")?;
                writeln!(f, "{label}:")?;
                write_data(f, ir)
            }
            Self::Text {
                label,
                frame_size,
                ir,
            } => {
                writeln!(f, "\t.text")?;
                writeln!(f, "\t.globl {label}")?;
                writeln!(f, "\t.set {label}.frame, {frame_size}")?;
                writeln!(f, "{label}:")?;
                for entry in ir {
                    match entry.op {
                        IrOp::Label => {
                            writeln!(f, "{}:", entry.arg1.as_ref().expect("labels are named"))?;
                        }
                        IrOp::Asm => {
                            writeln!(f, "\t{}", entry.arg1.as_ref().expect("asm carries text"))?;
                        }
                        _ => writeln!(f, "\t{entry}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn write_data(f: &mut fmt::Formatter<'_>, ir: &[IrEntry]) -> fmt::Result {
    for entry in ir {
        let value = entry.arg1.as_ref().expect("data entries carry a value");
        match value {
            Operand::String(bytes) => {
                for byte in bytes {
                    writeln!(f, "\t.byte {byte}")?;
                }
            }
            Operand::WString(points) => {
                for point in points {
                    writeln!(f, "\t.long {point}")?;
                }
            }
            Operand::Name(name) => writeln!(f, "\t.quad {name}")?,
            Operand::Constant { bits, .. } => {
                let directive = match entry.op_size {
                    1 => ".byte",
                    2 => ".value",
                    4 => ".long",
                    _ => ".quad",
                };
                writeln!(f, "\t{directive} {bits}")?;
            }
            other => crate::internal_error!("{other:?} in a data fragment"),
        }
    }
    Ok(())
}

impl fmt::Display for IrEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", mnemonic(self.op))?;
        if self.op_size != 0 {
            write!(f, ".{}", self.op_size)?;
        }
        let mut first = true;
        for operand in [&self.dest, &self.arg1, &self.arg2].into_iter().flatten() {
            if first {
                write!(f, " {operand}")?;
                first = false;
            } else {
                write!(f, ", {operand}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temp { id, .. } => write!(f, "t{id}"),
            Self::Reg(n) => write!(f, "r{n}"),
            Self::Constant { bits, .. } => write!(f, "{bits}"),
            Self::Name(name) => write!(f, "{name}"),
            Self::Asm(text) => write!(f, "{text}"),
            Self::StackOffset(offset) => write!(f, "stack[{offset}]"),
            Self::String(bytes) => {
                write!(f, "\"")?;
                for byte in bytes {
                    for c in std::ascii::escape_default(*byte) {
                        write!(f, "{}", c as char)?;
                    }
                }
                write!(f, "\"")
            }
            Self::WString(points) => {
                write!(f, "L\"")?;
                for point in points {
                    match char::from_u32(*point) {
                        Some(c) if !c.is_control() => write!(f, "{c}")?,
                        _ => write!(f, "\\u{point:08x}")?,
                    }
                }
                write!(f, "\"")
            }
        }
    }
}

fn mnemonic(op: IrOp) -> &'static str {
    use IrOp as O;
    match op {
        O::Const => "CONST",
        O::Asm => "ASM",
        O::Label => "LABEL",
        O::Move => "MOVE",
        O::MemStore => "MEM_STORE",
        O::MemLoad => "MEM_LOAD",
        O::StkStore => "STK_STORE",
        O::StkLoad => "STK_LOAD",
        O::OffsetStore => "OFFSET_STORE",
        O::OffsetLoad => "OFFSET_LOAD",
        O::Add => "ADD",
        O::Sub => "SUB",
        O::Smul => "SMUL",
        O::Umul => "UMUL",
        O::Sdiv => "SDIV",
        O::Udiv => "UDIV",
        O::Smod => "SMOD",
        O::Umod => "UMOD",
        O::FpAdd => "FP_ADD",
        O::FpSub => "FP_SUB",
        O::FpMul => "FP_MUL",
        O::FpDiv => "FP_DIV",
        O::And => "AND",
        O::Or => "OR",
        O::Xor => "XOR",
        O::Not => "NOT",
        O::Sll => "SLL",
        O::Slr => "SLR",
        O::Sar => "SAR",
        O::LNot => "LNOT",
        O::SxShort => "SX_SHORT",
        O::SxInt => "SX_INT",
        O::SxLong => "SX_LONG",
        O::ZxShort => "ZX_SHORT",
        O::ZxInt => "ZX_INT",
        O::ZxLong => "ZX_LONG",
        O::TruncByte => "TRUNC_BYTE",
        O::TruncShort => "TRUNC_SHORT",
        O::TruncInt => "TRUNC_INT",
        O::SToFloat => "S_TO_FLOAT",
        O::SToDouble => "S_TO_DOUBLE",
        O::UToFloat => "U_TO_FLOAT",
        O::UToDouble => "U_TO_DOUBLE",
        O::FToByte => "F_TO_BYTE",
        O::FToShort => "F_TO_SHORT",
        O::FToInt => "F_TO_INT",
        O::FToLong => "F_TO_LONG",
        O::FToFloat => "F_TO_FLOAT",
        O::FToDouble => "F_TO_DOUBLE",
        O::E => "E",
        O::Ne => "NE",
        O::L => "L",
        O::Le => "LE",
        O::G => "G",
        O::Ge => "GE",
        O::A => "A",
        O::Ae => "AE",
        O::B => "B",
        O::Be => "BE",
        O::FpE => "FP_E",
        O::FpNe => "FP_NE",
        O::FpL => "FP_L",
        O::FpLe => "FP_LE",
        O::FpG => "FP_G",
        O::FpGe => "FP_GE",
        O::Jump => "JUMP",
        O::Je => "JE",
        O::Jne => "JNE",
        O::Jl => "JL",
        O::Jle => "JLE",
        O::Jg => "JG",
        O::Jge => "JGE",
        O::Ja => "JA",
        O::Jae => "JAE",
        O::Jb => "JB",
        O::Jbe => "JBE",
        O::FpJe => "FP_JE",
        O::FpJne => "FP_JNE",
        O::FpJl => "FP_JL",
        O::FpJle => "FP_JLE",
        O::FpJg => "FP_JG",
        O::FpJge => "FP_JGE",
        O::Call => "CALL",
        O::Return => "RETURN",
    }
}

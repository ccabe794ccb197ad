//! x86_64 context switching (System V AMD64 ABI)
//!
//! Saved: rsp, resume address, rbx, rbp, r12-r15, MXCSR and the x87
//! control word. Everything else is caller-saved and already spilled by
//! the compiler around the `switch` call.

use super::{ContextSwitch, EntryFn};
use std::arch::naked_asm;

/// Default MXCSR: all exceptions masked, round to nearest
const MXCSR_DEFAULT: u32 = 0x1F80;

/// Default x87 control word: all exceptions masked, 64-bit precision
const FPU_CW_DEFAULT: u16 = 0x037F;

/// Callee-saved register file; field offsets are used by the assembly
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedRegs {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
    pub mxcsr: u32, // 0x40
    pub fpu_cw: u16, // 0x44
    _pad: u16,
}

/// x86_64 backend
pub struct X86_64;

impl ContextSwitch for X86_64 {
    type Regs = SavedRegs;

    #[inline]
    unsafe fn init(regs: &mut SavedRegs, stack_top: *mut u8, entry: EntryFn, arg: usize) {
        // The trampoline is entered by `jmp` with rsp 16-byte aligned, so
        // its `call` leaves the entry function with the ABI's rsp % 16 == 8.
        let aligned_sp = (stack_top as usize) & !0xF;

        regs.rsp = aligned_sp as u64;
        regs.rip = entry_trampoline as *const () as usize as u64;
        regs.rbx = 0;
        regs.rbp = 0;
        regs.r12 = entry as *const () as usize as u64;
        regs.r13 = arg as u64;
        regs.r14 = 0;
        regs.r15 = 0;
        regs.mxcsr = MXCSR_DEFAULT;
        regs.fpu_cw = FPU_CW_DEFAULT;
    }

    #[inline]
    unsafe fn switch(old: *mut SavedRegs, new: *const SavedRegs) {
        switch_context(old, new);
    }
}

/// First code a fresh context runs: `entry(arg)`, which never returns
#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "ud2",
    );
}

/// Save callee-saved state into `old` (rdi) and resume `new` (rsi)
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "stmxcsr [rdi + 0x40]",
        "fnstcw [rdi + 0x44]",
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "ldmxcsr [rsi + 0x40]",
        "fldcw [rsi + 0x44]",
        "jmp rax",
        // A saved context resumes here and returns to its switch caller
        "2:",
        "ret",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_layout_matches_assembly() {
        assert_eq!(offset_of!(SavedRegs, rsp), 0x00);
        assert_eq!(offset_of!(SavedRegs, rip), 0x08);
        assert_eq!(offset_of!(SavedRegs, r15), 0x38);
        assert_eq!(offset_of!(SavedRegs, mxcsr), 0x40);
        assert_eq!(offset_of!(SavedRegs, fpu_cw), 0x44);
    }

    extern "C" fn never(_: usize) -> ! {
        std::process::abort()
    }

    #[test]
    fn test_init_aligns_stack() {
        let mut regs = SavedRegs::default();
        let fake_top = 0x1000_0007usize as *mut u8;
        unsafe { X86_64::init(&mut regs, fake_top, never, 99) };
        assert_eq!(regs.rsp % 16, 0);
        assert_eq!(regs.r13, 99);
        assert_eq!(regs.mxcsr, MXCSR_DEFAULT);
    }
}

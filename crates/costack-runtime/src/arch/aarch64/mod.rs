//! aarch64 context switching (AAPCS64)
//!
//! Saved: x19-x28, frame pointer, link register, sp and the low halves
//! of v8-v15 (d8-d15). The link register doubles as the resume address.

use super::{ContextSwitch, EntryFn};
use std::arch::naked_asm;

/// Callee-saved register file; field offsets are used by the assembly
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedRegs {
    /// x19..=x28 at 0x00..0x50
    pub x: [u64; 10],
    pub fp: u64, // 0x50 (x29)
    pub lr: u64, // 0x58 (x30)
    pub sp: u64, // 0x60
    /// d8..=d15 at 0x68..0xA8
    pub d: [u64; 8],
}

/// aarch64 backend
pub struct Aarch64;

impl ContextSwitch for Aarch64 {
    type Regs = SavedRegs;

    #[inline]
    unsafe fn init(regs: &mut SavedRegs, stack_top: *mut u8, entry: EntryFn, arg: usize) {
        *regs = SavedRegs::default();
        regs.sp = ((stack_top as usize) & !0xF) as u64;
        regs.lr = entry_trampoline as *const () as usize as u64;
        regs.fp = 0;
        regs.x[0] = entry as *const () as usize as u64; // x19
        regs.x[1] = arg as u64; // x20
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
        "mov x0, x20",
        "blr x19",
        "brk #0x1",
    );
}

/// Save callee-saved state into `old` (x0) and resume `new` (x1)
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        "stp x19, x20, [x0, #0x00]",
        "stp x21, x22, [x0, #0x10]",
        "stp x23, x24, [x0, #0x20]",
        "stp x25, x26, [x0, #0x30]",
        "stp x27, x28, [x0, #0x40]",
        "stp x29, x30, [x0, #0x50]",
        "mov x9, sp",
        "str x9, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        "ldp x19, x20, [x1, #0x00]",
        "ldp x21, x22, [x1, #0x10]",
        "ldp x23, x24, [x1, #0x20]",
        "ldp x25, x26, [x1, #0x30]",
        "ldp x27, x28, [x1, #0x40]",
        "ldp x29, x30, [x1, #0x50]",
        "ldr x9, [x1, #0x60]",
        "mov sp, x9",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}

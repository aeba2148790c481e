//! aarch64 context switching (AAPCS64)

use std::arch::naked_asm;

use super::EntryFn;

/// Callee-saved state of a suspended context
///
/// `gp` holds x19..=x30 (x29 = frame pointer, x30 = resume address),
/// `fp` holds the low halves of v8..=v15.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    pub gp: [u64; 12], // 0x00
    pub sp: u64,       // 0x60
    pub fp: [u64; 8],  // 0x68
}

/// Prime `regs` so that switching to it runs `entry(entry_arg)` on the
/// stack ending at `stack_top`.
///
/// # Safety
///
/// `stack_top` must be the exclusive upper end of a writable stack that
/// outlives every switch into `regs`.
#[inline]
pub unsafe fn init_context(regs: *mut SavedRegs, stack_top: *mut u8, entry: EntryFn, entry_arg: usize) {
    let regs = &mut *regs;
    *regs = SavedRegs::default();
    regs.sp = ((stack_top as usize) & !0xF) as u64;
    regs.gp[0] = entry as usize as u64; // x19
    regs.gp[1] = entry_arg as u64; // x20
    regs.gp[11] = fiber_trampoline as usize as u64; // x30
}

#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "bl {exit}",
        "brk #0",
        exit = sym crate::fiber::fiber_exit,
    );
}

/// Save callee-saved registers to `old` and resume `new`.
///
/// # Safety
///
/// `new` must have been filled by `init_context` or a previous save, and the
/// stack it refers to must still be alive.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save into old (x0)
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
        // Load from new (x1)
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

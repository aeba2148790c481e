//! x86_64 context switching (System V AMD64)

use std::arch::naked_asm;

use super::EntryFn;

/// Callee-saved state of a suspended context
///
/// Offsets are hard-coded in `switch_context`; keep the layout in sync.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    pub rsp: u64,   // 0x00
    pub rip: u64,   // 0x08
    pub rbx: u64,   // 0x10
    pub rbp: u64,   // 0x18
    pub r12: u64,   // 0x20
    pub r13: u64,   // 0x28
    pub r14: u64,   // 0x30
    pub r15: u64,   // 0x38
    pub mxcsr: u32, // 0x40
    pub fpucw: u16, // 0x44
    _pad: u16,
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
    // 16-byte aligned; the trampoline's `call` leaves the entry function
    // with the usual rsp % 16 == 8 at its first instruction
    let sp = (stack_top as usize) & !0xF;

    let regs = &mut *regs;
    *regs = SavedRegs::default();
    regs.rsp = sp as u64;
    regs.rip = fiber_trampoline as usize as u64;
    regs.r12 = entry as usize as u64;
    regs.r13 = entry_arg as u64;
    regs.mxcsr = 0x1F80;
    regs.fpucw = 0x037F;
}

#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "call {exit}",
        "ud2",
        exit = sym crate::fiber::fiber_exit,
    );
}

/// Save callee-saved registers to `old` and resume `new`.
///
/// Returns when some other context switches back into `old`.
///
/// # Safety
///
/// `new` must have been filled by `init_context` or a previous save, and the
/// stack it refers to must still be alive.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save into old (rdi)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "stmxcsr [rdi + 0x40]",
        "fnstcw [rdi + 0x44]",
        // Load from new (rsi)
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
        // Resumed here when someone switches back to old
        "1:",
        "ret",
    );
}

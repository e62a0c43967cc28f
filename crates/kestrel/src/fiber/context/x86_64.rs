//! x86-64 callee-save context switch, mirroring `fiber_context_swap`'s
//! `(from_stack_pointer: *mut *mut u8, to_stack_pointer: *mut u8)` signature
//! from the original implementation's `fiber.h`.
//!
//! Only `rbx, rbp, r12-r15` are callee-saved under the System V AMD64 ABI;
//! everything else is already the caller's responsibility to spill, exactly
//! as for any ordinary call through [`switch`].

use std::arch::{asm, naked_asm};

/// Save the current fiber's callee-saved registers onto its own stack,
/// write the resulting stack pointer to `*from_sp`, then load `to_sp` and
/// restore its registers. Returns to the caller only when some other fiber
/// switches back into `*from_sp`.
///
/// # Safety
/// `to_sp` must be either a pointer previously written into a fiber's saved
/// stack-pointer slot by an earlier `switch`, or the priming value produced
/// by [`prepare`]. `from_sp` must point at storage this fiber alone owns.
#[inline(never)]
pub unsafe fn switch(from_sp: *mut *mut u8, to_sp: *mut u8) {
    asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
        in("rdi") from_sp,
        in("rsi") to_sp,
        out("rax") _,
        out("rcx") _,
        out("rdx") _,
        out("r8") _,
        out("r9") _,
        out("r10") _,
        out("r11") _,
        clobber_abi("sysv64"),
    );
}

/// The landing pad the very first [`switch`] into a freshly primed stack
/// `ret`s into. `rbx` carries the fiber's `user_data` pointer across the
/// switch (restored by `switch`'s `pop rbx` just before its own `ret`);
/// this stub moves it into `rdi` so it lands exactly where an
/// `extern "C" fn(*mut u8)` expects its argument, then tail-jumps into the
/// real entrypoint, which never returns.
#[unsafe(naked)]
unsafe extern "C" fn trampoline_stub() -> ! {
    naked_asm!("mov rdi, rbx", "jmp {real}", real = sym super::real_trampoline);
}

/// Prime a freshly mapped stack so that the first [`switch`] into it enters
/// `trampoline(data)`.
///
/// Layout built top-down (high to low address), matching the six `pop`s
/// `switch` executes before its own `ret`:
/// `[trampoline_stub addr] [r15=0] [r14=0] [r13=0] [r12=0] [rbx=data] [rbp=0]`.
pub fn prepare(stack_top: *mut u8, data: *mut u8) -> *mut u8 {
    // SAFETY: `stack_top` is the one-past-the-end address of a stack this
    // fiber exclusively owns and at least large enough for the few words
    // written below (enforced by `DEFAULT_FIBER_STACK_SIZE`).
    unsafe {
        let mut sp = (stack_top as usize) & !0xF;

        sp -= 8;
        *(sp as *mut usize) = trampoline_stub as usize;
        sp -= 8;
        *(sp as *mut usize) = 0; // r15
        sp -= 8;
        *(sp as *mut usize) = 0; // r14
        sp -= 8;
        *(sp as *mut usize) = 0; // r13
        sp -= 8;
        *(sp as *mut usize) = 0; // r12
        sp -= 8;
        *(sp as *mut usize) = data as usize; // rbx
        sp -= 8;
        *(sp as *mut usize) = 0; // rbp

        sp as *mut u8
    }
}

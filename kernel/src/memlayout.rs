// Physical memory layout

// qemu -machine virt is set up like this,
// based on qemu's hw/riscv/virt.c:
//
// 00001000 -- boot ROM, provided by qemu
// 02000000 -- CLINT
// 0C000000 -- PLIC
// 10000000 -- uart0
// 10001000 -- virtio disk
// 80000000 -- boot ROM jumps here in machine mode
//             -kernel loads the kernel here
// unused RAM after 80000000.

// the kernel uses physical memory thus:
// 80000000 -- entry.S, then kernel text and data
// end -- start of kernel page allocation area
// PHYSTOP -- end RAM used by the kernel

#![allow(non_snake_case)]

use crate::param::NKSTACK_PAGES;
use crate::riscv::{MAXVA, PGSIZE};

pub const UART0: usize = 0x10000000;
pub const UART0_IRQ: usize = 10;

pub const VIRTIO0: usize = 0x10001000;
pub const VIRTIO0_IRQ: usize = 1;

// Core Local Interrupter (CLINT)
pub const CLINT: usize = 0x2000000;
pub const fn clint_mtimecmp(hartid: usize) -> usize {
    CLINT + 0x4000 + 8 * hartid
}
pub use clint_mtimecmp as CLINT_MTIMECMP;
pub const CLINT_MTIME: usize = CLINT + 0xBFF8; // Cycles since boot

// qemu puts platform-level interrupt controller (PLIC) here.
pub const PLIC: usize = 0x0C00_0000;
pub const fn PLIC_SENABLE(hart: usize) -> usize {
    PLIC + 0x2080 + hart * 0x100
}
pub const fn PLIC_SPRIORITY(hart: usize) -> usize {
    PLIC + 0x20_1000 + hart * 0x2000
}
pub const fn PLIC_SCLAIM(hart: usize) -> usize {
    PLIC + 0x20_1004 + hart * 0x2000
}

// the kernel expects there to be RAM for use by the kernel and user pages from
// physical address 0x80000000 to PHYSTOP.
pub const KERNBASE: usize = 0x8000_0000;
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;

// map the trampoline page to the highest address, in both user and kernel
// space.
pub const TRAMPOLINE: usize = MAXVA - PGSIZE;

// map each process's kernel stack at a distinct, fixed virtual address below
// the trampoline, followed by a no-access guard page.
pub const fn kstack(proc_index: usize) -> usize {
    TRAMPOLINE - (proc_index + 1) * (NKSTACK_PAGES + 1) * PGSIZE
}

// user memory layout.
// Address zero first:
//   text
//   original data and bss
//   fixed-size stack
//   expandable heap
//   ...
//   TRAPFRAME (p->trapframe, used by the trampoline)
//   TRAMPOLINE (the same page as the kernel's trampoline)
pub const TRAPFRAME: usize = TRAMPOLINE - PGSIZE;

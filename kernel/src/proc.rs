//! Process table, lifecycle, and the four-discipline scheduler.
//!
//! All scheduling state (`state`, `chan`, `pid`, `parent`, `killed`,
//! `sched_queue`, the BJF ratios, `priority`, `waiting_time`,
//! `executed_cycle`, `ctime`, `arrival_time`, `name`) lives in a single
//! array behind one lock, `PROCS.table`. Everything a process owns
//! exclusively -- its page table, kernel stack, trapframe, open files, and
//! cwd -- lives unlocked next to it in a [`Proc`], reachable without the
//! table lock once you already hold a reference to the right slot.

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::KernelError;
use crate::file::File;
use crate::fs::Inode;
use crate::log;
use crate::memlayout::{kstack, TRAPFRAME};
use crate::param::{AGING_THRESHOLD, DEFAULT_PRIORITY, NCPU, NKSTACK_PAGES, NOFILE, NPROC};
use crate::println;
use crate::riscv::interrupts;
use crate::riscv::registers::tp;
use crate::riscv::PGSIZE;
use crate::spinlock::{SpinLock, SpinLockGuard};
use crate::swtch;
use crate::trap::{self, TICKS_LOCK};
use crate::vm::{self, Uvm, PA, VA};

/// Process ID, unique among currently-live processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub usize);

impl Pid {
    fn alloc() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        Pid(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a sleeping process is waiting on. `wakeup` compares this by value,
/// so any value unique to the waited-on resource works as a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Waiting on another process's table slot (fork/exit/wait rendezvous).
    Proc(usize),
    /// Waiting for the next timer tick.
    Ticks,
    /// Waiting on the transaction log's commit rendezvous.
    Log,
    /// Waiting on a block-cache buffer becoming free.
    Buf(usize),
    /// Waiting on a sleep-lock's generic condition.
    Lock(usize),
    /// Waiting for space in the UART transmit ring.
    Uart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// Which of the four disciplines a process's runnable time is charged to.
/// Numeric order matters: aging promotes a starved process to the next
/// lower value, and `ROUND_ROBIN` is the floor it can't be promoted past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(usize)]
pub enum SchedQueue {
    RoundRobin = 1,
    Priority = 2,
    Bjf = 3,
    Fcfs = 4,
}

impl SchedQueue {
    fn promote(self) -> Self {
        match self {
            SchedQueue::Fcfs => SchedQueue::Bjf,
            SchedQueue::Bjf => SchedQueue::Priority,
            SchedQueue::Priority => SchedQueue::RoundRobin,
            SchedQueue::RoundRobin => SchedQueue::RoundRobin,
        }
    }
}

/// Scheduling fields for one table slot. Protected by `PROCS.table`;
/// `pid == Pid(0)` marks a slot `Unused` and is the sentinel every
/// selector skips.
#[derive(Debug, Clone, Copy)]
pub struct ProcInner {
    pub state: ProcState,
    pub channel: Option<Channel>,
    pub killed: bool,
    pub pid: Pid,
    pub parent: Option<usize>,
    pub xstate: i32,
    pub name: [u8; 16],
    pub name_len: u8,
    pub ctime: usize,
    pub arrival_time: usize,
    pub executed_cycle: usize,
    pub waiting_time: usize,
    pub priority: usize,
    pub sched_queue: SchedQueue,
    pub priority_ratio: usize,
    pub arrival_time_ratio: usize,
    pub executed_cycle_ratio: usize,
}

impl ProcInner {
    const fn new() -> Self {
        Self {
            state: ProcState::Unused,
            channel: None,
            killed: false,
            pid: Pid(0),
            parent: None,
            xstate: 0,
            name: [0; 16],
            name_len: 0,
            ctime: 0,
            arrival_time: 0,
            executed_cycle: 0,
            waiting_time: 0,
            priority: DEFAULT_PRIORITY,
            sched_queue: SchedQueue::Priority,
            priority_ratio: 1,
            arrival_time_ratio: 1,
            executed_cycle_ratio: 1,
        }
    }

    pub fn set_name(&mut self, name: &[u8]) {
        let len = name.len().min(self.name.len());
        self.name[..len].copy_from_slice(&name[..len]);
        self.name[len..].fill(0);
        self.name_len = len as u8;
    }
}

/// Everything a process owns exclusively. Never touched without first
/// establishing (by table-lock protocol, or by being that process) that no
/// one else can be looking at it.
pub struct ProcData {
    pub kstack: VA,
    pub size: usize,
    pub pagetable: Option<Uvm>,
    pub trapframe: Option<Box<TrapFrame>>,
    pub context: Context,
    pub open_files: [Option<File>; NOFILE],
    pub cwd: Inode,
}

impl ProcData {
    const fn new(idx: usize) -> Self {
        Self {
            kstack: VA(kstack(idx)),
            size: 0,
            pagetable: None,
            trapframe: None,
            context: Context::new(),
            open_files: [const { None }; NOFILE],
            cwd: Inode::new(0, 0, 0),
        }
    }
}

/// A table slot. `'static` references to these are handed out by
/// [`Cpus::current_proc`]; the slot's index is the key into `PROCS.table`
/// for everything lock-protected.
pub struct Proc {
    idx: usize,
    data: UnsafeCell<ProcData>,
}

// Safety: `data` is reached either by the owning process itself, or by
// another process that first confirmed (under `PROCS.table`) that this
// slot isn't running -- never concurrently.
unsafe impl Sync for Proc {}

impl Proc {
    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn pid(&self) -> Pid {
        PROCS.table.lock()[self.idx].pid
    }

    pub fn is_killed(&self) -> bool {
        PROCS.table.lock()[self.idx].killed
    }

    pub fn name(&self) -> ([u8; 16], u8) {
        let slot = &PROCS.table.lock()[self.idx];
        (slot.name, slot.name_len)
    }

    pub fn data(&self) -> &ProcData {
        unsafe { &*self.data.get() }
    }

    /// # Safety
    /// The caller must have exclusive access to this slot's owned
    /// resources: either it is the process calling this on itself, or it
    /// has confirmed under `PROCS.table` that the slot is not `Running`
    /// and not concurrently accessed by anyone else.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data_mut(&self) -> &mut ProcData {
        unsafe { &mut *self.data.get() }
    }
}

/// The process table: `NPROC` lock-protected scheduling records and their
/// matching unlocked, owned-resource slots.
pub struct Procs {
    table: SpinLock<[ProcInner; NPROC]>,
    procs: [Proc; NPROC],
}

unsafe impl Sync for Procs {}

impl Procs {
    const fn new() -> Self {
        let table = {
            let mut i = 0;
            let mut array = [ProcInner::new(); NPROC];
            while i < NPROC {
                array[i] = ProcInner::new();
                i += 1;
            }
            array
        };

        let procs = {
            let mut array: [MaybeUninit<Proc>; NPROC] =
                unsafe { MaybeUninit::uninit().assume_init() };
            let mut i = 0;
            while i < NPROC {
                array[i] = MaybeUninit::new(Proc {
                    idx: i,
                    data: UnsafeCell::new(ProcData::new(i)),
                });
                i += 1;
            }
            unsafe { core::mem::transmute::<_, [Proc; NPROC]>(array) }
        };

        Self {
            table: SpinLock::new(table, "ptable"),
            procs,
        }
    }

    /// Maps every process's kernel stack into the kernel page table. Called
    /// once from `Kvm::make` while building the kernel page table at boot.
    ///
    /// # Safety
    /// Must run before any hart enables the MMU.
    pub unsafe fn map_stacks(&self) {
        for i in 0..NPROC {
            let page: Box<MaybeUninit<[u8; NKSTACK_PAGES * PGSIZE]>> =
                Box::try_new_zeroed().expect("map_stacks: alloc");
            let pa = Box::into_raw(unsafe { page.assume_init() }) as usize;

            let kvm = unsafe { vm::KVM.get_mut().expect("kvm to be init") };
            kvm.map(
                VA(kstack(i)),
                PA(pa),
                NKSTACK_PAGES * PGSIZE,
                crate::riscv::PTE_R | crate::riscv::PTE_W,
            );
        }
    }
}

pub static PROCS: Procs = Procs::new();

/// Saved callee-saved registers for a kernel context switch. Laid out to
/// match `swtch.rs`'s hand-written assembly exactly: `ra`, `sp`, then
/// `s0`..`s11`, nothing else.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

impl Context {
    pub const fn new() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

// Per-process data for the trap handling code in trampoline.S. Sits in a
// page by itself just under the trampoline page in the user page table,
// not mapped in the kernel page table. uservec in trampoline.S saves user
// registers here, then loads kernel_sp/kernel_hartid/kernel_satp/kernel_trap
// and jumps to kernel_trap. usertrapret() and userret set it back up for
// the return to user space.
#[repr(C, align(4096))]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    /*   0 */ pub kernel_satp: usize,
    /*   8 */ pub kernel_sp: usize,
    /*  16 */ pub kernel_trap: usize,
    /*  24 */ pub epc: usize,
    /*  32 */ pub kernel_hartid: usize,
    /*  40 */ pub ra: usize,
    /*  48 */ pub sp: usize,
    /*  56 */ pub gp: usize,
    /*  64 */ pub tp: usize,
    /*  72 */ pub t0: usize,
    /*  80 */ pub t1: usize,
    /*  88 */ pub t2: usize,
    /*  96 */ pub s0: usize,
    /* 104 */ pub s1: usize,
    /* 112 */ pub a0: usize,
    /* 120 */ pub a1: usize,
    /* 128 */ pub a2: usize,
    /* 136 */ pub a3: usize,
    /* 144 */ pub a4: usize,
    /* 152 */ pub a5: usize,
    /* 160 */ pub a6: usize,
    /* 168 */ pub a7: usize,
    /* 176 */ pub s2: usize,
    /* 184 */ pub s3: usize,
    /* 192 */ pub s4: usize,
    /* 200 */ pub s5: usize,
    /* 208 */ pub s6: usize,
    /* 216 */ pub s7: usize,
    /* 224 */ pub s8: usize,
    /* 232 */ pub s9: usize,
    /* 240 */ pub s10: usize,
    /* 248 */ pub s11: usize,
    /* 256 */ pub t3: usize,
    /* 264 */ pub t4: usize,
    /* 272 */ pub t5: usize,
    /* 280 */ pub t6: usize,
}

pub struct Cpu {
    proc_idx: Option<usize>,
    context: Context,
    num_off: isize,
    interrupt_enabled: bool,
}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc_idx: None,
            context: Context::new(),
            num_off: 0,
            interrupt_enabled: false,
        }
    }

    fn push_off(&mut self, old_state: bool) -> InterruptLock {
        if self.num_off == 0 {
            self.interrupt_enabled = old_state;
        }
        self.num_off += 1;
        InterruptLock {}
    }

    fn pop_off(&mut self) {
        assert!(!interrupts::get(), "cpu unlock - interruptible");
        assert!(self.num_off >= 1, "cpu unlock");

        self.num_off -= 1;
        if self.num_off == 0 && self.interrupt_enabled {
            interrupts::enable();
        }
    }
}

/// RAII interrupt-disable. Disabling nests (tracked by `Cpu::num_off`);
/// interrupts come back on only when the outermost guard drops, and only
/// if they were on when it was created.
pub struct InterruptLock {}

impl Drop for InterruptLock {
    fn drop(&mut self) {
        unsafe { (*Cpus::mycpu()).pop_off() }
    }
}

pub struct Cpus([UnsafeCell<Cpu>; NCPU]);

unsafe impl Sync for Cpus {}

impl Cpus {
    const fn new() -> Self {
        let mut array: [MaybeUninit<UnsafeCell<Cpu>>; NCPU] =
            unsafe { MaybeUninit::uninit().assume_init() };
        let mut i = 0;
        while i < NCPU {
            array[i] = MaybeUninit::new(UnsafeCell::new(Cpu::new()));
            i += 1;
        }
        Self(unsafe { core::mem::transmute::<_, [UnsafeCell<Cpu>; NCPU]>(array) })
    }

    /// # Safety
    /// Must be called with interrupts disabled, or the hart id read back
    /// may belong to a different hart than the one that runs next.
    #[inline]
    pub unsafe fn get_id() -> usize {
        tp::read()
    }

    /// # Safety
    /// Must be called with interrupts disabled, for the same reason as
    /// [`Cpus::get_id`].
    pub unsafe fn mycpu() -> *mut Cpu {
        assert!(!interrupts::get(), "mycpu interrupts enabled");
        let id = unsafe { Self::get_id() };
        CPU_POOL.0[id].get()
    }

    /// Disables interrupts on this hart and returns an RAII guard that
    /// restores the prior state (if no other guard is still outstanding)
    /// on drop.
    pub fn lock_mycpu() -> InterruptLock {
        let old_state = interrupts::get();
        interrupts::disable();

        unsafe { (*Self::mycpu()).push_off(old_state) }
    }

    pub fn current_id(&self) -> usize {
        let _lock = Self::lock_mycpu();
        unsafe { Self::get_id() }
    }

    pub fn current_proc(&self) -> Option<&'static Proc> {
        let _lock = Self::lock_mycpu();
        let idx = unsafe { (*Self::mycpu()).proc_idx }?;
        Some(&PROCS.procs[idx])
    }

    pub fn lock_current(&self) -> InterruptLock {
        Self::lock_mycpu()
    }
}

pub static CPU_POOL: Cpus = Cpus::new();

fn ticks_now() -> usize {
    *TICKS_LOCK.lock()
}

/// Index into `PROCS.procs`/`PROCS.table` of the root process. Set once by
/// `user_init`; every other process's ancestor walk terminates here.
static INIT_IDX: AtomicUsize = AtomicUsize::new(usize::MAX);

fn init_idx() -> usize {
    INIT_IDX.load(Ordering::Relaxed)
}

fn proc_at(idx: usize) -> &'static Proc {
    &PROCS.procs[idx]
}

/// Finds an `UNUSED` slot and brings it up to `EMBRYO`: assigns a pid,
/// clears scheduling state, stamps `ctime`/`arrival_time`, then allocates
/// the slot's kernel stack resources outside the lock. On any allocation
/// failure the slot is returned to `UNUSED`.
fn alloc() -> Result<usize, KernelError> {
    let idx = {
        let mut table = PROCS.table.lock();
        let idx = table
            .iter()
            .position(|p| p.state == ProcState::Unused)
            .ok_or(KernelError::OutOfProcess)?;

        let now = ticks_now();
        let slot = &mut table[idx];
        *slot = ProcInner::new();
        slot.state = ProcState::Embryo;
        slot.pid = Pid::alloc();
        slot.ctime = now;
        slot.arrival_time = now;

        idx
    };

    let result: Result<(), KernelError> = (|| {
        let data = unsafe { proc_at(idx).data_mut() };
        data.size = 0;

        let trapframe: Box<MaybeUninit<TrapFrame>> = Box::try_new_zeroed()?;
        data.trapframe = Some(unsafe { trapframe.assume_init() });

        let mut pagetable = Uvm::try_new()?;
        pagetable.map_pages(
            crate::memlayout::TRAMPOLINE.into(),
            (crate::trampoline::trampoline as *const () as usize).into(),
            PGSIZE,
            crate::riscv::PTE_R | crate::riscv::PTE_X,
        )?;
        let trapframe_pa = data.trapframe.as_ref().unwrap().as_ref() as *const TrapFrame as usize;
        pagetable.map_pages(
            TRAPFRAME.into(),
            trapframe_pa.into(),
            PGSIZE,
            crate::riscv::PTE_R | crate::riscv::PTE_W,
        )?;
        data.pagetable = Some(pagetable);

        data.context = Context::new();
        data.context.ra = fork_ret as usize;
        data.context.sp = data.kstack.0 + NKSTACK_PAGES * PGSIZE;

        Ok(())
    })();

    if let Err(err) = result {
        free_proc(idx);
        return Err(err);
    }

    Ok(idx)
}

/// Tears a slot's owned resources down and returns it to `UNUSED`. Used
/// both by `alloc()`'s own rollback and by `exit()`/`wait()` reaping.
fn free_proc(idx: usize) {
    let data = unsafe { proc_at(idx).data_mut() };
    data.trapframe.take();
    if let Some(pagetable) = data.pagetable.take() {
        pagetable.proc_free(data.size);
    }
    data.size = 0;

    let mut table = PROCS.table.lock();
    table[idx] = ProcInner::new();
}

/// Renames the process at table slot `idx`, truncating to the name field's
/// fixed capacity. Used by `exec` to adopt the program's basename.
pub fn set_name(idx: usize, name: &[u8]) {
    PROCS.table.lock()[idx].set_name(name);
}

/// Creates the root process: allocates a slot, maps its first page of user
/// memory with the embedded init program, and makes it `RUNNABLE`.
pub fn user_init() {
    let idx = alloc().expect("user_init: alloc");
    INIT_IDX.store(idx, Ordering::Relaxed);

    let data = unsafe { proc_at(idx).data_mut() };
    let pagetable = data.pagetable.as_mut().expect("user_init: pagetable");
    pagetable
        .alloc(0, INITCODE.len(), crate::riscv::PTE_X)
        .expect("user_init: alloc user mem");
    pagetable
        .copy_out(VA(0), INITCODE)
        .expect("user_init: copy_out initcode");
    data.size = INITCODE.len();

    let trapframe = data.trapframe.as_mut().expect("user_init: trapframe");
    trapframe.epc = 0;
    trapframe.sp = INITCODE.len();

    let mut table = PROCS.table.lock();
    table[idx].set_name(b"initcode");
    table[idx].parent = Some(idx);
    table[idx].state = ProcState::Runnable;
}

/// A tiny freestanding program: `exec("/init")`, then spin forever if that
/// call ever returns. What `/init` itself does is out of scope here; this
/// just needs to exist so the first process has somewhere to go.
static INITCODE: &[u8] = &[
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0x45, 0x02, 0x97, 0x05, 0x00, 0x00, 0x93, 0x85, 0x35, 0x02,
    0x93, 0x08, 0x70, 0x00, 0x73, 0x00, 0x00, 0x00, 0x93, 0x08, 0x20, 0x00, 0x73, 0x00, 0x00, 0x00,
    0xef, 0xf0, 0x9f, 0xff, 0x2f, 0x69, 0x6e, 0x69, 0x74, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00,
];

/// One-time kernel-wide setup: called from `main()` on hart 0 before any
/// process is created.
pub fn init() {}

/// Grows or shrinks the calling process's user memory by `delta` bytes.
/// Returns the size before the change.
pub fn grow(delta: isize) -> Result<usize, KernelError> {
    let proc = CPU_POOL.current_proc().ok_or(KernelError::NoSuchProcess)?;
    let data = unsafe { proc.data_mut() };
    let old_size = data.size;

    let pagetable = data
        .pagetable
        .as_mut()
        .ok_or(KernelError::InvalidPageError)?;
    let new_size = if delta >= 0 {
        pagetable.alloc(old_size, old_size + delta as usize, crate::riscv::PTE_W)?
    } else {
        pagetable.dealloc(old_size, old_size.saturating_sub((-delta) as usize))
    };

    data.size = new_size;
    Ok(old_size)
}

/// Duplicates the calling process into a new `RUNNABLE` child, returning
/// the child's pid to the parent. The child's trapframe is a copy of the
/// parent's with `a0` zeroed, so it "returns" 0 from the syscall that
/// caused the fork.
pub fn fork() -> Result<Pid, KernelError> {
    let parent = CPU_POOL.current_proc().ok_or(KernelError::NoSuchProcess)?;
    let parent_idx = parent.idx();

    let child_idx = alloc()?;

    let result: Result<(), KernelError> = (|| {
        let parent_data = unsafe { parent.data_mut() };
        let child_data = unsafe { proc_at(child_idx).data_mut() };

        let size = parent_data.size;
        let child_pt = parent_data
            .pagetable
            .as_mut()
            .ok_or(KernelError::InvalidPageError)?
            .copy(size)?;
        child_data.pagetable = Some(child_pt);
        child_data.size = size;

        let mut frame = **parent_data
            .trapframe
            .as_ref()
            .ok_or(KernelError::InvalidPageError)?;
        frame.a0 = 0;
        *child_data.trapframe.as_mut().unwrap() = frame;

        for i in 0..NOFILE {
            child_data.open_files[i] = parent_data.open_files[i].as_mut().map(|f| f.dup());
        }
        child_data.cwd = parent_data.cwd.dup();

        Ok(())
    })();

    if let Err(err) = result {
        free_proc(child_idx);
        return Err(err);
    }

    let child_pid = {
        let mut table = PROCS.table.lock();
        let (name, name_len) = (table[parent_idx].name, table[parent_idx].name_len);
        table[child_idx].name = name;
        table[child_idx].name_len = name_len;
        table[child_idx].parent = Some(parent_idx);
        table[child_idx].state = ProcState::Runnable;
        table[child_idx].pid
    };

    Ok(child_pid)
}

/// Terminates the calling process: closes its open files and releases its
/// cwd, wakes its parent, reparents any children to `init` (waking `init`
/// for any that are already zombies), records `status`, and yields the
/// CPU one last time as a `ZOMBIE`. Never returns.
pub fn exit(status: i32) -> ! {
    let me = CPU_POOL.current_proc().expect("exit: no current process");
    assert_ne!(me.idx(), init_idx(), "init exiting");

    {
        let data = unsafe { me.data_mut() };
        for file in data.open_files.iter_mut() {
            if let Some(mut f) = file.take() {
                f.close();
            }
        }

        log::begin_op();
        let cwd = core::mem::replace(&mut data.cwd, Inode::new(0, 0, 0));
        if cwd.id != 0 || cwd.dev != 0 || cwd.inum != 0 {
            cwd.put();
        }
        log::end_op();
    }

    let mut table = PROCS.table.lock();

    if let Some(parent_idx) = table[me.idx()].parent {
        if parent_idx != me.idx() {
            wakeup1(&mut table, Channel::Proc(parent_idx));
        }
    }

    for i in 0..NPROC {
        if table[i].state != ProcState::Unused && table[i].parent == Some(me.idx()) {
            table[i].parent = Some(init_idx());
            if table[i].state == ProcState::Zombie {
                wakeup1(&mut table, Channel::Proc(init_idx()));
            }
        }
    }

    table[me.idx()].xstate = status;
    table[me.idx()].state = ProcState::Zombie;

    sched(&mut table);
    unreachable!("exit: zombie rescheduled");
}

/// Blocks until one of the calling process's children becomes a `ZOMBIE`,
/// reaps it, and returns its pid and exit status. Fails immediately if the
/// caller has no children.
pub fn wait() -> Result<(Pid, i32), KernelError> {
    let me = CPU_POOL.current_proc().expect("wait: no current process");
    let my_idx = me.idx();

    let mut table = PROCS.table.lock();

    loop {
        let mut have_children = false;

        for i in 0..NPROC {
            if table[i].state == ProcState::Unused || table[i].parent != Some(my_idx) {
                continue;
            }
            have_children = true;

            if table[i].state == ProcState::Zombie {
                let pid = table[i].pid;
                let xstate = table[i].xstate;
                drop(table);
                free_proc(i);
                return Ok((pid, xstate));
            }
        }

        if !have_children || table[my_idx].killed {
            return Err(KernelError::NoChildren);
        }

        sleep_on_table(&mut table, my_idx, Channel::Proc(my_idx));
    }
}

/// Marks the process with the given pid killed and, if it is currently
/// `SLEEPING`, makes it `RUNNABLE` so it observes `killed` promptly.
pub fn kill(pid: Pid) -> Result<(), KernelError> {
    let mut table = PROCS.table.lock();

    for p in table.iter_mut() {
        if p.pid == pid {
            p.killed = true;
            if p.state == ProcState::Sleeping {
                p.state = ProcState::Runnable;
            }
            return Ok(());
        }
    }

    Err(KernelError::NoSuchProcess)
}

fn runnable_candidate(p: &ProcInner, queue: SchedQueue) -> bool {
    p.pid.0 != 0 && p.state == ProcState::Runnable && p.sched_queue == queue
}

fn round_robin_select(table: &[ProcInner; NPROC], cursor: &mut usize) -> Option<usize> {
    for offset in 0..NPROC {
        let idx = (*cursor + offset) % NPROC;
        if runnable_candidate(&table[idx], SchedQueue::RoundRobin) {
            *cursor = (idx + 1) % NPROC;
            return Some(idx);
        }
    }
    *cursor = 0;
    None
}

fn priority_select(table: &[ProcInner; NPROC]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for idx in 0..NPROC {
        if !runnable_candidate(&table[idx], SchedQueue::Priority) {
            continue;
        }
        best = match best {
            Some(b) if table[b].priority <= table[idx].priority => Some(b),
            _ => Some(idx),
        };
    }
    best
}

fn bjf_rank(p: &ProcInner) -> f64 {
    (1.0 / p.priority.max(1) as f64) * p.priority_ratio as f64
        + p.arrival_time as f64 * p.arrival_time_ratio as f64
        + p.executed_cycle as f64 * 0.1 * p.executed_cycle_ratio as f64
}

fn bjf_select(table: &[ProcInner; NPROC]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for idx in 0..NPROC {
        if !runnable_candidate(&table[idx], SchedQueue::Bjf) {
            continue;
        }
        let rank = bjf_rank(&table[idx]);
        best = match best {
            Some((b, r)) if r <= rank => Some((b, r)),
            _ => Some((idx, rank)),
        };
    }
    best.map(|(idx, _)| idx)
}

fn fcfs_select(table: &[ProcInner; NPROC]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for idx in 0..NPROC {
        if !runnable_candidate(&table[idx], SchedQueue::Fcfs) {
            continue;
        }
        best = match best {
            Some(b) if table[b].ctime <= table[idx].ctime => Some(b),
            _ => Some(idx),
        };
    }
    best
}

/// Tries the four disciplines in fixed order -- round-robin, priority,
/// BJF, FCFS -- and returns the first one's pick.
fn select_next(table: &[ProcInner; NPROC], rr_cursor: &mut usize) -> Option<usize> {
    round_robin_select(table, rr_cursor)
        .or_else(|| priority_select(table))
        .or_else(|| bjf_select(table))
        .or_else(|| fcfs_select(table))
}

/// Runs once per scheduling decision, only after a selection succeeds:
/// every `RUNNABLE` process accrues a tick of `waiting_time`, and any
/// process that has waited past `AGING_THRESHOLD` in a queue below
/// `ROUND_ROBIN` is promoted one discipline toward it. Skipped entirely on
/// an idle iteration, so a process promoted by one round only becomes
/// eligible under its new discipline on the next.
fn age(table: &mut [ProcInner; NPROC]) {
    for p in table.iter_mut() {
        if p.pid.0 == 0 {
            continue;
        }
        if p.state == ProcState::Runnable {
            p.waiting_time += 1;
        }
        if p.waiting_time > AGING_THRESHOLD && p.sched_queue > SchedQueue::RoundRobin {
            p.sched_queue = p.sched_queue.promote();
            p.waiting_time = 0;
        }
    }
}

#[cfg(test)]
mod scheduler_tests {
    use super::*;

    fn empty_table() -> [ProcInner; NPROC] {
        [ProcInner::new(); NPROC]
    }

    fn runnable(queue: SchedQueue, pid: usize) -> ProcInner {
        let mut p = ProcInner::new();
        p.pid = Pid(pid);
        p.state = ProcState::Runnable;
        p.sched_queue = queue;
        p
    }

    /// S3: three PCBs in PRIORITY with priorities {5, 3, 3}. The lowest
    /// priority value wins; on a tie, the lower table index wins.
    #[test]
    fn priority_select_ties_favor_lowest_index() {
        let mut table = empty_table();
        table[0] = runnable(SchedQueue::Priority, 1);
        table[0].priority = 5;
        table[1] = runnable(SchedQueue::Priority, 2);
        table[1].priority = 3;
        table[2] = runnable(SchedQueue::Priority, 3);
        table[2].priority = 3;

        assert_eq!(priority_select(&table), Some(1));
    }

    /// S4: two PCBs in BJF. (priority=2, arrival=100, ratios=(1,1,1)) ranks
    /// 100.5; (priority=1, arrival=200, ratios=(1,1,1)) ranks 201.0. Lowest
    /// rank wins.
    #[test]
    fn bjf_select_picks_lowest_rank() {
        let mut table = empty_table();

        table[0] = runnable(SchedQueue::Bjf, 1);
        table[0].priority = 2;
        table[0].arrival_time = 100;
        table[0].executed_cycle = 0;
        table[0].priority_ratio = 1;
        table[0].arrival_time_ratio = 1;
        table[0].executed_cycle_ratio = 1;

        table[1] = runnable(SchedQueue::Bjf, 2);
        table[1].priority = 1;
        table[1].arrival_time = 200;
        table[1].executed_cycle = 0;
        table[1].priority_ratio = 1;
        table[1].arrival_time_ratio = 1;
        table[1].executed_cycle_ratio = 1;

        assert!((bjf_rank(&table[0]) - 100.5).abs() < 1e-9);
        assert!((bjf_rank(&table[1]) - 201.0).abs() < 1e-9);
        assert_eq!(bjf_select(&table), Some(0));
    }

    /// Equal-rank BJF candidates favor the lower table index, same tie-break
    /// direction as priority_select and fcfs_select.
    #[test]
    fn bjf_select_ties_favor_lowest_index() {
        let mut table = empty_table();
        table[0] = runnable(SchedQueue::Bjf, 1);
        table[1] = runnable(SchedQueue::Bjf, 2);
        // identical fields (both default to priority=1, ratios=1, etc.) => equal rank
        assert_eq!(bjf_select(&table), Some(0));
    }

    /// FCFS ties (equal arrival/creation time) favor the lower table index.
    #[test]
    fn fcfs_select_ties_favor_lowest_index() {
        let mut table = empty_table();
        table[0] = runnable(SchedQueue::Fcfs, 1);
        table[0].ctime = 50;
        table[1] = runnable(SchedQueue::Fcfs, 2);
        table[1].ctime = 50;

        assert_eq!(fcfs_select(&table), Some(0));
    }

    /// Round robin starts scanning from the cursor and wraps around the
    /// table, so a candidate before the cursor is only picked after one
    /// behind it; the cursor is left just past whoever was chosen.
    #[test]
    fn round_robin_select_scans_from_cursor_and_wraps() {
        let mut table = empty_table();
        table[0] = runnable(SchedQueue::RoundRobin, 1);
        table[2] = runnable(SchedQueue::RoundRobin, 2);

        let mut cursor = 1;
        assert_eq!(round_robin_select(&table, &mut cursor), Some(2));
        assert_eq!(cursor, 3);

        // from cursor 3, the only remaining candidate is idx 0, found by wrapping
        assert_eq!(round_robin_select(&table, &mut cursor), Some(0));
        assert_eq!(cursor, 1);
    }

    /// S5: a PCB in PRIORITY, never selected for AGING_THRESHOLD + 1
    /// scheduling decisions, is promoted to ROUND_ROBIN with waiting_time
    /// reset to 0.
    #[test]
    fn age_promotes_past_threshold_and_resets_waiting_time() {
        let mut table = empty_table();
        table[0] = runnable(SchedQueue::Priority, 1);
        table[0].waiting_time = AGING_THRESHOLD - 1;

        // this tick lands exactly at the threshold: not past it yet
        age(&mut table);
        assert_eq!(table[0].sched_queue, SchedQueue::Priority);
        assert_eq!(table[0].waiting_time, AGING_THRESHOLD);

        // the next tick crosses the threshold: promoted, waiting_time reset
        age(&mut table);
        assert_eq!(table[0].sched_queue, SchedQueue::RoundRobin);
        assert_eq!(table[0].waiting_time, 0);
    }

    /// A process already in ROUND_ROBIN never promotes further, regardless
    /// of how long it waits.
    #[test]
    fn age_does_not_promote_past_round_robin() {
        let mut table = empty_table();
        table[0] = runnable(SchedQueue::RoundRobin, 1);
        table[0].waiting_time = AGING_THRESHOLD * 2;

        age(&mut table);
        assert_eq!(table[0].sched_queue, SchedQueue::RoundRobin);
        assert_eq!(table[0].waiting_time, AGING_THRESHOLD * 2 + 1);
    }

    /// `age` only accrues waiting_time for RUNNABLE processes, and skips
    /// unused (pid 0) slots entirely.
    #[test]
    fn age_ignores_non_runnable_and_unused_slots() {
        let mut table = empty_table();

        table[0] = runnable(SchedQueue::Fcfs, 1);
        table[0].state = ProcState::Sleeping;
        table[0].waiting_time = 5;

        // table[1] stays pid 0 / Unused from empty_table()

        age(&mut table);

        assert_eq!(table[0].waiting_time, 5, "sleeping process should not accrue waiting_time");
        assert_eq!(table[1].pid, Pid(0));
        assert_eq!(table[1].waiting_time, 0);
    }

    /// Selection is idempotent: calling a non-round-robin selector twice
    /// over the same, unmutated table returns the same pick both times.
    #[test]
    fn priority_select_is_idempotent() {
        let mut table = empty_table();
        table[0] = runnable(SchedQueue::Priority, 1);
        table[0].priority = 4;
        table[1] = runnable(SchedQueue::Priority, 2);
        table[1].priority = 7;

        assert_eq!(priority_select(&table), priority_select(&table));
    }
}

/// Per-hart scheduling loop: enable interrupts, lock the table, pick the
/// next runnable process, and only on a successful pick age the table
/// (resetting the chosen process's own `waiting_time` since aging may have
/// just bumped it) before switching into it. An idle iteration that selects
/// no one leaves every process's `waiting_time`/`sched_queue` untouched.
/// Never returns.
pub fn scheduler() -> ! {
    let mut rr_cursor = 0usize;

    loop {
        interrupts::enable();

        let mut table = PROCS.table.lock();

        if let Some(idx) = select_next(&table, &mut rr_cursor) {
            age(&mut table);
            table[idx].state = ProcState::Running;
            table[idx].waiting_time = 0;

            unsafe {
                (*Cpus::mycpu()).proc_idx = Some(idx);
            }

            let proc_context = unsafe { &mut proc_at(idx).data_mut().context as *mut Context };
            unsafe {
                swtch::swtch(&mut (*Cpus::mycpu()).context, proc_context);
            }

            unsafe {
                (*Cpus::mycpu()).proc_idx = None;
            }
        }

        drop(table);
    }
}

/// Switches from the calling process's kernel thread back to the
/// scheduler. The caller must already have moved itself out of `RUNNING`
/// and must hold `PROCS.table` with no other lock nested inside it.
fn sched(table: &mut SpinLockGuard<'_, [ProcInner; NPROC]>) {
    let proc = CPU_POOL
        .current_proc()
        .expect("sched: no current process");

    unsafe {
        assert_eq!((*Cpus::mycpu()).num_off, 1, "sched: locks");
    }
    assert_ne!(
        table[proc.idx()].state,
        ProcState::Running,
        "sched: running"
    );
    assert!(!interrupts::get(), "sched: interruptible");

    let interrupt_enabled = unsafe { (*Cpus::mycpu()).interrupt_enabled };
    let proc_context = unsafe { &mut proc.data_mut().context as *mut Context };
    unsafe {
        swtch::swtch(proc_context, &(*Cpus::mycpu()).context);
    }
    unsafe {
        (*Cpus::mycpu()).interrupt_enabled = interrupt_enabled;
    }
}

/// Gives up the CPU for one scheduling round.
pub fn r#yield() {
    let mut table = PROCS.table.lock();
    let proc = CPU_POOL
        .current_proc()
        .expect("yield: no current process");
    table[proc.idx()].state = ProcState::Runnable;
    sched(&mut table);
}

static FIRST_SCHED: AtomicBool = AtomicBool::new(true);

/// Entry point for a process's very first scheduling. `alloc()` points a
/// fresh process's `context.ra` here, so `swtch` "returns" into this
/// function instead of back into `scheduler()`. Its first job is
/// releasing the table lock the scheduler is still logically holding --
/// there's no Rust guard for it on this stack, since this stack didn't
/// exist when the lock was taken.
///
/// # Safety
/// Must only run as the target of the context switch described above.
unsafe extern "C" fn fork_ret() {
    unsafe {
        PROCS.table.force_unlock();
    }

    if FIRST_SCHED.swap(false, Ordering::AcqRel) {
        // The very first process ever scheduled. A full kernel would
        // mount the root file system here, since doing so needs a process
        // context to block on disk I/O through the log layer.
        crate::file::setup_console_fds();
    }

    unsafe {
        trap::usertrapret();
    }
}

/// Wakes every process sleeping on `chan`.
pub fn wakeup(chan: Channel) {
    let mut table = PROCS.table.lock();
    wakeup1(&mut table, chan);
}

/// Wakes every process sleeping on `chan`, given the table lock is already
/// held by the caller.
fn wakeup1(table: &mut [ProcInner; NPROC], chan: Channel) {
    for p in table.iter_mut() {
        if p.state == ProcState::Sleeping && p.channel == Some(chan) {
            p.state = ProcState::Runnable;
        }
    }
}

/// Atomically releases `lk` and puts the calling process to sleep on
/// `chan`, waking it back up (and reacquiring `lk`) when some other
/// process calls [`wakeup`] with a matching channel.
///
/// The table lock is acquired before `lk` is released, and not released
/// again until the process is about to resume, so a `wakeup` racing with
/// this call can never be missed: either it sees the caller already
/// `SLEEPING`, or it runs after the caller has woken back up.
pub fn sleep<T>(chan: Channel, lk: SpinLockGuard<'_, T>) -> SpinLockGuard<'_, T> {
    let me = CPU_POOL
        .current_proc()
        .expect("sleep: no current process");

    let mut table = PROCS.table.lock();
    table[me.idx()].channel = Some(chan);
    table[me.idx()].state = ProcState::Sleeping;

    let other_lock = SpinLock::unlock(lk);

    sched(&mut table);

    table[me.idx()].channel = None;
    drop(table);

    other_lock.lock()
}

/// Puts the process at `idx` to sleep on `chan` while the table lock is
/// already held (used by [`wait`]'s poll loop, which both waits on
/// `Channel::Proc(self)` and needs the table lock held throughout its
/// scan). Unlike [`sleep`], this never releases and reacquires the table
/// lock -- it's the same lock the caller is sleeping under.
fn sleep_on_table(table: &mut SpinLockGuard<'_, [ProcInner; NPROC]>, idx: usize, chan: Channel) {
    table[idx].channel = Some(chan);
    table[idx].state = ProcState::Sleeping;
    sched(table);
    table[idx].channel = None;
}

/// Sets a process's priority. Takes the table lock, unlike the reference
/// kernel's mutators (see design notes) -- silently reading a half-written
/// priority mid-aging-pass is worse than the extra lock.
pub fn set_priority(pid: Pid, priority: usize) -> Result<(), KernelError> {
    let mut table = PROCS.table.lock();
    for p in table.iter_mut() {
        if p.pid == pid {
            p.priority = priority;
            return Ok(());
        }
    }
    Err(KernelError::NoSuchProcess)
}

/// Moves a process to a different scheduling discipline.
pub fn change_sched_queue(pid: Pid, queue: SchedQueue) -> Result<(), KernelError> {
    let mut table = PROCS.table.lock();
    for p in table.iter_mut() {
        if p.pid == pid {
            p.sched_queue = queue;
            p.waiting_time = 0;
            return Ok(());
        }
    }
    Err(KernelError::NoSuchProcess)
}

/// Sets the three BJF weighting ratios for a process.
pub fn set_ratio_process(
    pid: Pid,
    priority_ratio: usize,
    arrival_time_ratio: usize,
    executed_cycle_ratio: usize,
) -> Result<(), KernelError> {
    let mut table = PROCS.table.lock();
    for p in table.iter_mut() {
        if p.pid == pid {
            p.priority_ratio = priority_ratio;
            p.arrival_time_ratio = arrival_time_ratio;
            p.executed_cycle_ratio = executed_cycle_ratio;
            return Ok(());
        }
    }
    Err(KernelError::NoSuchProcess)
}

pub fn creation_time(pid: Pid) -> Result<usize, KernelError> {
    let table = PROCS.table.lock();
    table
        .iter()
        .find(|p| p.pid == pid)
        .map(|p| p.ctime)
        .ok_or(KernelError::NoSuchProcess)
}

/// The whole descendant forest rooted at `pid`: children, grandchildren,
/// and so on, enumerated depth-first. At each level siblings are ordered
/// most-recently-created first, and each child's own subtree is walked
/// before moving to the next sibling.
pub fn descendants(pid: Pid) -> Result<alloc::vec::Vec<Pid>, KernelError> {
    let table = PROCS.table.lock();
    let idx = table
        .iter()
        .position(|p| p.pid == pid)
        .ok_or(KernelError::NoSuchProcess)?;

    let mut out = alloc::vec::Vec::new();
    collect_descendants(&table, idx, &mut out);
    Ok(out)
}

fn collect_descendants(table: &[ProcInner; NPROC], idx: usize, out: &mut alloc::vec::Vec<Pid>) {
    let mut children: alloc::vec::Vec<usize> = table
        .iter()
        .enumerate()
        .filter(|(i, p)| p.state != ProcState::Unused && p.parent == Some(idx) && *i != idx)
        .map(|(i, _)| i)
        .collect();
    children.sort_by(|&a, &b| table[b].ctime.cmp(&table[a].ctime));

    for child_idx in children {
        out.push(table[child_idx].pid);
        collect_descendants(table, child_idx, out);
    }
}

/// Ancestors of `pid` from immediate parent up to (and including) `init`.
/// Stops the moment it would revisit a slot -- `init`'s own parent is
/// itself, which is the natural base case, not a bug to special-case
/// around.
pub fn ancestors(pid: Pid) -> Result<alloc::vec::Vec<Pid>, KernelError> {
    let table = PROCS.table.lock();
    let mut idx = table
        .iter()
        .position(|p| p.pid == pid)
        .ok_or(KernelError::NoSuchProcess)?;

    let mut out = alloc::vec::Vec::new();
    loop {
        let parent_idx = match table[idx].parent {
            Some(p) => p,
            None => break,
        };
        if parent_idx == idx {
            break;
        }
        out.push(table[parent_idx].pid);
        idx = parent_idx;
    }

    Ok(out)
}

/// Snapshot of one process's introspectable fields, for `print_processes_details`.
pub struct ProcessDetails {
    pub pid: Pid,
    pub name: ([u8; 16], u8),
    pub state: ProcState,
    pub sched_queue: SchedQueue,
    pub priority: usize,
    pub priority_ratio: usize,
    pub arrival_time_ratio: usize,
    pub executed_cycle_ratio: usize,
    pub bjf_rank: f64,
    pub executed_cycle: usize,
    pub waiting_time: usize,
}

pub fn process_details() -> alloc::vec::Vec<ProcessDetails> {
    let table = PROCS.table.lock();
    table
        .iter()
        .filter(|p| p.pid.0 != 0)
        .map(|p| ProcessDetails {
            pid: p.pid,
            name: (p.name, p.name_len),
            state: p.state,
            sched_queue: p.sched_queue,
            priority: p.priority,
            priority_ratio: p.priority_ratio,
            arrival_time_ratio: p.arrival_time_ratio,
            executed_cycle_ratio: p.executed_cycle_ratio,
            bjf_rank: bjf_rank(p),
            executed_cycle: p.executed_cycle,
            waiting_time: p.waiting_time,
        })
        .collect()
}

/// Lockless process table dump, for use from a panic handler where taking
/// `PROCS.table` could deadlock against whatever panicked while holding it.
pub fn procdump() {
    println!();
    for p in unsafe { PROCS.table.get_mut_unchecked() }.iter() {
        if p.pid.0 == 0 {
            continue;
        }
        let name_len = p.name_len as usize;
        let name = core::str::from_utf8(&p.name[..name_len]).unwrap_or("?");
        println!("{} {:?} {}", p.pid.0, p.state, name);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Addr {
    User(VA),
    Kernel(*mut u8),
}

/// Copies `src` into `dst`, which may be a user virtual address (through
/// the calling process's page table) or a raw kernel pointer.
pub fn copy_out(src: &[u8], dst: Addr) -> Result<(), KernelError> {
    match dst {
        Addr::User(va) => {
            let proc = CPU_POOL.current_proc().ok_or(KernelError::NoSuchProcess)?;
            let data = unsafe { proc.data_mut() };
            data.pagetable
                .as_mut()
                .ok_or(KernelError::InvalidPageError)?
                .copy_out(va, src)
        }
        Addr::Kernel(ptr) => {
            unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), ptr, src.len()) };
            Ok(())
        }
    }
}

/// Copies from `src` (a user virtual address or a raw kernel pointer) into
/// `dst`.
pub fn copy_in(src: Addr, dst: &mut [u8]) -> Result<(), KernelError> {
    match src {
        Addr::User(va) => {
            let proc = CPU_POOL.current_proc().ok_or(KernelError::NoSuchProcess)?;
            let data = unsafe { proc.data_mut() };
            data.pagetable
                .as_mut()
                .ok_or(KernelError::InvalidPageError)?
                .copy_in(dst, va)
        }
        Addr::Kernel(ptr) => {
            unsafe { core::ptr::copy_nonoverlapping(ptr, dst.as_mut_ptr(), dst.len()) };
            Ok(())
        }
    }
}

/// Fetches a null-terminated string from user space, up to `max` bytes
/// including the terminator.
pub fn copy_in_str(mut va: VA, max: usize) -> Result<alloc::string::String, KernelError> {
    let proc = CPU_POOL.current_proc().ok_or(KernelError::NoSuchProcess)?;
    let data = unsafe { proc.data_mut() };
    let pagetable = data
        .pagetable
        .as_mut()
        .ok_or(KernelError::InvalidPageError)?;

    let mut out = alloc::vec::Vec::new();
    let mut byte = [0u8; 1];
    while out.len() < max {
        pagetable.copy_in(&mut byte, va)?;
        if byte[0] == 0 {
            return Ok(alloc::string::String::from_utf8_lossy(&out).into_owned());
        }
        out.push(byte[0]);
        va = VA(va.0 + 1);
    }

    Err(KernelError::InvalidAddress)
}

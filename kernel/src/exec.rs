//! Replaces a process's memory image with a new ELF program.

use core::fmt::Display;
use core::slice;

use crate::error::KernelError;
use crate::fs::Path;
use crate::log;
use crate::param::{MAXARG, USERSTACK};
use crate::proc::{self, Addr, CPU_POOL};
use crate::riscv::{PGSIZE, PTE_W, PTE_X, pg_round_up};
use crate::vm::{Uvm, VA};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    Alloc,
    Elf,
    Header,
    Read,
    Memory,
    NotFound,
}

impl Display for ExecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExecError::Alloc => write!(f, "allocation error"),
            ExecError::Elf => write!(f, "invalid elf file"),
            ExecError::Header => write!(f, "invalid program header"),
            ExecError::Read => write!(f, "read error"),
            ExecError::Memory => write!(f, "memory error"),
            ExecError::NotFound => write!(f, "no such file"),
        }
    }
}

impl From<KernelError> for ExecError {
    fn from(_value: KernelError) -> Self {
        ExecError::Memory
    }
}

const ELF_MAGIC: u32 = 0x464C457F; // "\x7FELF" in little endian

#[repr(C)]
#[derive(Debug)]
struct ElfHeader {
    magic: u32,
    elf: [u8; 12],
    r#type: u16,
    machine: u16,
    version: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

impl ElfHeader {
    const SIZE: usize = size_of::<Self>();

    fn from_bytes(bytes: &[u8]) -> Self {
        assert!(bytes.len() >= Self::SIZE);
        unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const Self) }
    }
}

#[repr(C)]
#[derive(Debug)]
struct ProgramHeader {
    r#type: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    paddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
}

impl ProgramHeader {
    const SIZE: usize = size_of::<Self>();
    const ELF_PROG_LOAD: u32 = 1;

    fn from_bytes(bytes: &[u8]) -> Self {
        assert!(bytes.len() >= Self::SIZE);
        unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const Self) }
    }

    fn get_perms(&self) -> usize {
        let mut perm = 0;
        if self.flags & 0x1 != 0 {
            perm = PTE_X;
        }
        if self.flags & 0x2 != 0 {
            perm |= PTE_W;
        }
        perm
    }
}

/// Reads argv out of user space: a null-terminated array of pointers, each
/// pointing at a null-terminated string, as packed by the userspace `exec`
/// wrapper.
fn fetch_argv(argv: VA) -> Result<([alloc::string::String; MAXARG], usize), ExecError> {
    let mut args: [alloc::string::String; MAXARG] = core::array::from_fn(|_| alloc::string::String::new());
    let mut argc = 0;

    loop {
        if argc >= MAXARG {
            return Err(ExecError::Memory);
        }

        let mut ptr_bytes = [0u8; size_of::<usize>()];
        proc::copy_in(
            Addr::User(VA::from(argv.0 + argc * size_of::<usize>())),
            &mut ptr_bytes,
        )?;
        let ptr = usize::from_ne_bytes(ptr_bytes);

        if ptr == 0 {
            break;
        }

        args[argc] = proc::copy_in_str(VA::from(ptr), crate::param::MAXPATH)?;
        argc += 1;
    }

    Ok((args, argc))
}

pub fn exec(path_str: &str, argv: VA) -> Result<usize, ExecError> {
    let path_basename = path_str.rsplit_once('/').map_or(path_str, |(_, n)| n);
    let path = Path::new(path_str);

    log::begin_op();

    let Ok(mut inode) = path.resolve() else {
        log::end_op();
        return Err(ExecError::NotFound);
    };

    let mut inner = inode.lock();

    let mut elf_buf = [0u8; ElfHeader::SIZE];
    match inode.read(&mut inner, 0, &mut elf_buf, false) {
        Ok(read) if read as usize == elf_buf.len() => {}
        _ => {
            inode.unlock_put(inner);
            log::end_op();
            return Err(ExecError::Read);
        }
    }

    let elf = ElfHeader::from_bytes(&elf_buf);

    if elf.magic != ELF_MAGIC {
        inode.unlock_put(inner);
        log::end_op();
        return Err(ExecError::Elf);
    }

    let args = match fetch_argv(argv) {
        Ok(args) => args,
        Err(e) => {
            inode.unlock_put(inner);
            log::end_op();
            return Err(e);
        }
    };

    let Ok(mut pagetable) = Uvm::try_new() else {
        inode.unlock_put(inner);
        log::end_op();
        return Err(ExecError::Alloc);
    };

    let mut size = 0usize;
    let mut offset = elf.phoff;
    let mut ph_buf = [0u8; ProgramHeader::SIZE];

    for _ in 0..elf.phnum {
        match inode.read(&mut inner, offset as u32, &mut ph_buf, false) {
            Ok(read) if read as usize == ph_buf.len() => {}
            _ => {
                pagetable.proc_free(size);
                inode.unlock_put(inner);
                log::end_op();
                return Err(ExecError::Memory);
            }
        }

        let ph = ProgramHeader::from_bytes(&ph_buf);
        offset += ProgramHeader::SIZE as u64;

        if ph.r#type != ProgramHeader::ELF_PROG_LOAD {
            continue;
        }

        if ph.memsz < ph.filesz
            || ph.vaddr.checked_add(ph.memsz).is_none()
            || !ph.vaddr.is_multiple_of(PGSIZE as u64)
        {
            pagetable.proc_free(size);
            inode.unlock_put(inner);
            log::end_op();
            return Err(ExecError::Header);
        }

        size = match pagetable.alloc(size, (ph.vaddr + ph.memsz) as usize, ph.get_perms()) {
            Ok(new_size) => new_size,
            Err(_) => {
                pagetable.proc_free(size);
                inode.unlock_put(inner);
                log::end_op();
                return Err(ExecError::Alloc);
            }
        };

        if pagetable
            .load_elf_segment(
                &inode,
                &mut inner,
                VA::from(ph.vaddr as usize),
                ph.offset as u32,
                ph.filesz as usize,
            )
            .is_err()
        {
            pagetable.proc_free(size);
            inode.unlock_put(inner);
            log::end_op();
            return Err(ExecError::Memory);
        }
    }

    inode.unlock_put(inner);
    log::end_op();

    let proc = CPU_POOL.current_proc().ok_or(ExecError::Memory)?;
    let old_size = proc.data().size;

    // allocate a guard page and the user stack just past the program image
    size = pg_round_up(size);
    size = match pagetable.alloc(size, size + (USERSTACK + 1) * PGSIZE, PTE_W) {
        Ok(new_size) => new_size,
        Err(_) => {
            pagetable.proc_free(size);
            return Err(ExecError::Alloc);
        }
    };

    if pagetable
        .clear(VA::from(size - (USERSTACK + 1) * PGSIZE))
        .is_err()
    {
        pagetable.proc_free(size);
        return Err(ExecError::Memory);
    }

    let mut sp = size;
    let stackbase = sp - USERSTACK * PGSIZE;

    let (args, argc) = (args.0, args.1);
    let mut ustack = [0u64; MAXARG];

    for i in 0..argc {
        let arg = &args[i];
        sp -= arg.len() + 1;
        sp -= sp % 16;

        if sp < stackbase {
            pagetable.proc_free(size);
            return Err(ExecError::Memory);
        }

        if pagetable.copy_out(VA::from(sp), arg.as_bytes()).is_err()
            || pagetable.copy_out(VA::from(sp + arg.len()), &[0u8]).is_err()
        {
            pagetable.proc_free(size);
            return Err(ExecError::Memory);
        }

        ustack[i] = sp as u64;
    }

    sp -= (argc + 1) * size_of::<u64>();
    sp -= sp % 16;

    let ustack_bytes = unsafe {
        slice::from_raw_parts(ustack.as_ptr() as *const u8, (argc + 1) * size_of::<u64>())
    };

    if sp < stackbase || pagetable.copy_out(VA::from(sp), ustack_bytes).is_err() {
        pagetable.proc_free(size);
        return Err(ExecError::Memory);
    }

    // Safety: we are the current process; no one else touches our slot.
    let data = unsafe { proc.data_mut() };

    let old_pagetable = data.pagetable.replace(pagetable).unwrap();
    data.size = size;

    let trapframe = data.trapframe.as_mut().expect("exec: trapframe");
    trapframe.a1 = sp;
    trapframe.epc = elf.entry as usize;
    trapframe.sp = sp;

    old_pagetable.proc_free(old_size);

    crate::proc::set_name(proc.idx(), path_basename.as_bytes());

    Ok(argc)
}

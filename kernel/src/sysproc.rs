use crate::println;
use crate::proc::{self, Addr, Channel, Pid, SchedQueue, CPU_POOL};
use crate::syscall::{SyscallArgs, SyscallError};
use crate::trap::TICKS_LOCK;
use crate::vm::VA;

pub fn sys_exit(args: &SyscallArgs) -> ! {
    let n = args.get_int(0) as i32;
    proc::exit(n);
}

pub fn sys_getpid(args: &SyscallArgs) -> Result<usize, SyscallError> {
    Ok(args.proc().pid().0)
}

pub fn sys_fork(_args: &SyscallArgs) -> Result<usize, SyscallError> {
    match proc::fork() {
        Ok(pid) => Ok(pid.0),
        Err(_) => Err(SyscallError::ForkError),
    }
}

pub fn sys_wait(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let addr = args.get_addr(0);
    let (pid, xstate) = proc::wait().map_err(|_| SyscallError::WaitError)?;

    if addr.0 != 0 {
        proc::copy_out(&xstate.to_ne_bytes(), Addr::User(addr))
            .map_err(|_| SyscallError::WaitError)?;
    }

    Ok(pid.0)
}

pub fn sys_sbrk(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let delta = args.get_int(0);
    proc::grow(delta).map_err(|_| SyscallError::SbrkError)
}

pub fn sys_sleep(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let duration = args.get_int(0).max(0) as usize;

    let mut ticks = TICKS_LOCK.lock();
    let ticks0 = *ticks;

    while *ticks - ticks0 < duration {
        if CPU_POOL.current_proc().unwrap().is_killed() {
            return Err(SyscallError::SleepError);
        }

        ticks = proc::sleep(Channel::Ticks, ticks);
    }

    Ok(0)
}

pub fn sys_kill(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let pid = args.get_int(0).max(0) as usize;
    proc::kill(Pid(pid))?;
    Ok(0)
}

pub fn sys_uptime(_args: &SyscallArgs) -> Result<usize, SyscallError> {
    let ticks = *TICKS_LOCK.lock();
    Ok(ticks)
}

/// Writes `pids` out to a user-space array at `addr`, each slot a `usize`,
/// up to `cap` entries, and returns however many were actually written.
fn copy_out_pids(pids: &[Pid], addr: VA, cap: usize) -> Result<usize, SyscallError> {
    let n = pids.len().min(cap);
    for (i, pid) in pids.iter().take(n).enumerate() {
        let dst = VA(addr.0 + i * core::mem::size_of::<usize>());
        proc::copy_out(&pid.0.to_ne_bytes(), Addr::User(dst))
            .map_err(|_| SyscallError::Process(crate::error::KernelError::InvalidAddress))?;
    }
    Ok(n)
}

pub fn sys_get_descendants(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let pid = args.get_int(0).max(0) as usize;
    let addr = args.get_addr(1);
    let cap = args.get_int(2).max(0) as usize;

    let children = proc::descendants(Pid(pid))?;
    copy_out_pids(&children, addr, cap)
}

pub fn sys_get_ancestors(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let pid = args.get_int(0).max(0) as usize;
    let addr = args.get_addr(1);
    let cap = args.get_int(2).max(0) as usize;

    let ancestors = proc::ancestors(Pid(pid))?;
    copy_out_pids(&ancestors, addr, cap)
}

pub fn sys_get_creation_time(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let pid = args.get_int(0).max(0) as usize;
    Ok(proc::creation_time(Pid(pid))?)
}

fn sched_queue_from(value: usize) -> Result<SchedQueue, SyscallError> {
    match value {
        1 => Ok(SchedQueue::RoundRobin),
        2 => Ok(SchedQueue::Priority),
        3 => Ok(SchedQueue::Bjf),
        4 => Ok(SchedQueue::Fcfs),
        _ => Err(SyscallError::Process(crate::error::KernelError::InvalidArgument)),
    }
}

pub fn sys_change_queue(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let pid = args.get_int(0).max(0) as usize;
    let queue = sched_queue_from(args.get_int(1).max(0) as usize)?;
    proc::change_sched_queue(Pid(pid), queue)?;
    Ok(0)
}

pub fn sys_set_ratio_process(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let pid = args.get_int(0).max(0) as usize;
    let priority_ratio = args.get_int(1).max(0) as usize;
    let arrival_time_ratio = args.get_int(2).max(0) as usize;
    let executed_cycle_ratio = args.get_int(3).max(0) as usize;

    proc::set_ratio_process(
        Pid(pid),
        priority_ratio,
        arrival_time_ratio,
        executed_cycle_ratio,
    )?;
    Ok(0)
}

pub fn sys_set_priority(args: &SyscallArgs) -> Result<usize, SyscallError> {
    let pid = args.get_int(0).max(0) as usize;
    let priority = args.get_int(1).max(0) as usize;
    proc::set_priority(Pid(pid), priority)?;
    Ok(0)
}

pub fn sys_print_processes_details(_args: &SyscallArgs) -> Result<usize, SyscallError> {
    for p in proc::process_details() {
        let name = core::str::from_utf8(&p.name.0[..p.name.1 as usize]).unwrap_or("?");
        println!(
            "{}\t{}\t{:?}\t{:?}\t{}\t{}/{}/{}\t{:.3}\t{}\t{}",
            p.pid.0,
            name,
            p.state,
            p.sched_queue,
            p.priority,
            p.priority_ratio,
            p.arrival_time_ratio,
            p.executed_cycle_ratio,
            p.bjf_rank,
            p.executed_cycle,
            p.waiting_time,
        );
    }
    Ok(0)
}

/// maximum number of CPUs
pub const NCPU: usize = 8;
/// maximum number of processes
pub const NPROC: usize = 64;
/// max # of blocks any FS op writes
pub const MAXOPBLOCKS: usize = 10;
/// max data blocks in on-disk log
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;
/// size of disk block cache
pub const NBUF: usize = MAXOPBLOCKS * 3;
/// max number of open files per process
pub const NOFILE: usize = 16;
/// max number of open files system-wide
pub const NFILE: usize = 100;
/// max number of active inodes
pub const NINODE: usize = 50;
/// max number of distinct devices
pub const NDEV: usize = 10;
/// device number of the file system root disk
pub const ROOTDEV: usize = 1;
/// max length of a path name
pub const MAXPATH: usize = 128;
/// pages reserved for each process's kernel stack
pub const NKSTACK_PAGES: usize = 1;
/// max exec arguments
pub const MAXARG: usize = 32;
/// user stack pages
pub const USERSTACK: usize = 1;

/// ticks a RUNNABLE process may accumulate in `waiting_time` before the
/// scheduler promotes it out of the round-robin queue.
pub const AGING_THRESHOLD: usize = 10_000;
/// priority assigned to a process at `alloc()` time.
pub const DEFAULT_PRIORITY: usize = 10;

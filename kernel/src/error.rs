#[repr(isize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    AllocError = -1,
    InvalidPageError = -2,
    /// No free slot in the process table.
    OutOfProcess = -3,
    /// A pid passed to a mutator or introspection call does not name a live process.
    NoSuchProcess = -4,
    /// `wait()` was called by a process with no children.
    NoChildren = -5,
    /// The current process was killed while sleeping and must unwind to exit.
    Killed = -6,
    /// A syscall argument was out of the range the operation accepts.
    InvalidArgument = -7,
    /// Other invalid-page-table condition, kept distinct from `InvalidPageError`
    /// for the walk/lookup paths that report it.
    InvalidPte = -8,
    InvalidAddress = -9,
    /// Generic retained-filesystem-collaborator failure; this crate does not
    /// reimplement the file subsystem, so callers only need to know it failed.
    Fs = -10,
}

impl From<core::alloc::AllocError> for KernelError {
    fn from(_value: core::alloc::AllocError) -> Self {
        Self::AllocError
    }
}

impl KernelError {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelError::AllocError => "alloc error",
            KernelError::InvalidPageError => "invalid page",
            KernelError::OutOfProcess => "out of processes",
            KernelError::NoSuchProcess => "no such process",
            KernelError::NoChildren => "no children",
            KernelError::Killed => "process killed",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::InvalidPte => "invalid page table entry",
            KernelError::InvalidAddress => "invalid address",
            KernelError::Fs => "filesystem error",
        }
    }
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

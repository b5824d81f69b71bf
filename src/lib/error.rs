// Kernel error taxonomy and its wire encoding across the syscall boundary.

use core::fmt;

/// The closed set of recoverable kernel errors. Every public fallible
/// function in this crate returns `Result<T, KernelError>`; structural
/// violations (OOM, double-free, lock misuse) go through `kernel_halt`
/// instead of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    InvalidArgument,
    BadDescriptor,
    TooManyOpen,
    Busy,
    NotFound,
    IoError,
    BadFormat,
    Unsupported,
}

impl KernelError {
    /// Negative ABI value returned in `a0` across the syscall boundary.
    pub const fn as_errno(self) -> isize {
        -(match self {
            KernelError::InvalidArgument => Errno::EINVAL,
            KernelError::BadDescriptor => Errno::EBADFD,
            KernelError::TooManyOpen => Errno::EMFILE,
            KernelError::Busy => Errno::EBUSY,
            KernelError::NotFound => Errno::ENOENT,
            KernelError::IoError => Errno::EIO,
            KernelError::BadFormat => Errno::EBADFMT,
            KernelError::Unsupported => Errno::ENOTSUP,
        } as isize)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KernelError::InvalidArgument => "invalid argument",
            KernelError::BadDescriptor => "bad descriptor",
            KernelError::TooManyOpen => "too many open",
            KernelError::Busy => "busy",
            KernelError::NotFound => "not found",
            KernelError::IoError => "i/o error",
            KernelError::BadFormat => "bad format",
            KernelError::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// The fixed wire set named in the ABI. Deliberately not a general POSIX
/// errno: only the eight codes the syscall surface can return exist here.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    EINVAL = 1,
    EBADFD = 2,
    EMFILE = 3,
    EBUSY = 4,
    EIO = 5,
    ENOTSUP = 6,
    ENOENT = 7,
    EBADFMT = 8,
}

pub type Result<T> = core::result::Result<T, KernelError>;

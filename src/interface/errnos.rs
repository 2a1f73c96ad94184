// Errno values and the syscall error convention.
//
// Every fallible operation in this crate returns `Result<T, i32>` where the
// error is the negated errno discriminant produced by `syscall_error`. A
// failure carries exactly one code from this table, never a wrapped or
// composite error; callers that need the errno back can recover it with
// `Errno::from_discriminant`.

#![allow(dead_code)]

#[repr(i32)]
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum Errno {
    EPERM = 1,        //Operation not permitted
    ENOENT = 2,       //No such file or directory
    EINTR = 4,        //Interrupted system call
    EIO = 5,          //I/O error
    EBADF = 9,        //Bad file number
    EAGAIN = 11,      //Try again
    ENOMEM = 12,      //Out of memory
    EACCES = 13,      //Permission denied
    EEXIST = 17,      //File exists
    EINVAL = 22,      //Invalid argument
    ENFILE = 23,      //File table overflow
    EMFILE = 24,      //Too many open files
    EPIPE = 32,       //Broken pipe
    ENAMETOOLONG = 36, //File name too long
    ENOSYS = 38,      //Function not implemented
    ENOTSOCK = 88,    //Socket operation on non-socket
    EDESTADDRREQ = 89, //Destination address required
    EMSGSIZE = 90,    //Message too long
    EPROTONOSUPPORT = 93, //Protocol not supported
    ENOPROTOOPT = 92, //Protocol not available
    EOPNOTSUPP = 95,  //Operation not supported on transport endpoint
    EAFNOSUPPORT = 97, //Address family not supported by protocol
    EADDRINUSE = 98,  //Address already in use
    EADDRNOTAVAIL = 99, //Cannot assign requested address
    ENETUNREACH = 101, //Network is unreachable
    ECONNRESET = 104, //Connection reset by peer
    EISCONN = 106,    //Transport endpoint is already connected
    ENOTCONN = 107,   //Transport endpoint is not connected
    ESHUTDOWN = 108,  //Cannot send after transport endpoint shutdown
    ETIMEDOUT = 110,  //Connection timed out
    ECONNREFUSED = 111, //Connection refused
    EINPROGRESS = 115, //Operation now in progress
}

impl Errno {
    pub fn from_discriminant(discriminant: i32) -> Result<Self, ()> {
        match discriminant {
            1 => Ok(Self::EPERM),
            2 => Ok(Self::ENOENT),
            4 => Ok(Self::EINTR),
            5 => Ok(Self::EIO),
            9 => Ok(Self::EBADF),
            11 => Ok(Self::EAGAIN),
            12 => Ok(Self::ENOMEM),
            13 => Ok(Self::EACCES),
            17 => Ok(Self::EEXIST),
            22 => Ok(Self::EINVAL),
            23 => Ok(Self::ENFILE),
            24 => Ok(Self::EMFILE),
            32 => Ok(Self::EPIPE),
            36 => Ok(Self::ENAMETOOLONG),
            38 => Ok(Self::ENOSYS),
            88 => Ok(Self::ENOTSOCK),
            89 => Ok(Self::EDESTADDRREQ),
            90 => Ok(Self::EMSGSIZE),
            92 => Ok(Self::ENOPROTOOPT),
            93 => Ok(Self::EPROTONOSUPPORT),
            95 => Ok(Self::EOPNOTSUPP),
            97 => Ok(Self::EAFNOSUPPORT),
            98 => Ok(Self::EADDRINUSE),
            99 => Ok(Self::EADDRNOTAVAIL),
            101 => Ok(Self::ENETUNREACH),
            104 => Ok(Self::ECONNRESET),
            106 => Ok(Self::EISCONN),
            107 => Ok(Self::ENOTCONN),
            108 => Ok(Self::ESHUTDOWN),
            110 => Ok(Self::ETIMEDOUT),
            111 => Ok(Self::ECONNREFUSED),
            115 => Ok(Self::EINPROGRESS),
            _ => Err(()),
        }
    }
}

/// Builds the return value for a failed syscall-level operation: the negated
/// errno discriminant. The syscall name and message only feed the log.
pub fn syscall_error(e: Errno, syscall: &str, message: &str) -> i32 {
    log::debug!("errno {:?} in {}: {}", e, syscall, message);
    -(e as i32)
}

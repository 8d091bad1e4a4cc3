// Tue Oct 13 2026 - Alex

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protection {
    None = 0,
    Read = 1,
    Write = 2,
    Execute = 4,
    ReadWrite = 3,
    ReadExecute = 5,
    ReadWriteExecute = 7,
}

impl Protection {
    pub fn from_flags(flags: u32) -> Self {
        match flags & 7 {
            1 => Self::Read,
            2 => Self::Write,
            3 => Self::ReadWrite,
            4 => Self::Execute,
            5 => Self::ReadExecute,
            7 => Self::ReadWriteExecute,
            _ => Self::None,
        }
    }

    /// ELF `p_flags` use X=1, W=2, R=4, the reverse of our bit order.
    pub fn from_elf_flags(p_flags: u32) -> Self {
        let mut flags = 0;
        if p_flags & 4 != 0 {
            flags |= 1;
        }
        if p_flags & 2 != 0 {
            flags |= 2;
        }
        if p_flags & 1 != 0 {
            flags |= 4;
        }
        // write+execute without read does not occur in practice
        if flags == 6 {
            flags = 7;
        }
        Self::from_flags(flags)
    }

    pub fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite | Self::ReadExecute | Self::ReadWriteExecute)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite | Self::ReadWriteExecute)
    }

    pub fn can_execute(self) -> bool {
        matches!(self, Self::Execute | Self::ReadExecute | Self::ReadWriteExecute)
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "---"),
            Self::Read => write!(f, "r--"),
            Self::Write => write!(f, "-w-"),
            Self::Execute => write!(f, "--x"),
            Self::ReadWrite => write!(f, "rw-"),
            Self::ReadExecute => write!(f, "r-x"),
            Self::ReadWriteExecute => write!(f, "rwx"),
        }
    }
}

//! 系统调用编号。用户程序以陷入指令发起，
//! 调用号与参数的寄存器约定见 [`crate::registers`]。

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Join = 3,
    Create = 4,
    Open = 5,
    Read = 6,
    Write = 7,
    Close = 8,
    Fork = 9,
    Yield = 10,
    MkDir = 11,
    RmDir = 12,
    Remove = 13,
    Ls = 14,
    Pwd = 15,
    Cd = 16,
    Help = 17,
}

impl TryFrom<i32> for Syscall {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, i32> {
        Ok(match code {
            0 => Self::Halt,
            1 => Self::Exit,
            2 => Self::Exec,
            3 => Self::Join,
            4 => Self::Create,
            5 => Self::Open,
            6 => Self::Read,
            7 => Self::Write,
            8 => Self::Close,
            9 => Self::Fork,
            10 => Self::Yield,
            11 => Self::MkDir,
            12 => Self::RmDir,
            13 => Self::Remove,
            14 => Self::Ls,
            15 => Self::Pwd,
            16 => Self::Cd,
            17 => Self::Help,
            unknown => return Err(unknown),
        })
    }
}

//! 用户态执行可能抛出的异常。
//! 内核只恢复 [`Exception::PageFault`]（重填 TLB 后重试指令），
//! 其余异常上抛给异常处理入口，终止肇事的用户线程。

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// 未对齐的访存
    AddressError,
    /// TLB 缺失；页可能在内存里，只是不在 TLB 里
    PageFault,
    /// 对只读页的写
    ReadOnly,
    /// 翻译出的页框越界
    BusError,
    /// 用户程序主动陷入
    Syscall,
    IllegalInstr,
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AddressError => "address error",
            Self::PageFault => "page fault",
            Self::ReadOnly => "read-only violation",
            Self::BusError => "bus error",
            Self::Syscall => "syscall",
            Self::IllegalInstr => "illegal instruction",
        };
        f.write_str(name)
    }
}

//! 核心运行计数，停机时汇报一次

use core::fmt;

#[derive(Debug, Default)]
pub struct Stats {
    pub tlb_hits: u64,
    pub tlb_misses: u64,
    /// 从后备存储换入的页数
    pub page_ins: u64,
    /// 写回后备存储的脏页数
    pub page_outs: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tlb hits {}, misses {}; pages in {}, out {}",
            self.tlb_hits, self.tlb_misses, self.page_ins, self.page_outs
        )
    }
}

//! # TLB
//!
//! 定长的联想翻译缓存。每次用户访存都先线性查找
//! 匹配虚页号的有效表项，查不到就抛缺页异常，
//! 由异常处理程序挑一个槽位重填，再重试原指令。
//!
//! 受害者槽位的挑选策略可选：FIFO 看进入时刻，LRU 看命中时刻；
//! 两者都优先使用无效槽位。

use enumflags2::{bitflags, BitFlags};

/// 翻译表项的标志位
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PteFlag {
    Valid = 0b0001,
    Dirty = 0b0010,
    /// 最近被访问过（读或写）
    Use = 0b0100,
    ReadOnly = 0b1000,
}

/// 翻译表项，TLB 与线性页表共用此形状
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslationEntry {
    pub virtual_page: usize,
    pub physical_page: usize,
    pub flags: BitFlags<PteFlag>,
    /// 进入 TLB 的时刻
    pub in_time: u64,
    /// 最近一次命中的时刻
    pub last_hit_time: u64,
}

impl TranslationEntry {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags.contains(PteFlag::Valid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbPolicy {
    Fifo,
    Lru,
}

pub struct Tlb {
    entries: Vec<TranslationEntry>,
    policy: TlbPolicy,
}

impl Tlb {
    pub fn new(size: usize, policy: TlbPolicy) -> Self {
        Self {
            entries: vec![TranslationEntry::default(); size],
            policy,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 匹配虚页号的有效槽位
    pub fn find_slot(&self, vpn: usize) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.is_valid() && entry.virtual_page == vpn)
    }

    /// 重填时挑选的受害者槽位
    pub fn victim_slot(&self) -> usize {
        let mut victim = 0;
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.is_valid() {
                return i;
            }
            let (fresh, stale) = match self.policy {
                TlbPolicy::Fifo => (entry.in_time, self.entries[victim].in_time),
                TlbPolicy::Lru => (entry.last_hit_time, self.entries[victim].last_hit_time),
            };
            if fresh < stale {
                victim = i;
            }
        }
        victim
    }

    #[inline]
    pub fn entry(&self, slot: usize) -> TranslationEntry {
        self.entries[slot]
    }

    #[inline]
    pub fn entry_mut(&mut self, slot: usize) -> &mut TranslationEntry {
        &mut self.entries[slot]
    }

    #[inline]
    pub fn install(&mut self, slot: usize, entry: TranslationEntry) {
        self.entries[slot] = entry;
    }

    /// 失效所有映射到页框 `ppn` 的槽位
    pub fn invalidate_frame(&mut self, ppn: usize) {
        for entry in &mut self.entries {
            if entry.is_valid() && entry.physical_page == ppn {
                entry.flags.remove(PteFlag::Valid);
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        for entry in &mut self.entries {
            entry.flags.remove(PteFlag::Valid);
        }
    }
}

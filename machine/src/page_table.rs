//! # 页表
//!
//! 两种页表形态，经机器配置中的枚举切换：
//!
//! - 线性页表：每个地址空间一张，按虚页号下标；
//! - 倒排页表：全局一张按页框下标的物理页表，
//!   翻译时扫描页框找到给定虚页号。
//!
//! 物理页表同时是页框归属的唯一登记处：页框以稳定的
//! 线程号记录属主，不持有线程本体。

use crate::machine::ThreadId;
use crate::tlb::{PteFlag, TranslationEntry};

/// 页表形态的切换开关
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTableKind {
    Linear,
    Inverted,
}

/// 每空间的线性页表
pub struct PageTable {
    entries: Vec<TranslationEntry>,
}

impl PageTable {
    pub fn new(num_pages: usize) -> Self {
        let entries = (0..num_pages)
            .map(|vpn| TranslationEntry {
                virtual_page: vpn,
                ..TranslationEntry::default()
            })
            .collect();
        Self { entries }
    }

    /// 有效表项的副本
    pub fn get(&self, vpn: usize) -> Option<TranslationEntry> {
        let entry = self.entries[vpn];
        entry.is_valid().then_some(entry)
    }

    #[inline]
    pub fn entry(&self, vpn: usize) -> &TranslationEntry {
        &self.entries[vpn]
    }

    #[inline]
    pub fn set(&mut self, vpn: usize, entry: TranslationEntry) {
        self.entries[vpn] = entry;
    }

    pub fn set_dirty(&mut self, vpn: usize) {
        self.entries[vpn].flags |= PteFlag::Dirty;
    }

    pub fn invalidate(&mut self, vpn: usize) {
        self.entries[vpn].flags.remove(PteFlag::Valid);
    }
}

/// 全局物理页表的表项，按页框号下标
#[derive(Debug, Clone, Copy, Default)]
pub struct PhysPage {
    pub valid: bool,
    pub dirty: bool,
    pub last_hit_time: u64,
    pub virtual_page: usize,
    /// 属主线程的稳定编号；页框同一时刻至多属于一个地址空间
    pub owner: Option<ThreadId>,
}

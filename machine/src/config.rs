//! Constants and configuration for the emulated machine.

use crate::page_table::PageTableKind;
use crate::tlb::TlbPolicy;

/// 页大小与扇区大小一致，页可整存整取
pub const PAGE_SIZE: usize = sector_fs::config::SECTOR_SIZE;

pub const DEFAULT_NUM_PHYS_PAGES: usize = 32;
pub const DEFAULT_TLB_SIZE: usize = 4;

/// 机器的可配置参数，构造时一次给定
#[derive(Clone, Copy)]
pub struct MachineConfig {
    pub num_phys_pages: usize,
    pub tlb_size: usize,
    pub tlb_policy: TlbPolicy,
    pub table_kind: PageTableKind,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            num_phys_pages: DEFAULT_NUM_PHYS_PAGES,
            tlb_size: DEFAULT_TLB_SIZE,
            tlb_policy: TlbPolicy::Lru,
            table_kind: PageTableKind::Linear,
        }
    }
}

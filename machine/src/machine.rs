//! # 机器本体
//!
//! 虚拟地址到物理地址的翻译走「TLB 优先」路线：
//! 每次访存先做对齐检查，再线性查 TLB；命中即检查只读位、
//! 校验页框范围、登记 use/dirty 位与命中时刻；缺失则抛缺页异常。
//! [`read_mem`](Machine::read_mem) / [`write_mem`](Machine::write_mem)
//! 内部恢复缺页：重填一个 TLB 槽位后重试翻译，其余异常原样上抛。
//!
//! 页不在内存时由 [`allocate_physical_page`](Machine::allocate_physical_page)
//! 取页框：优先无效页框，否则按全局 LRU 换出受害者——
//! 失效其 TLB 槽位与属主页表项，脏页先写回属主的后备存储，
//! 再从当前线程的后备存储读入所需页。
//!
//! 用户可见的字是小端的；宿主同为小端时翻译即恒等。
//! 翻译全程不阻塞，只会抛异常，因此无须加锁。

use log::{debug, trace};

use crate::address_space::AddressSpace;
use crate::backing::BackingStore;
use crate::config::{MachineConfig, PAGE_SIZE};
use crate::exception::Exception;
use crate::page_table::{PageTableKind, PhysPage};
use crate::registers::Registers;
use crate::stats::Stats;
use crate::tlb::{PteFlag, Tlb, TranslationEntry};

/// 线程的稳定编号；线程表是线程的唯一属主，
/// 页框只借编号指认属主
pub type ThreadId = usize;

pub struct Machine {
    main_memory: Vec<u8>,
    tlb: Tlb,
    /// 全局物理页表，按页框号下标
    phys_pages: Vec<PhysPage>,
    /// 线程编号到地址空间的登记表
    spaces: Vec<Option<AddressSpace>>,
    current: ThreadId,
    table_kind: PageTableKind,
    /// 单调时刻，驱动 FIFO/LRU 的先后判断
    ticks: u64,
    pub stats: Stats,
    pub registers: Registers,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            main_memory: vec![0; config.num_phys_pages * PAGE_SIZE],
            tlb: Tlb::new(config.tlb_size, config.tlb_policy),
            phys_pages: vec![PhysPage::default(); config.num_phys_pages],
            spaces: Vec::new(),
            current: 0,
            table_kind: config.table_kind,
            ticks: 0,
            stats: Stats::default(),
            registers: Registers::default(),
        }
    }

    /// 登记一个地址空间，返回其线程编号
    pub fn create_space(&mut self, num_pages: usize, backing: BackingStore) -> ThreadId {
        let space = AddressSpace::new(num_pages, backing);
        match self.spaces.iter().position(Option::is_none) {
            Some(tid) => {
                self.spaces[tid] = Some(space);
                tid
            }
            None => {
                self.spaces.push(Some(space));
                self.spaces.len() - 1
            }
        }
    }

    /// 切换当前线程。TLB 内容只对当前地址空间有效，
    /// 切换前把有效表项写回页表并整体失效。
    pub fn set_current(&mut self, tid: ThreadId) {
        assert!(
            self.spaces.get(tid).is_some_and(Option::is_some),
            "no such address space: {tid}"
        );
        if tid != self.current {
            self.flush_tlb();
            self.current = tid;
        }
    }

    #[inline]
    pub fn current(&self) -> ThreadId {
        self.current
    }

    /// 线程退出时收回其页框与页表项
    pub fn destroy_space(&mut self, tid: ThreadId) {
        if tid == self.current {
            self.tlb.invalidate_all();
        }
        for frame in &mut self.phys_pages {
            if frame.owner == Some(tid) {
                frame.valid = false;
                frame.owner = None;
            }
        }
        self.spaces[tid] = None;
    }

    /// 读 1/2/4 字节虚拟内存。缺页在内部恢复后重试，
    /// 其余异常上抛。
    pub fn read_mem(&mut self, addr: usize, size: usize) -> Result<u32, Exception> {
        trace!("reading VA {addr:#x}, size {size}");
        let phys = self.translate_with_refill(addr, size, false)?;
        Ok(match size {
            1 => self.main_memory[phys] as u32,
            2 => {
                u16::from_le_bytes(self.main_memory[phys..phys + 2].try_into().unwrap()) as u32
            }
            4 => u32::from_le_bytes(self.main_memory[phys..phys + 4].try_into().unwrap()),
            _ => panic!("invalid read size {size}"),
        })
    }

    /// 写 1/2/4 字节虚拟内存
    pub fn write_mem(&mut self, addr: usize, size: usize, value: u32) -> Result<(), Exception> {
        trace!("writing VA {addr:#x}, size {size}, value {value:#x}");
        let phys = self.translate_with_refill(addr, size, true)?;
        match size {
            1 => self.main_memory[phys] = value as u8,
            2 => self.main_memory[phys..phys + 2]
                .copy_from_slice(&(value as u16).to_le_bytes()),
            4 => self.main_memory[phys..phys + 4].copy_from_slice(&value.to_le_bytes()),
            _ => panic!("invalid write size {size}"),
        }
        Ok(())
    }

    /// 单步翻译。命中时登记 use/dirty 位与命中时刻，
    /// 缺失时抛 [`Exception::PageFault`]，交由重填路径恢复。
    pub fn translate(
        &mut self,
        virt_addr: usize,
        size: usize,
        writing: bool,
    ) -> Result<usize, Exception> {
        if (size == 4 && virt_addr & 0x3 != 0) || (size == 2 && virt_addr & 0x1 != 0) {
            debug!("alignment problem at {virt_addr:#x}, size {size}");
            return Err(Exception::AddressError);
        }
        let vpn = virt_addr / PAGE_SIZE;
        let offset = virt_addr % PAGE_SIZE;

        let Some(slot) = self.tlb.find_slot(vpn) else {
            self.stats.tlb_misses += 1;
            return Err(Exception::PageFault);
        };
        self.stats.tlb_hits += 1;

        let entry = self.tlb.entry(slot);
        if entry.flags.contains(PteFlag::ReadOnly) && writing {
            debug!("{virt_addr:#x} mapped read-only in TLB");
            return Err(Exception::ReadOnly);
        }
        let frame = entry.physical_page;
        // 页框越界说明页表或 TLB 被装入了非法翻译
        if frame >= self.phys_pages.len() {
            debug!("frame {frame} out of range");
            return Err(Exception::BusError);
        }

        let now = self.tick();
        {
            let entry = self.tlb.entry_mut(slot);
            entry.flags |= PteFlag::Use;
            if writing {
                entry.flags |= PteFlag::Dirty;
            }
            entry.last_hit_time = now;
        }
        if writing {
            if let PageTableKind::Linear = self.table_kind {
                self.current_space_mut().page_table.set_dirty(vpn);
            }
            self.phys_pages[frame].dirty = true;
        }
        self.phys_pages[frame].last_hit_time = now;

        let phys_addr = frame * PAGE_SIZE + offset;
        assert!(phys_addr + size <= self.main_memory.len());
        Ok(phys_addr)
    }

    /// 缺页恢复：挑受害者槽位、写回被换出的表项、
    /// 从页表（必要时先分配页框）装入新翻译。
    pub fn refill_tlb(&mut self, virt_addr: usize) -> Result<(), Exception> {
        let vpn = virt_addr / PAGE_SIZE;
        if vpn >= self.current_space().num_pages {
            debug!("vpn {vpn} beyond the current address space");
            return Err(Exception::AddressError);
        }

        let slot = self.tlb.victim_slot();
        let old = self.tlb.entry(slot);
        if old.is_valid() {
            match self.table_kind {
                PageTableKind::Linear => {
                    self.current_space_mut().page_table.set(old.virtual_page, old);
                }
                PageTableKind::Inverted => {
                    // 倒排形态下页表即物理页表，只要记回脏位与时刻
                    let frame = &mut self.phys_pages[old.physical_page];
                    if old.flags.contains(PteFlag::Dirty) {
                        frame.dirty = true;
                    }
                    frame.last_hit_time = frame.last_hit_time.max(old.last_hit_time);
                }
            }
        }

        let mut entry = self.lookup_page_table(vpn);
        if entry.is_none() {
            self.allocate_physical_page(vpn);
            entry = self.lookup_page_table(vpn);
        }
        let mut entry = entry.expect("page table entry must exist after frame allocation");

        let now = self.tick();
        entry.in_time = now;
        entry.last_hit_time = now;
        self.tlb.install(slot, entry);
        Ok(())
    }

    /// 为虚页 `vpn` 取一个页框，必要时换出受害者，返回页框号
    pub fn allocate_physical_page(&mut self, vpn: usize) -> usize {
        // 受害者：首个无效页框，否则全局 LRU
        let mut ppn = 0;
        for i in 0..self.phys_pages.len() {
            if !self.phys_pages[i].valid {
                ppn = i;
                break;
            }
            if self.phys_pages[i].last_hit_time < self.phys_pages[ppn].last_hit_time {
                ppn = i;
            }
        }

        if self.phys_pages[ppn].valid {
            let old_vpn = self.phys_pages[ppn].virtual_page;
            let owner = self.phys_pages[ppn].owner;
            debug!("evicting frame {ppn} (vpn {old_vpn} of thread {owner:?}) for vpn {vpn}");

            // 凡是映射到该页框的 TLB 槽位先失效
            self.tlb.invalidate_frame(ppn);
            if let Some(owner) = owner {
                let dirty = self.phys_pages[ppn].dirty;
                if let Some(space) = self.spaces[owner].as_mut() {
                    if let PageTableKind::Linear = self.table_kind {
                        space.page_table.invalidate(old_vpn);
                    }
                    if dirty {
                        // 脏页写回属主的后备存储
                        let mut page = [0u8; PAGE_SIZE];
                        page.copy_from_slice(&self.main_memory[ppn * PAGE_SIZE..][..PAGE_SIZE]);
                        space.backing.write_page(old_vpn, &page);
                        self.stats.page_outs += 1;
                    }
                }
            }
        }

        // 从当前线程的后备存储换入
        let mut page = [0u8; PAGE_SIZE];
        self.spaces[self.current]
            .as_mut()
            .expect("no current address space")
            .backing
            .read_page(vpn, &mut page);
        self.main_memory[ppn * PAGE_SIZE..][..PAGE_SIZE].copy_from_slice(&page);
        self.stats.page_ins += 1;

        let now = self.tick();
        self.phys_pages[ppn] = PhysPage {
            valid: true,
            dirty: false,
            last_hit_time: now,
            virtual_page: vpn,
            owner: Some(self.current),
        };
        if let PageTableKind::Linear = self.table_kind {
            let read_only = self.current_space().is_read_only(vpn);
            let mut flags = PteFlag::Valid.into();
            if read_only {
                flags |= PteFlag::ReadOnly;
            }
            self.current_space_mut().page_table.set(
                vpn,
                TranslationEntry {
                    virtual_page: vpn,
                    physical_page: ppn,
                    flags,
                    in_time: now,
                    last_hit_time: now,
                },
            );
        }
        debug!("vpn {vpn} -> frame {ppn}");
        ppn
    }

    #[inline]
    pub fn space(&self, tid: ThreadId) -> &AddressSpace {
        self.spaces[tid].as_ref().expect("no such address space")
    }

    #[inline]
    pub fn space_mut(&mut self, tid: ThreadId) -> &mut AddressSpace {
        self.spaces[tid].as_mut().expect("no such address space")
    }

    #[inline]
    pub fn phys_page(&self, ppn: usize) -> &PhysPage {
        &self.phys_pages[ppn]
    }

    #[inline]
    pub fn memory(&self) -> &[u8] {
        &self.main_memory
    }
}

impl Machine {
    fn tick(&mut self) -> u64 {
        self.ticks += 1;
        self.ticks
    }

    /// 缺页由此路恢复并重试；重填本身还可能再缺页一次
    /// （页表项刚换入），故至多重试两轮
    fn translate_with_refill(
        &mut self,
        addr: usize,
        size: usize,
        writing: bool,
    ) -> Result<usize, Exception> {
        let mut attempts = 0;
        loop {
            match self.translate(addr, size, writing) {
                Err(Exception::PageFault) if attempts < 2 => {
                    attempts += 1;
                    self.refill_tlb(addr)?;
                }
                result => return result,
            }
        }
    }

    /// 当前地址空间中 `vpn` 的有效翻译
    fn lookup_page_table(&self, vpn: usize) -> Option<TranslationEntry> {
        match self.table_kind {
            PageTableKind::Linear => self.current_space().page_table.get(vpn),
            PageTableKind::Inverted => {
                // 扫描页框找属于当前线程的对应虚页
                let (ppn, frame) = self
                    .phys_pages
                    .iter()
                    .enumerate()
                    .find(|(_, frame)| {
                        frame.valid
                            && frame.owner == Some(self.current)
                            && frame.virtual_page == vpn
                    })?;
                let mut flags = PteFlag::Valid.into();
                if frame.dirty {
                    flags |= PteFlag::Dirty;
                }
                if self.current_space().is_read_only(vpn) {
                    flags |= PteFlag::ReadOnly;
                }
                Some(TranslationEntry {
                    virtual_page: vpn,
                    physical_page: ppn,
                    flags,
                    in_time: 0,
                    last_hit_time: frame.last_hit_time,
                })
            }
        }
    }

    fn flush_tlb(&mut self) {
        for slot in 0..self.tlb.len() {
            let entry = self.tlb.entry(slot);
            if !entry.is_valid() {
                continue;
            }
            match self.table_kind {
                PageTableKind::Linear => {
                    self.current_space_mut().page_table.set(entry.virtual_page, entry);
                }
                PageTableKind::Inverted => {
                    let frame = &mut self.phys_pages[entry.physical_page];
                    if entry.flags.contains(PteFlag::Dirty) {
                        frame.dirty = true;
                    }
                }
            }
        }
        self.tlb.invalidate_all();
    }

    fn current_space(&self) -> &AddressSpace {
        self.spaces[self.current]
            .as_ref()
            .expect("no current address space")
    }

    fn current_space_mut(&mut self) -> &mut AddressSpace {
        self.spaces[self.current]
            .as_mut()
            .expect("no current address space")
    }
}

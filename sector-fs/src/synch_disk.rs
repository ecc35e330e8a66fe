//! # 同步磁盘层
//!
//! 物理磁盘是异步设备：请求立即返回，完成时以中断通知。
//! 本层用互斥锁串行化设备请求，用信号量等待完成中断，
//! 向上提供阻塞式的 [`read_sector`](SynchDisk::read_sector) /
//! [`write_sector`](SynchDisk::write_sector)。
//!
//! 互斥锁之上再叠一层写回式扇区缓存：命中只动内存，
//! 未命中时挑选 lru 最小的槽位，脏则先刷回设备再换入。
//! 同一扇区至多占据一个缓存槽位，因此各线程看到的扇区内容一致。
//!
//! 此外，本层还托管以文件头扇区为粒度的读者写者协调与打开计数，
//! 供打开文件层与文件系统总控层使用。

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use log::trace;
use spin::Mutex;

use crate::block_dev::BlockDevice;
use crate::config::{CACHE_SIZE, NUM_SECTORS, SECTOR_SIZE};
use crate::sync::{Lock, Semaphore};
use crate::SectorBuf;

/// 扇区缓存项
struct CacheEntry {
    valid: bool,
    dirty: bool,
    sector: usize,
    /// 最近一次命中的单调时刻
    lru: u64,
    data: SectorBuf,
}

/// 以文件头扇区为粒度的并发协调状态
struct HeaderGate {
    /// 读者优先的读者写者互斥
    rw: Semaphore,
    readers: StdMutex<usize>,
    openers: StdMutex<usize>,
}

pub struct SynchDisk {
    device: Arc<dyn BlockDevice>,
    /// 设备一次只处理一个请求
    lock: Lock,
    /// 完成中断发出的信号
    semaphore: Semaphore,
    cache: Mutex<[CacheEntry; CACHE_SIZE]>,
    ticks: AtomicU64,
    gates: Vec<HeaderGate>,
}

impl SynchDisk {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            device,
            lock: Lock::new(),
            semaphore: Semaphore::new(0),
            cache: Mutex::new(core::array::from_fn(|_| CacheEntry::new())),
            ticks: AtomicU64::new(0),
            gates: (0..NUM_SECTORS).map(|_| HeaderGate::new()).collect(),
        }
    }

    /// 读出一个扇区，返回时数据已就绪
    pub fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let mut cache = self.cache.lock();
        let slot = match Self::lookup(&cache, sector) {
            Some(slot) => {
                trace!("cache hit for sector {sector}");
                slot
            }
            None => self.cache_miss(&mut cache, sector),
        };
        let entry = &mut cache[slot];
        buf.copy_from_slice(&entry.data);
        entry.lru = self.tick();
    }

    /// 写入一个扇区，返回时修改已进入缓存；刷回设备由换出或
    /// [`flush_all`](Self::flush_all) 完成
    pub fn write_sector(&self, sector: usize, buf: &[u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let mut cache = self.cache.lock();
        let slot = match Self::lookup(&cache, sector) {
            Some(slot) => {
                trace!("cache hit for sector {sector}");
                slot
            }
            // 先换入再覆写，保持部分写之下的扇区语义
            None => self.cache_miss(&mut cache, sector),
        };
        let entry = &mut cache[slot];
        entry.data.copy_from_slice(buf);
        entry.dirty = true;
        entry.lru = self.tick();
    }

    /// 把所有脏缓存项刷回设备
    pub fn flush_all(&self) {
        let mut cache = self.cache.lock();
        for entry in cache.iter_mut() {
            if entry.valid && entry.dirty {
                self.device_write(entry.sector, &entry.data);
                entry.dirty = false;
            }
        }
    }

    /// 完成中断处理：唤醒等待请求完成的线程
    pub fn request_done(&self) {
        self.semaphore.v();
    }
}

/// 读者写者协调与打开计数，均以文件头扇区为键
impl SynchDisk {
    pub fn start_read(&self, hdr_sector: usize) {
        trace!("waiting to read hdr sector {hdr_sector}");
        let gate = &self.gates[hdr_sector];
        let mut readers = gate.readers.lock().unwrap();
        if *readers == 0 {
            gate.rw.p();
        }
        *readers += 1;
        trace!("permitted to read hdr sector {hdr_sector}");
    }

    pub fn end_read(&self, hdr_sector: usize) {
        let gate = &self.gates[hdr_sector];
        let mut readers = gate.readers.lock().unwrap();
        *readers -= 1;
        if *readers == 0 {
            gate.rw.v();
        }
        trace!("read of hdr sector {hdr_sector} finished");
    }

    pub fn start_write(&self, hdr_sector: usize) {
        trace!("waiting to write hdr sector {hdr_sector}");
        self.gates[hdr_sector].rw.p();
        trace!("permitted to write hdr sector {hdr_sector}");
    }

    pub fn end_write(&self, hdr_sector: usize) {
        self.gates[hdr_sector].rw.v();
        trace!("write of hdr sector {hdr_sector} finished");
    }

    pub fn open(&self, hdr_sector: usize) {
        *self.gates[hdr_sector].openers.lock().unwrap() += 1;
    }

    pub fn close(&self, hdr_sector: usize) {
        *self.gates[hdr_sector].openers.lock().unwrap() -= 1;
    }

    /// 当前打开计数；调用者以此拒绝删除仍被打开的文件
    pub fn open_count(&self, hdr_sector: usize) -> usize {
        *self.gates[hdr_sector].openers.lock().unwrap()
    }
}

impl SynchDisk {
    fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed)
    }

    fn lookup(cache: &[CacheEntry; CACHE_SIZE], sector: usize) -> Option<usize> {
        cache
            .iter()
            .position(|entry| entry.valid && entry.sector == sector)
    }

    /// 换入 `sector`，返回其槽位。
    /// 受害者为首个无效槽位，否则 lru 最小者，同值取下标最小者。
    fn cache_miss(&self, cache: &mut [CacheEntry; CACHE_SIZE], sector: usize) -> usize {
        let mut victim = 0;
        for i in 0..CACHE_SIZE {
            if !cache[i].valid {
                victim = i;
                break;
            }
            if cache[i].lru < cache[victim].lru {
                victim = i;
            }
        }

        let entry = &mut cache[victim];
        if entry.valid && entry.dirty {
            trace!("evicting dirty sector {} from cache", entry.sector);
            self.device_write(entry.sector, &entry.data);
        }
        self.device_read(sector, &mut entry.data);
        entry.sector = sector;
        entry.valid = true;
        entry.dirty = false;
        entry.lru = self.tick();
        victim
    }

    fn device_read(&self, sector: usize, buf: &mut [u8]) {
        self.lock.acquire(); // 一次只有一个磁盘请求
        self.device.read_sector(sector, buf);
        self.request_done(); // 宿主设备同步完成，中断随即到来
        self.semaphore.p(); // 等待完成中断
        self.lock.release();
    }

    fn device_write(&self, sector: usize, buf: &[u8]) {
        self.lock.acquire();
        self.device.write_sector(sector, buf);
        self.request_done();
        self.semaphore.p();
        self.lock.release();
    }
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            valid: false,
            dirty: false,
            sector: 0,
            lru: 0,
            data: [0; SECTOR_SIZE],
        }
    }
}

impl HeaderGate {
    fn new() -> Self {
        Self {
            rw: Semaphore::new(1),
            readers: StdMutex::new(0),
            openers: StdMutex::new(0),
        }
    }
}

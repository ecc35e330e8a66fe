//! 文件头（索引节点）：恰好占据一个扇区。
//!
//! 布局：
//!
//! ```text
//! u32 num_bytes | u32 num_sectors
//! u32 data_sectors[NUM_DIRECT + NUM_SECOND_INDEX]
//! u8  create_time[25] | u8 visit_time[25] | u8 modify_time[25]
//! ```
//!
//! 前 `NUM_DIRECT` 个表项直接指向数据扇区，其余每项指向一个
//! 二级索引扇区，内装至多 `SECOND_DIRECT` 个数据扇区号。

use core::fmt;

use log::debug;

use crate::bitmap::Bitmap;
use crate::config::{
    MAX_FILE_SIZE, NUM_DIRECT, NUM_SECOND_INDEX, SECOND_DIRECT, SECTOR_SIZE, TIME_LEN,
};
use crate::synch_disk::SynchDisk;
use crate::time;
use crate::SectorBuf;

const NUM_INDEX: usize = NUM_DIRECT + NUM_SECOND_INDEX;

const DATA_SECTORS_OFFSET: usize = 8;
const CREATE_OFFSET: usize = DATA_SECTORS_OFFSET + 4 * NUM_INDEX;
const VISIT_OFFSET: usize = CREATE_OFFSET + TIME_LEN;
const MODIFY_OFFSET: usize = VISIT_OFFSET + TIME_LEN;

// 文件头必须放得进一个扇区
const _: () = assert!(MODIFY_OFFSET + TIME_LEN <= SECTOR_SIZE);

#[derive(Clone)]
pub struct FileHeader {
    /// 文件字节数
    num_bytes: u32,
    /// 已分配的数据扇区数
    num_sectors: u32,
    data_sectors: [u32; NUM_INDEX],
    create_time: [u8; TIME_LEN],
    visit_time: [u8; TIME_LEN],
    modify_time: [u8; TIME_LEN],
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            num_bytes: 0,
            num_sectors: 0,
            data_sectors: [0; NUM_INDEX],
            create_time: [0; TIME_LEN],
            visit_time: [0; TIME_LEN],
            modify_time: [0; TIME_LEN],
        }
    }

    /// 为新文件分配数据扇区。空间不足或超出单文件上限时
    /// 返回 false，且不触碰位图。
    pub fn allocate(&mut self, free_map: &mut Bitmap, file_size: usize, disk: &SynchDisk) -> bool {
        if file_size > MAX_FILE_SIZE {
            debug!("file size {file_size} > MAX_FILE_SIZE");
            return false;
        }
        let num_sectors = file_size.div_ceil(SECTOR_SIZE);
        if free_map.num_clear() < Self::total_sectors(file_size) {
            debug!("disk space not enough for {file_size} bytes");
            return false;
        }
        debug!("file size {file_size}, need {num_sectors} data sectors");
        self.num_bytes = file_size as u32;
        self.num_sectors = num_sectors as u32;

        if num_sectors <= NUM_DIRECT {
            for slot in self.data_sectors.iter_mut().take(num_sectors) {
                *slot = free_map.find().unwrap() as u32;
            }
            return true;
        }

        for slot in self.data_sectors.iter_mut().take(NUM_DIRECT) {
            *slot = free_map.find().unwrap() as u32;
        }
        let mut left = num_sectors - NUM_DIRECT;
        let mut bucket = 0;
        while left > 0 {
            let index_sector = free_map.find().unwrap();
            self.data_sectors[NUM_DIRECT + bucket] = index_sector as u32;
            let take = left.min(SECOND_DIRECT);
            let mut slots = [0u32; SECOND_DIRECT];
            for slot in slots.iter_mut().take(take) {
                *slot = free_map.find().unwrap() as u32;
            }
            disk.write_sector(index_sector, &encode_index(&slots));
            debug!("second index {bucket} at sector {index_sector}, {take} slots");
            left -= take;
            bucket += 1;
        }
        true
    }

    /// 归还本文件占据的所有数据扇区与二级索引扇区
    pub fn deallocate(&self, free_map: &mut Bitmap, disk: &SynchDisk) {
        let num_sectors = self.num_sectors as usize;
        let direct = num_sectors.min(NUM_DIRECT);
        for &sector in &self.data_sectors[..direct] {
            assert!(free_map.test(sector as usize), "sector {sector} ought to be marked");
            free_map.clear(sector as usize);
        }
        if num_sectors <= NUM_DIRECT {
            return;
        }

        let mut left = num_sectors - NUM_DIRECT;
        let mut bucket = 0;
        while left > 0 {
            let index_sector = self.data_sectors[NUM_DIRECT + bucket] as usize;
            let mut buf = [0u8; SECTOR_SIZE];
            disk.read_sector(index_sector, &mut buf);
            let slots = decode_index(&buf);
            let take = left.min(SECOND_DIRECT);
            for &sector in &slots[..take] {
                assert!(free_map.test(sector as usize), "sector {sector} ought to be marked");
                free_map.clear(sector as usize);
            }
            assert!(free_map.test(index_sector));
            free_map.clear(index_sector);
            left -= take;
            bucket += 1;
        }
    }

    /// 文件内偏移所在的数据扇区号
    pub fn byte_to_sector(&self, offset: usize, disk: &SynchDisk) -> usize {
        let sector_offset = offset / SECTOR_SIZE;
        if sector_offset < NUM_DIRECT {
            return self.data_sectors[sector_offset] as usize;
        }
        let bucket = (sector_offset - NUM_DIRECT) / SECOND_DIRECT;
        let slot = (sector_offset - NUM_DIRECT) % SECOND_DIRECT;
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(self.data_sectors[NUM_DIRECT + bucket] as usize, &mut buf);
        decode_index(&buf)[slot] as usize
    }

    /// 就地扩展 `extra_sectors` 个数据扇区并把文件长度改为
    /// `new_num_bytes`。空间不足时在分配之前失败，位图不变；
    /// 成功后由调用者负责把位图与文件头写回磁盘。
    pub fn extend_length(
        &mut self,
        new_num_bytes: usize,
        extra_sectors: usize,
        free_map: &mut Bitmap,
        disk: &SynchDisk,
    ) -> bool {
        debug_assert!(new_num_bytes as u32 >= self.num_bytes);
        let current = self.num_sectors as usize;
        let target = current + extra_sectors;
        if target > NUM_DIRECT + NUM_SECOND_INDEX * SECOND_DIRECT {
            return false;
        }
        let index_needed = index_sectors(target) - index_sectors(current);
        if free_map.num_clear() < extra_sectors + index_needed {
            debug!("disk space not enough to extend by {extra_sectors} sectors");
            return false;
        }

        let mut left = extra_sectors;
        // 一级索引还有空位的话，一定要先用起来
        while (self.num_sectors as usize) < NUM_DIRECT && left > 0 {
            let i = self.num_sectors as usize;
            self.data_sectors[i] = free_map.find().unwrap() as u32;
            self.num_sectors += 1;
            left -= 1;
            debug!("using direct slot {i} -> {}", self.data_sectors[i]);
        }

        for bucket in 0..NUM_SECOND_INDEX {
            if left == 0 {
                break;
            }
            let used = self.num_sectors as usize;
            if used == NUM_DIRECT + bucket * SECOND_DIRECT {
                // 新开一个二级索引扇区
                let index_sector = free_map.find().unwrap();
                self.data_sectors[NUM_DIRECT + bucket] = index_sector as u32;
                let mut slots = [0u32; SECOND_DIRECT];
                let mut j = 0;
                while j < SECOND_DIRECT && left > 0 {
                    slots[j] = free_map.find().unwrap() as u32;
                    self.num_sectors += 1;
                    left -= 1;
                    j += 1;
                }
                disk.write_sector(index_sector, &encode_index(&slots));
                debug!("opened second index {bucket} at sector {index_sector}");
            } else if used > NUM_DIRECT + bucket * SECOND_DIRECT
                && used < NUM_DIRECT + (bucket + 1) * SECOND_DIRECT
            {
                // 该二级索引尚有空槽，从断点处继续填
                let index_sector = self.data_sectors[NUM_DIRECT + bucket] as usize;
                let mut buf = [0u8; SECTOR_SIZE];
                disk.read_sector(index_sector, &mut buf);
                let mut slots = decode_index(&buf);
                let mut j = (used - NUM_DIRECT) % SECOND_DIRECT;
                while j < SECOND_DIRECT && left > 0 {
                    slots[j] = free_map.find().unwrap() as u32;
                    self.num_sectors += 1;
                    left -= 1;
                    j += 1;
                }
                disk.write_sector(index_sector, &encode_index(&slots));
            }
        }

        debug_assert_eq!(left, 0);
        self.num_bytes = new_num_bytes as u32;
        true
    }

    pub fn fetch_from(sector: usize, disk: &SynchDisk) -> Self {
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(sector, &mut buf);
        Self::from_sector(&buf)
    }

    pub fn write_back(&self, sector: usize, disk: &SynchDisk) {
        disk.write_sector(sector, &self.to_sector());
    }

    #[inline]
    pub fn file_length(&self) -> usize {
        self.num_bytes as usize
    }

    #[inline]
    pub fn num_sectors(&self) -> usize {
        self.num_sectors as usize
    }

    /// 已使用的一级索引表项
    pub fn direct_sectors(&self) -> &[u32] {
        &self.data_sectors[..(self.num_sectors as usize).min(NUM_DIRECT)]
    }

    pub fn set_create_time(&mut self, secs: u64) {
        time::format_utc(secs, &mut self.create_time);
    }

    pub fn set_visit_time(&mut self, secs: u64) {
        time::format_utc(secs, &mut self.visit_time);
    }

    pub fn set_modify_time(&mut self, secs: u64) {
        time::format_utc(secs, &mut self.modify_time);
    }

    /// 容纳 `file_size` 字节所需的扇区总数，数据扇区与
    /// 二级索引扇区都计入，文件头自身不计
    pub fn total_sectors(file_size: usize) -> usize {
        let data = file_size.div_ceil(SECTOR_SIZE);
        data + index_sectors(data)
    }
}

impl FileHeader {
    fn from_sector(buf: &SectorBuf) -> Self {
        let mut hdr = Self::new();
        hdr.num_bytes = read_u32(buf, 0);
        hdr.num_sectors = read_u32(buf, 4);
        for (i, slot) in hdr.data_sectors.iter_mut().enumerate() {
            *slot = read_u32(buf, DATA_SECTORS_OFFSET + 4 * i);
        }
        hdr.create_time
            .copy_from_slice(&buf[CREATE_OFFSET..CREATE_OFFSET + TIME_LEN]);
        hdr.visit_time
            .copy_from_slice(&buf[VISIT_OFFSET..VISIT_OFFSET + TIME_LEN]);
        hdr.modify_time
            .copy_from_slice(&buf[MODIFY_OFFSET..MODIFY_OFFSET + TIME_LEN]);
        hdr
    }

    fn to_sector(&self) -> SectorBuf {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..4].copy_from_slice(&self.num_bytes.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_sectors.to_le_bytes());
        for (i, slot) in self.data_sectors.iter().enumerate() {
            let at = DATA_SECTORS_OFFSET + 4 * i;
            buf[at..at + 4].copy_from_slice(&slot.to_le_bytes());
        }
        buf[CREATE_OFFSET..CREATE_OFFSET + TIME_LEN].copy_from_slice(&self.create_time);
        buf[VISIT_OFFSET..VISIT_OFFSET + TIME_LEN].copy_from_slice(&self.visit_time);
        buf[MODIFY_OFFSET..MODIFY_OFFSET + TIME_LEN].copy_from_slice(&self.modify_time);
        buf
    }

    fn time_str(field: &[u8; TIME_LEN]) -> &str {
        let len = field.iter().position(|&b| b == 0).unwrap_or(TIME_LEN - 1);
        core::str::from_utf8(&field[..len]).unwrap_or("")
    }
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file size: {}. blocks:", self.num_bytes)?;
        for &sector in self.direct_sectors() {
            write!(f, " {sector}")?;
        }
        for bucket in 0..index_sectors(self.num_sectors as usize) {
            write!(f, " [index {}]", self.data_sectors[NUM_DIRECT + bucket])?;
        }
        writeln!(f)?;
        writeln!(f, "create time: {}", Self::time_str(&self.create_time))?;
        writeln!(f, "last visit time: {}", Self::time_str(&self.visit_time))?;
        write!(f, "last modify time: {}", Self::time_str(&self.modify_time))
    }
}

/// `num_data_sectors` 个数据扇区需要的二级索引扇区数
fn index_sectors(num_data_sectors: usize) -> usize {
    if num_data_sectors <= NUM_DIRECT {
        0
    } else {
        (num_data_sectors - NUM_DIRECT).div_ceil(SECOND_DIRECT)
    }
}

fn encode_index(slots: &[u32; SECOND_DIRECT]) -> SectorBuf {
    let mut buf = [0u8; SECTOR_SIZE];
    for (chunk, slot) in buf.chunks_exact_mut(4).zip(slots) {
        chunk.copy_from_slice(&slot.to_le_bytes());
    }
    buf
}

fn decode_index(buf: &SectorBuf) -> [u32; SECOND_DIRECT] {
    let mut slots = [0u32; SECOND_DIRECT];
    for (slot, chunk) in slots.iter_mut().zip(buf.chunks_exact(4)) {
        *slot = u32::from_le_bytes(chunk.try_into().unwrap());
    }
    slots
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

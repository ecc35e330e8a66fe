//! # 打开文件层
//!
//! [`OpenFile`] 是文件头之上的流式视图：顺序读写推进内部游标，
//! 定位读写走绝对偏移。读写以扇区为单位与同步磁盘层交换数据，
//! 首尾的不完整扇区先读出再拼接。
//!
//! 定位读在读者写者协调的读侧进行，定位写在写侧进行；
//! 构造时登记打开计数，析构时注销。

use std::sync::Arc;

use log::debug;

use crate::bitmap::Bitmap;
use crate::config::{FREE_MAP_SECTOR, MAX_FILE_SIZE, NUM_SECTORS, SECTOR_SIZE};
use crate::layout::FileHeader;
use crate::synch_disk::SynchDisk;
use crate::time;

pub struct OpenFile {
    disk: Arc<SynchDisk>,
    hdr: FileHeader,
    /// 文件头所在扇区，亦是读者写者协调的键
    hdr_sector: usize,
    seek_pos: usize,
}

impl OpenFile {
    pub fn new(disk: Arc<SynchDisk>, sector: usize) -> Self {
        disk.open(sector);
        let hdr = FileHeader::fetch_from(sector, &disk);
        Self {
            disk,
            hdr,
            hdr_sector: sector,
            seek_pos: 0,
        }
    }

    #[inline]
    pub fn seek(&mut self, position: usize) {
        self.seek_pos = position;
    }

    /// 从游标处顺序读，游标按实际读出的字节数推进
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let read = self.read_at(buf, self.seek_pos);
        self.seek_pos += read;
        read
    }

    /// 向游标处顺序写，游标按实际写入的字节数推进
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let written = self.write_at(buf, self.seek_pos);
        self.seek_pos += written;
        written
    }

    /// 从绝对偏移读出至多 `buf.len()` 字节；越过文件尾则截断
    pub fn read_at(&mut self, buf: &mut [u8], offset: usize) -> usize {
        self.disk.start_read(self.hdr_sector);
        let read = self.transfer_in(buf, offset);
        if read > 0 {
            self.hdr.set_visit_time(time::now_secs());
            self.hdr.write_back(self.hdr_sector, &self.disk);
        }
        self.disk.end_read(self.hdr_sector);
        read
    }

    /// 向绝对偏移写入 `buf`。越过文件尾时先就地扩容，
    /// 扩容失败则退化为写到旧文件尾为止。
    pub fn write_at(&mut self, buf: &[u8], offset: usize) -> usize {
        if buf.is_empty() {
            return 0;
        }
        self.disk.start_write(self.hdr_sector);

        let mut len = buf.len();
        if offset + len > self.hdr.file_length() && !self.extend_to(offset + len) {
            let file_len = self.hdr.file_length();
            if offset >= file_len {
                self.disk.end_write(self.hdr_sector);
                return 0;
            }
            len = file_len - offset;
        }

        let written = self.transfer_out(&buf[..len], offset);
        if written > 0 {
            let now = time::now_secs();
            self.hdr.set_visit_time(now);
            self.hdr.set_modify_time(now);
        }
        // 新长度与时间戳一并随文件头落盘
        self.hdr.write_back(self.hdr_sector, &self.disk);
        self.disk.end_write(self.hdr_sector);
        written
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.hdr.file_length()
    }

    #[inline]
    pub fn hdr_sector(&self) -> usize {
        self.hdr_sector
    }

    #[inline]
    pub fn header(&self) -> &FileHeader {
        &self.hdr
    }
}

impl OpenFile {
    fn transfer_in(&mut self, buf: &mut [u8], offset: usize) -> usize {
        let file_len = self.hdr.file_length();
        if offset >= file_len || buf.is_empty() {
            return 0;
        }
        let len = buf.len().min(file_len - offset);

        let first = offset / SECTOR_SIZE;
        let last = (offset + len - 1) / SECTOR_SIZE;
        let mut sector_buf = [0u8; SECTOR_SIZE];
        for s in first..=last {
            let sector = self.hdr.byte_to_sector(s * SECTOR_SIZE, &self.disk);
            self.disk.read_sector(sector, &mut sector_buf);
            let seg_start = (s * SECTOR_SIZE).max(offset);
            let seg_end = ((s + 1) * SECTOR_SIZE).min(offset + len);
            buf[seg_start - offset..seg_end - offset]
                .copy_from_slice(&sector_buf[seg_start - s * SECTOR_SIZE..seg_end - s * SECTOR_SIZE]);
        }
        len
    }

    fn transfer_out(&mut self, buf: &[u8], offset: usize) -> usize {
        let file_len = self.hdr.file_length();
        if offset >= file_len {
            return 0;
        }
        let len = buf.len().min(file_len - offset);

        let first = offset / SECTOR_SIZE;
        let last = (offset + len - 1) / SECTOR_SIZE;
        let mut sector_buf = [0u8; SECTOR_SIZE];
        for s in first..=last {
            let seg_start = (s * SECTOR_SIZE).max(offset);
            let seg_end = ((s + 1) * SECTOR_SIZE).min(offset + len);
            let sector = self.hdr.byte_to_sector(s * SECTOR_SIZE, &self.disk);
            if seg_end - seg_start < SECTOR_SIZE {
                // 首尾的不完整扇区先读出，保住未覆盖的部分
                self.disk.read_sector(sector, &mut sector_buf);
            }
            sector_buf[seg_start - s * SECTOR_SIZE..seg_end - s * SECTOR_SIZE]
                .copy_from_slice(&buf[seg_start - offset..seg_end - offset]);
            self.disk.write_sector(sector, &sector_buf);
        }
        len
    }

    /// 把文件扩容到 `new_len` 字节，扇区取自持久化的空闲位图
    fn extend_to(&mut self, new_len: usize) -> bool {
        if new_len > MAX_FILE_SIZE {
            debug!("cannot extend past MAX_FILE_SIZE");
            return false;
        }
        let target = new_len.div_ceil(SECTOR_SIZE);
        let extra = target.saturating_sub(self.hdr.num_sectors());

        let mut map_file = OpenFile::new(self.disk.clone(), FREE_MAP_SECTOR);
        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.fetch_from(&mut map_file);
        if !self
            .hdr
            .extend_length(new_len, extra, &mut free_map, &self.disk)
        {
            return false;
        }
        free_map.write_back(&mut map_file);
        true
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.disk.close(self.hdr_sector);
    }
}

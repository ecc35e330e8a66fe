//! 宿主侧的块设备驱动：磁盘镜像文件与内存盘。
//!
//! 镜像文件由 4 字节魔数与 `NUM_SECTORS` 个扇区组成，
//! 魔数用于启动时校验镜像合法性。

#[cfg(test)]
mod tests;

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::{Read, Write};
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use sector_fs::config::{NUM_SECTORS, SECTOR_SIZE};
use sector_fs::BlockDevice;
use sector_fs::MAGIC;

/// 镜像头部的字节数
const HEADER_LEN: u64 = 4;

/// 以宿主文件为介质的块设备
pub struct DiskFile(pub Mutex<File>);

impl DiskFile {
    /// 新建镜像：写入魔数并撑到全盘大小
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&MAGIC.to_le_bytes())?;
        file.set_len(HEADER_LEN + (NUM_SECTORS * SECTOR_SIZE) as u64)?;
        Ok(Self(Mutex::new(file)))
    }

    /// 打开既有镜像并校验魔数
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if u32::from_le_bytes(magic) != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad magic number in disk image",
            ));
        }
        Ok(Self(Mutex::new(file)))
    }
}

impl BlockDevice for DiskFile {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(HEADER_LEN + (sector * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(
            file.read(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector!"
        );
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(HEADER_LEN + (sector * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(
            file.write(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector!"
        );
    }
}

/// 以内存为介质的块设备，测试专用
pub struct MemDisk(spin::Mutex<Vec<u8>>);

impl Default for MemDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl MemDisk {
    pub fn new() -> Self {
        Self(spin::Mutex::new(vec![0; NUM_SECTORS * SECTOR_SIZE]))
    }
}

impl BlockDevice for MemDisk {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        let data = self.0.lock();
        buf.copy_from_slice(&data[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE]);
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) {
        let mut data = self.0.lock();
        data[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE].copy_from_slice(buf);
    }
}

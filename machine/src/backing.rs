//! # 后备存储
//!
//! 每个地址空间的完整虚拟镜像所在之处，按需从这里换页。
//! 两种介质任选其一：模拟文件系统里的交换文件，
//! 或纯内存的影子缓冲。页号乘以页大小即镜像内偏移。

use sector_fs::OpenFile;

use crate::config::PAGE_SIZE;

pub enum BackingStore {
    /// 内存影子缓冲
    Shadow(Vec<u8>),
    /// 模拟文件系统内的交换文件
    File(OpenFile),
}

impl BackingStore {
    /// 全零的影子缓冲
    pub fn shadow(num_pages: usize) -> Self {
        Self::Shadow(vec![0; num_pages * PAGE_SIZE])
    }

    pub fn read_page(&mut self, vpn: usize, buf: &mut [u8; PAGE_SIZE]) {
        let offset = vpn * PAGE_SIZE;
        match self {
            Self::Shadow(image) => buf.copy_from_slice(&image[offset..offset + PAGE_SIZE]),
            Self::File(file) => {
                let read = file.read_at(buf, offset);
                // 交换文件按整页预分配，读不满说明镜像损坏
                assert_eq!(read, PAGE_SIZE, "backing store truncated at vpn {vpn}");
            }
        }
    }

    pub fn write_page(&mut self, vpn: usize, buf: &[u8; PAGE_SIZE]) {
        let offset = vpn * PAGE_SIZE;
        match self {
            Self::Shadow(image) => image[offset..offset + PAGE_SIZE].copy_from_slice(buf),
            Self::File(file) => {
                let written = file.write_at(buf, offset);
                assert_eq!(written, PAGE_SIZE, "backing store truncated at vpn {vpn}");
            }
        }
    }
}

//! # 块设备接口层
//!
//! [`BlockDevice`] 是对按扇区读写的存储设备的抽象，
//! 实现了此特质的类型称为块设备驱动。
//! 同步磁盘层通过它驱动真正的设备。

use core::any::Any;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    fn read_sector(&self, sector: usize, buf: &mut [u8]);
    fn write_sector(&self, sector: usize, buf: &[u8]);
}

/* sector-fs 的整体架构，自上而下 */

// 文件系统总控层：格式化、路径解析、创建/打开/删除
mod fs;
pub use fs::FileSystem;

// 打开文件层：文件头之上的流式读写视图
mod open_file;
pub use open_file::OpenFile;

// 磁盘数据结构层：文件头与目录的磁盘表示
mod layout;
pub use layout::{DirEntry, Directory, FileHeader};

// 空闲扇区位图
mod bitmap;
pub use bitmap::Bitmap;

// 同步磁盘层：串行化设备请求、扇区缓存、读者写者协调
mod synch_disk;
pub use synch_disk::SynchDisk;

// 磁盘块设备接口层
mod block_dev;
pub use block_dev::BlockDevice;

// 线程系统暴露给内核的同步原语
pub mod sync;

pub mod config;
pub mod time;

/// 磁盘镜像头部的魔数，用于校验镜像合法性
pub const MAGIC: u32 = 0x7365_6331;

type SectorBuf = [u8; config::SECTOR_SIZE];

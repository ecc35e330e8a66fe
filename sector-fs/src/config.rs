//! Constants used across the file system.
//!
//! 所有几何尺寸都在此处给出默认值，上层按需引用。

/// 扇区大小，亦是虚拟内存的页大小
pub const SECTOR_SIZE: usize = 128;
/// 磁盘扇区总数
pub const NUM_SECTORS: usize = 1024;

/// 扇区缓存的槽位数
pub const CACHE_SIZE: usize = 8;

/// 文件头内的一级(直接)索引数量
pub const NUM_DIRECT: usize = 9;
/// 文件头内的二级索引数量
pub const NUM_SECOND_INDEX: usize = 2;
/// 每个二级索引扇区可容纳的扇区号数量
pub const SECOND_DIRECT: usize = SECTOR_SIZE / 4;
/// 单个文件的字节数上限
pub const MAX_FILE_SIZE: usize = SECTOR_SIZE * (NUM_DIRECT + NUM_SECOND_INDEX * SECOND_DIRECT);

/// 目录表的固定槽位数
pub const NUM_DIR_ENTRIES: usize = 10;
/// 文件名的字节数上限，不含结尾的 \0
pub const FILE_NAME_MAX_LEN: usize = 9;
/// 单个目录项的磁盘表示大小
pub const DIR_ENTRY_SIZE: usize = 20;
/// 目录文件的字节数
pub const DIRECTORY_FILE_SIZE: usize = DIR_ENTRY_SIZE * NUM_DIR_ENTRIES;

/// 空闲位图文件头所在的公知扇区
pub const FREE_MAP_SECTOR: usize = 0;
/// 根目录文件头所在的公知扇区
pub const ROOT_DIR_SECTOR: usize = 1;
/// 空闲位图文件的字节数
pub const FREE_MAP_FILE_SIZE: usize = NUM_SECTORS / 8;

/// 文本时间戳的字节数，含结尾的 \0
pub const TIME_LEN: usize = 25;

//! # 磁盘数据结构层
//!
//! 文件头与目录在磁盘上的表示。两者都通过显式编解码
//! 进出扇区缓冲，磁盘布局由各自的偏移常量固定。

mod file_header;
pub use file_header::FileHeader;

mod directory;
pub use directory::{DirEntry, Directory};

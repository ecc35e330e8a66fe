//! 目录：装在普通文件里的定长名字表。
//!
//! 每个目录项的磁盘布局（共 [`DIR_ENTRY_SIZE`] 字节）：
//!
//! ```text
//! u8 in_use | pad[3] | u32 sector | u8 is_dir | u8 name[FILE_NAME_MAX_LEN + 1] | pad
//! ```

use core::fmt;

use log::debug;

use crate::config::{DIR_ENTRY_SIZE, FILE_NAME_MAX_LEN, NUM_DIR_ENTRIES};
use crate::open_file::OpenFile;

const SECTOR_OFFSET: usize = 4;
const IS_DIR_OFFSET: usize = 8;
const NAME_OFFSET: usize = 9;

const _: () = assert!(NAME_OFFSET + FILE_NAME_MAX_LEN + 1 <= DIR_ENTRY_SIZE);

/// 目录项：文件系统项的元信息
#[derive(Clone, Default)]
pub struct DirEntry {
    in_use: bool,
    is_dir: bool,
    sector: u32,
    // 最后一字节留给 \0
    name: [u8; FILE_NAME_MAX_LEN + 1],
}

impl DirEntry {
    pub const SIZE: usize = DIR_ENTRY_SIZE;

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap();
        core::str::from_utf8(&self.name[..len]).unwrap()
    }

    #[inline]
    pub fn sector(&self) -> usize {
        self.sector as usize
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        buf[0] = self.in_use as u8;
        buf[SECTOR_OFFSET..SECTOR_OFFSET + 4].copy_from_slice(&self.sector.to_le_bytes());
        buf[IS_DIR_OFFSET] = self.is_dir as u8;
        buf[NAME_OFFSET..NAME_OFFSET + self.name.len()].copy_from_slice(&self.name);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut name = [0u8; FILE_NAME_MAX_LEN + 1];
        let name_len = name.len();
        name.copy_from_slice(&buf[NAME_OFFSET..NAME_OFFSET + name_len]);
        Self {
            in_use: buf[0] != 0,
            is_dir: buf[IS_DIR_OFFSET] != 0,
            sector: u32::from_le_bytes(buf[SECTOR_OFFSET..SECTOR_OFFSET + 4].try_into().unwrap()),
            name,
        }
    }
}

/// 目录表。名字都是单个路径段（不含 '/'），
/// 在用项之间不重名。
pub struct Directory {
    table: Vec<DirEntry>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    pub fn new() -> Self {
        Self {
            table: vec![DirEntry::default(); NUM_DIR_ENTRIES],
        }
    }

    pub fn fetch_from(&mut self, file: &mut OpenFile) {
        let mut buf = [0u8; DIR_ENTRY_SIZE * NUM_DIR_ENTRIES];
        let read = file.read_at(&mut buf, 0);
        assert_eq!(read, buf.len(), "directory file truncated");
        for (entry, raw) in self.table.iter_mut().zip(buf.chunks_exact(DIR_ENTRY_SIZE)) {
            *entry = DirEntry::decode(raw);
        }
    }

    pub fn write_back(&self, file: &mut OpenFile) {
        let mut buf = [0u8; DIR_ENTRY_SIZE * NUM_DIR_ENTRIES];
        for (entry, raw) in self.table.iter().zip(buf.chunks_exact_mut(DIR_ENTRY_SIZE)) {
            entry.encode(raw);
        }
        let written = file.write_at(&buf, 0);
        assert_eq!(written, buf.len(), "directory file truncated");
    }

    /// 线性查找，返回文件头所在扇区
    pub fn find(&self, name: &str) -> Option<usize> {
        let name = bounded(name);
        self.entries()
            .find(|entry| entry.name().as_bytes() == name)
            .map(|entry| entry.sector as usize)
    }

    /// 占用首个空槽位；表满时返回 false
    pub fn add(&mut self, name: &str, sector: usize, is_dir: bool) -> bool {
        if self.find(name).is_some() {
            return false;
        }
        let Some(entry) = self.table.iter_mut().find(|entry| !entry.in_use) else {
            debug!("directory full, cannot add {name}");
            return false;
        };
        let name = bounded(name);
        entry.in_use = true;
        entry.is_dir = is_dir;
        entry.sector = sector as u32;
        entry.name.fill(0);
        entry.name[..name.len()].copy_from_slice(name);
        true
    }

    /// 释放匹配的槽位
    pub fn remove(&mut self, name: &str) -> bool {
        let bounded_name = bounded(name);
        match self
            .table
            .iter_mut()
            .find(|entry| entry.in_use && entry.name().as_bytes() == bounded_name)
        {
            Some(entry) => {
                entry.in_use = false;
                true
            }
            None => false,
        }
    }

    pub fn is_dir(&self, name: &str) -> bool {
        let name = bounded(name);
        self.entries()
            .any(|entry| entry.name().as_bytes() == name && entry.is_dir)
    }

    /// 在用项的迭代器
    pub fn entries(&self) -> impl Iterator<Item = &DirEntry> {
        self.table.iter().filter(|entry| entry.in_use)
    }
}

// List() 的输出：一项一行，目录带斜杠后缀
impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.entries() {
            writeln!(
                f,
                "{}{} (sector {})",
                entry.name(),
                if entry.is_dir { "/" } else { "" },
                entry.sector
            )?;
        }
        Ok(())
    }
}

/// 截断到名字上限，与存储时一致
fn bounded(name: &str) -> &[u8] {
    &name.as_bytes()[..name.len().min(FILE_NAME_MAX_LEN)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_codec_round_trip() {
        let mut dir = Directory::new();
        assert!(dir.add("a.txt", 17, false));
        assert!(dir.add("sub", 23, true));
        let mut buf = [0u8; DirEntry::SIZE];
        dir.table[1].encode(&mut buf);
        let back = DirEntry::decode(&buf);
        assert_eq!(back.name(), "sub");
        assert_eq!(back.sector(), 23);
        assert!(back.is_dir());
    }

    #[test]
    fn names_are_unique() {
        let mut dir = Directory::new();
        assert!(dir.add("twice", 3, false));
        assert!(!dir.add("twice", 4, false));
        assert_eq!(dir.find("twice"), Some(3));
    }

    #[test]
    fn table_has_fixed_capacity() {
        let mut dir = Directory::new();
        for i in 0..NUM_DIR_ENTRIES {
            assert!(dir.add(&format!("f{i}"), i, false));
        }
        assert!(!dir.add("overflow", 99, false));
        assert!(dir.remove("f3"));
        assert!(dir.add("overflow", 99, false));
    }

    #[test]
    fn long_names_are_bounded() {
        let mut dir = Directory::new();
        assert!(dir.add("averylongname", 5, false));
        assert_eq!(dir.find("averylongname"), Some(5));
        assert_eq!(dir.entries().next().unwrap().name(), "averylong");
    }
}

//! # 文件系统总控层
//!
//! 把文本路径映射到文件。每个文件由一个文件头扇区、
//! 若干数据扇区和父目录里的一个目录项组成。
//!
//! 空闲位图与根目录自身也是普通文件，文件头分别位于
//! 公知扇区 [`FREE_MAP_SECTOR`] 与 [`ROOT_DIR_SECTOR`]，
//! 文件系统凭此自举。两者在文件系统存续期间保持打开。
//!
//! 修改位图或目录的操作，成功即把改动写回磁盘；
//! 中途失败则直接丢弃内存中的改动，不写回任何内容。

use std::sync::Arc;

use log::{debug, info};

use crate::bitmap::Bitmap;
use crate::config::{
    DIRECTORY_FILE_SIZE, FREE_MAP_FILE_SIZE, FREE_MAP_SECTOR, NUM_SECTORS, ROOT_DIR_SECTOR,
};
use crate::layout::{Directory, FileHeader};
use crate::open_file::OpenFile;
use crate::synch_disk::SynchDisk;
use crate::time;

pub struct FileSystem {
    disk: Arc<SynchDisk>,
    free_map_file: OpenFile,
    directory_file: OpenFile,
}

impl FileSystem {
    /// 挂载文件系统。`format` 为真时先在磁盘上铺好
    /// 空位图与空根目录，否则直接打开两个公知文件。
    pub fn new(disk: Arc<SynchDisk>, format: bool) -> Self {
        info!("initializing the file system");
        if !format {
            return Self {
                free_map_file: OpenFile::new(disk.clone(), FREE_MAP_SECTOR),
                directory_file: OpenFile::new(disk.clone(), ROOT_DIR_SECTOR),
                disk,
            };
        }

        debug!("formatting the file system");
        let mut free_map = Bitmap::new(NUM_SECTORS);
        let directory = Directory::new();
        let mut map_hdr = FileHeader::new();
        let mut dir_hdr = FileHeader::new();

        // 先占住两个公知扇区，再为两份文件数据分配空间
        free_map.mark(FREE_MAP_SECTOR);
        free_map.mark(ROOT_DIR_SECTOR);
        assert!(map_hdr.allocate(&mut free_map, FREE_MAP_FILE_SIZE, &disk));
        assert!(dir_hdr.allocate(&mut free_map, DIRECTORY_FILE_SIZE, &disk));

        let now = time::now_secs();
        for hdr in [&mut map_hdr, &mut dir_hdr] {
            hdr.set_create_time(now);
            hdr.set_visit_time(now);
            hdr.set_modify_time(now);
        }

        // 文件头先落盘，随后才能按普通文件打开它们
        map_hdr.write_back(FREE_MAP_SECTOR, &disk);
        dir_hdr.write_back(ROOT_DIR_SECTOR, &disk);

        let mut free_map_file = OpenFile::new(disk.clone(), FREE_MAP_SECTOR);
        let mut directory_file = OpenFile::new(disk.clone(), ROOT_DIR_SECTOR);
        free_map.write_back(&mut free_map_file);
        directory.write_back(&mut directory_file);

        Self {
            disk,
            free_map_file,
            directory_file,
        }
    }

    /// 创建文件或目录。`initial_size` 为负时创建目录，
    /// 其大小恰好容纳一张空目录表。
    ///
    /// 失败情形：父目录缺失、重名、父目录已满、空间不足。
    /// 任何一步失败都不产生磁盘上的改动。
    pub fn create(&mut self, path: &str, initial_size: i64) -> bool {
        let is_dir = initial_size < 0;
        let size = if is_dir {
            DIRECTORY_FILE_SIZE
        } else {
            initial_size as usize
        };
        debug!("creating {path}, size {size}, dir: {is_dir}");

        let Some(name) = final_component(path) else {
            return false;
        };
        let Some(parent_sector) = self.parent_sector(path) else {
            debug!("parent directory of {path} doesn't exist");
            return false;
        };

        let mut parent_file = OpenFile::new(self.disk.clone(), parent_sector);
        let mut parent = Directory::new();
        parent.fetch_from(&mut parent_file);
        if parent.find(name).is_some() {
            debug!("{path} already exists");
            return false;
        }

        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.fetch_from(&mut self.free_map_file);
        // 先为文件头找一个扇区
        let Some(sector) = free_map.find() else {
            return false;
        };
        if !parent.add(name, sector, is_dir) {
            return false;
        }
        let mut hdr = FileHeader::new();
        if !hdr.allocate(&mut free_map, size, &self.disk) {
            return false;
        }

        let now = time::now_secs();
        hdr.set_create_time(now);
        hdr.set_visit_time(now);
        hdr.set_modify_time(now);

        // 一切就绪，把文件头、父目录和位图写回磁盘
        hdr.write_back(sector, &self.disk);
        if is_dir {
            // 新目录以空表落地，免得沿用旧扇区里的陈货
            let mut new_file = OpenFile::new(self.disk.clone(), sector);
            Directory::new().write_back(&mut new_file);
        }
        parent.write_back(&mut parent_file);
        free_map.write_back(&mut self.free_map_file);
        debug!("{path} created at sector {sector}");
        true
    }

    /// 打开文件或目录，找不到时返回 None
    pub fn open(&mut self, path: &str) -> Option<OpenFile> {
        debug!("opening {path}");
        let name = final_component(path)?;
        let parent_sector = self.parent_sector(path)?;

        let mut parent_file = OpenFile::new(self.disk.clone(), parent_sector);
        let mut parent = Directory::new();
        parent.fetch_from(&mut parent_file);
        let sector = parent.find(name)?;
        Some(OpenFile::new(self.disk.clone(), sector))
    }

    /// 删除文件或目录；目录会先递归清空。
    /// 打开计数非零的对象拒绝删除。
    pub fn remove(&mut self, path: &str) -> bool {
        debug!("removing {path}");
        let Some(name) = final_component(path) else {
            return false;
        };
        let Some(parent_sector) = self.parent_sector(path) else {
            debug!("parent directory of {path} doesn't exist");
            return false;
        };

        let mut parent_file = OpenFile::new(self.disk.clone(), parent_sector);
        let mut parent = Directory::new();
        parent.fetch_from(&mut parent_file);
        let Some(sector) = parent.find(name) else {
            debug!("didn't find {name} in its parent directory");
            return false;
        };
        if self.disk.open_count(sector) > 0 {
            debug!("{path} is still open, refusing to remove");
            return false;
        }

        if parent.is_dir(name) {
            let children: Vec<String> = {
                let mut child_file = OpenFile::new(self.disk.clone(), sector);
                let mut child = Directory::new();
                child.fetch_from(&mut child_file);
                child
                    .entries()
                    .map(|entry| format!("{path}/{}", entry.name()))
                    .collect()
            };
            for child_path in children {
                self.remove(&child_path);
            }
        }

        let hdr = FileHeader::fetch_from(sector, &self.disk);
        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.fetch_from(&mut self.free_map_file);
        hdr.deallocate(&mut free_map, &self.disk); // 归还数据扇区
        assert!(free_map.test(sector), "header sector ought to be marked");
        free_map.clear(sector); // 归还文件头扇区
        parent.remove(name);

        free_map.write_back(&mut self.free_map_file);
        parent.write_back(&mut parent_file);
        debug!("{path} removed");
        true
    }

    /// 根目录一览
    pub fn list(&mut self) -> String {
        let mut directory = Directory::new();
        directory.fetch_from(&mut self.directory_file);
        directory.to_string()
    }

    /// 整个文件系统的调试转储
    pub fn print(&mut self) -> String {
        use core::fmt::Write;

        let mut out = String::new();
        let bit_hdr = FileHeader::fetch_from(FREE_MAP_SECTOR, &self.disk);
        let dir_hdr = FileHeader::fetch_from(ROOT_DIR_SECTOR, &self.disk);
        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.fetch_from(&mut self.free_map_file);
        let mut directory = Directory::new();
        directory.fetch_from(&mut self.directory_file);

        writeln!(out, "bit map file header:\n{bit_hdr}").unwrap();
        writeln!(out, "directory file header:\n{dir_hdr}").unwrap();
        writeln!(out, "{free_map}").unwrap();
        writeln!(out, "root directory:\n{directory}").unwrap();
        out
    }

    /// 把缓存中的脏扇区全部刷回设备
    #[inline]
    pub fn flush(&self) {
        self.disk.flush_all();
    }

    #[inline]
    pub fn disk(&self) -> &Arc<SynchDisk> {
        &self.disk
    }
}

impl FileSystem {
    /// 定位存放路径最后一段的目录，返回其文件头扇区。
    /// 不含 '/' 的路径与只有前导 '/' 的路径都以根目录为父。
    fn parent_sector(&mut self, path: &str) -> Option<usize> {
        match path.rfind('/') {
            None | Some(0) => Some(ROOT_DIR_SECTOR),
            Some(pos) => {
                let parent = &path[..pos];
                let grand_sector = self.parent_sector(parent)?;
                let mut grand_file = OpenFile::new(self.disk.clone(), grand_sector);
                let mut grand = Directory::new();
                grand.fetch_from(&mut grand_file);
                let name = final_component(parent)?;
                let sector = grand.find(name)?;
                grand.is_dir(name).then_some(sector)
            }
        }
    }
}

/// 路径的最后一个非空段
fn final_component(path: &str) -> Option<&str> {
    path.rsplit('/').find(|segment| !segment.is_empty())
}

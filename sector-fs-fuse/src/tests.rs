use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use sector_fs::config::{
    FREE_MAP_SECTOR, MAX_FILE_SIZE, NUM_DIRECT, NUM_DIR_ENTRIES, NUM_SECTORS, SECTOR_SIZE,
};
use sector_fs::{Bitmap, BlockDevice, FileHeader, FileSystem, OpenFile, SynchDisk};

use crate::MemDisk;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fresh() -> (Arc<MemDisk>, Arc<SynchDisk>, FileSystem) {
    init_logger();
    let device = Arc::new(MemDisk::new());
    let disk = Arc::new(SynchDisk::new(device.clone()));
    let fs = FileSystem::new(disk.clone(), true);
    (device, disk, fs)
}

/// 格式化后位图的逐位快照
fn map_snapshot(disk: &Arc<SynchDisk>) -> Vec<bool> {
    let mut map_file = OpenFile::new(disk.clone(), FREE_MAP_SECTOR);
    let mut map = Bitmap::new(NUM_SECTORS);
    map.fetch_from(&mut map_file);
    (0..NUM_SECTORS).map(|i| map.test(i)).collect()
}

fn num_clear(disk: &Arc<SynchDisk>) -> usize {
    map_snapshot(disk).iter().filter(|&&used| !used).count()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 10) as u8).collect()
}

// 格式化 1024 扇区的新盘：根目录为空，
// 已占用的只有两个文件头扇区加两份文件数据
#[test]
fn format_and_list() {
    let (_, disk, mut fs) = fresh();
    assert!(fs.list().is_empty());
    // 公知扇区 0 和 1、位图数据 1 个扇区、根目录数据 2 个扇区
    assert_eq!(num_clear(&disk), NUM_SECTORS - 5);
}

#[test]
fn create_then_read_back() {
    let (_, _, mut fs) = fresh();
    assert!(fs.create("/a.txt", 300));

    let mut file = fs.open("/a.txt").unwrap();
    let data = pattern(300);
    assert_eq!(file.write_at(&data, 0), 300);

    let mut back = vec![0u8; 300];
    assert_eq!(file.read_at(&mut back, 0), 300);
    assert_eq!(back, data);
}

// 横跨三个扇区的定位写
#[test]
fn cross_sector_write() {
    let (_, _, mut fs) = fresh();
    assert!(fs.create("/span", 512));

    let mut file = fs.open("/span").unwrap();
    let data: Vec<u8> = (0..200u16).map(|i| (b'A' + (i % 26) as u8)).collect();
    assert_eq!(file.write_at(&data, 100), 200);

    let mut back = vec![0u8; 200];
    assert_eq!(file.read_at(&mut back, 100), 200);
    assert_eq!(back, data);
}

#[test]
fn read_past_eof_is_truncated() {
    let (_, _, mut fs) = fresh();
    assert!(fs.create("/short", 100));
    let mut file = fs.open("/short").unwrap();

    let mut buf = vec![0u8; 200];
    assert_eq!(file.read_at(&mut buf, 40), 60);
    assert_eq!(file.read_at(&mut buf, 100), 0);
}

// 递归删除目录树之后，位图回到格式化后的状态
#[test]
fn hierarchical_remove() {
    let (_, disk, mut fs) = fresh();
    let clean = map_snapshot(&disk);

    assert!(fs.create("/d", -1));
    assert!(fs.create("/d/f1", 50));
    assert!(fs.create("/d/f2", 60));
    {
        let mut f1 = fs.open("/d/f1").unwrap();
        assert_eq!(f1.write_at(&pattern(50), 0), 50);
    }

    assert!(fs.remove("/d"));
    assert!(fs.list().is_empty());
    assert_eq!(map_snapshot(&disk), clean);
}

#[test]
fn nested_directories_resolve() {
    let (_, _, mut fs) = fresh();
    assert!(fs.create("/a", -1));
    assert!(fs.create("/a/b", -1));
    assert!(fs.create("/a/b/c.txt", 10));
    assert!(fs.open("/a/b/c.txt").is_some());
    // 中间段必须是目录
    assert!(fs.create("/a/plain", 10));
    assert!(!fs.create("/a/plain/x", 10));
}

// 写越过文件尾触发就地扩容，穿过二级索引
#[test]
fn extend_through_indirection() {
    let (device, disk, mut fs) = fresh();
    assert!(fs.create("/big", 0));

    let mut file = fs.open("/big").unwrap();
    let len = (NUM_DIRECT + 3) * SECTOR_SIZE;
    let data = pattern(len);
    assert_eq!(file.write_at(&data, 0), len);
    assert_eq!(file.length(), len);

    // 关心的偏移落在二级索引管辖的区域
    let offset = (NUM_DIRECT + 2) * SECTOR_SIZE;
    let sector = file.header().byte_to_sector(offset, &disk);
    assert!(!file
        .header()
        .direct_sectors()
        .iter()
        .any(|&direct| direct as usize == sector));

    // 刷掉缓存后，设备上的该扇区内容原样保留
    disk.flush_all();
    let mut raw = [0u8; SECTOR_SIZE];
    device.read_sector(sector, &mut raw);
    assert_eq!(&raw[..], &data[offset..offset + SECTOR_SIZE]);

    // 重新打开读出全文
    drop(file);
    let mut file = fs.open("/big").unwrap();
    let mut back = vec![0u8; len];
    assert_eq!(file.read_at(&mut back, 0), len);
    assert_eq!(back, data);
}

#[test]
fn extension_is_bounded_by_max_file_size() {
    let (_, _, mut fs) = fresh();
    assert!(fs.create("/cap", 0));
    let mut file = fs.open("/cap").unwrap();

    let data = vec![7u8; MAX_FILE_SIZE];
    assert_eq!(file.write_at(&data, 0), MAX_FILE_SIZE);
    // 已到单文件上限，继续追加写不进去
    assert_eq!(file.write_at(&[1, 2, 3], MAX_FILE_SIZE), 0);
}

// 创建与扩容之后，文件占据的扇区数与
// ceil(size / SectorSize) + 文件头 + 二级索引严格一致
#[test]
fn sector_accounting() {
    let (_, disk, mut fs) = fresh();

    let before = num_clear(&disk);
    assert!(fs.create("/one", 50));
    assert_eq!(before - num_clear(&disk), FileHeader::total_sectors(50) + 1);

    let before = num_clear(&disk);
    let indirect_size = NUM_DIRECT * SECTOR_SIZE + 1;
    assert!(fs.create("/two", indirect_size as i64));
    assert_eq!(
        before - num_clear(&disk),
        FileHeader::total_sectors(indirect_size) + 1
    );
}

#[test]
fn duplicate_name_fails_without_side_effect() {
    let (_, disk, mut fs) = fresh();
    assert!(fs.create("/dup", 10));
    let used = map_snapshot(&disk);
    assert!(!fs.create("/dup", 20));
    assert_eq!(map_snapshot(&disk), used);
}

#[test]
fn directory_full_fails_without_side_effect() {
    let (_, disk, mut fs) = fresh();
    for i in 0..NUM_DIR_ENTRIES {
        assert!(fs.create(&format!("/f{i}"), 10));
    }
    let used = map_snapshot(&disk);
    assert!(!fs.create("/spill", 10));
    assert_eq!(map_snapshot(&disk), used);
}

#[test]
fn out_of_space_fails_without_side_effect() {
    let (_, disk, mut fs) = fresh();
    assert!(!fs.create("/huge", (NUM_SECTORS * SECTOR_SIZE) as i64));
    assert_eq!(num_clear(&disk), NUM_SECTORS - 5);
}

#[test]
fn remove_refuses_open_files() {
    let (_, _, mut fs) = fresh();
    assert!(fs.create("/busy", 10));
    let file = fs.open("/busy").unwrap();
    assert!(!fs.remove("/busy"));
    drop(file);
    assert!(fs.remove("/busy"));
}

// 刷盘后换一个同步磁盘实例挂载，数据仍在
#[test]
fn survives_remount() {
    let device = {
        let (device, _, mut fs) = fresh();
        assert!(fs.create("/keep", 300));
        let mut file = fs.open("/keep").unwrap();
        assert_eq!(file.write_at(&pattern(300), 0), 300);
        drop(file);
        fs.flush();
        device
    };

    let disk = Arc::new(SynchDisk::new(device));
    let mut fs = FileSystem::new(disk, false);
    let mut file = fs.open("/keep").unwrap();
    let mut back = vec![0u8; 300];
    assert_eq!(file.read_at(&mut back, 0), 300);
    assert_eq!(back, pattern(300));
}

// 任一扇区的读都返回最近一次写入的内容，
// 写入量超出缓存容量以逼出换出路径
#[test]
fn cache_coherence_across_eviction() {
    init_logger();
    let device = Arc::new(MemDisk::new());
    let disk = SynchDisk::new(device);

    let total = sector_fs::config::CACHE_SIZE * 3;
    for sector in 0..total {
        let buf = [sector as u8; SECTOR_SIZE];
        disk.write_sector(sector, &buf);
    }
    for sector in (0..total).rev() {
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(sector, &mut buf);
        assert_eq!(buf, [sector as u8; SECTOR_SIZE]);
    }
}

// 多线程各写各的扇区，读回时互不串扰
#[test]
fn concurrent_sector_writes_are_coherent() {
    init_logger();
    let disk = Arc::new(SynchDisk::new(Arc::new(MemDisk::new())));

    let mut handles = Vec::new();
    for worker in 0..4u8 {
        let disk = disk.clone();
        handles.push(thread::spawn(move || {
            let base = worker as usize * 16;
            for sector in base..base + 16 {
                let buf = [sector as u8; SECTOR_SIZE];
                disk.write_sector(sector, &buf);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for sector in 0..64 {
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(sector, &mut buf);
        assert_eq!(buf, [sector as u8; SECTOR_SIZE]);
    }
}

// 信号量版读者写者：写者在场时不允许任何读者越过 Start 屏障
#[test]
fn reader_writer_exclusion() {
    init_logger();
    let disk = Arc::new(SynchDisk::new(Arc::new(MemDisk::new())));
    let readers = Arc::new(AtomicIsize::new(0));
    let writers = Arc::new(AtomicIsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    const HDR: usize = 7;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let (disk, readers, writers, violations) = (
            disk.clone(),
            readers.clone(),
            writers.clone(),
            violations.clone(),
        );
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                disk.start_read(HDR);
                readers.fetch_add(1, Ordering::SeqCst);
                if writers.load(Ordering::SeqCst) > 0 {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                thread::yield_now();
                readers.fetch_sub(1, Ordering::SeqCst);
                disk.end_read(HDR);
            }
        }));
    }
    for _ in 0..2 {
        let (disk, readers, writers, violations) = (
            disk.clone(),
            readers.clone(),
            writers.clone(),
            violations.clone(),
        );
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                disk.start_write(HDR);
                if writers.fetch_add(1, Ordering::SeqCst) > 0
                    || readers.load(Ordering::SeqCst) > 0
                {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                thread::yield_now();
                writers.fetch_sub(1, Ordering::SeqCst);
                disk.end_write(HDR);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

/// 条件变量版读者写者：读者让道于等待中的写者，
/// 写者退出时先通知所有读者、再通知下一个写者，双方都不饿死
struct RwMonitor {
    state: Mutex<RwState>,
    readers_go: Condvar,
    writers_go: Condvar,
}

#[derive(Default)]
struct RwState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
}

impl RwMonitor {
    fn new() -> Self {
        Self {
            state: Mutex::new(RwState::default()),
            readers_go: Condvar::new(),
            writers_go: Condvar::new(),
        }
    }

    fn start_read(&self) {
        let mut state = self.state.lock().unwrap();
        while state.writer || state.waiting_writers > 0 {
            state = self.readers_go.wait(state).unwrap();
        }
        state.readers += 1;
    }

    fn end_read(&self) {
        let mut state = self.state.lock().unwrap();
        state.readers -= 1;
        if state.readers == 0 {
            self.writers_go.notify_one();
        }
    }

    fn start_write(&self) {
        let mut state = self.state.lock().unwrap();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            state = self.writers_go.wait(state).unwrap();
        }
        state.waiting_writers -= 1;
        state.writer = true;
    }

    fn end_write(&self) {
        let mut state = self.state.lock().unwrap();
        state.writer = false;
        self.readers_go.notify_all();
        self.writers_go.notify_one();
    }
}

#[test]
fn condvar_reader_writer_makes_progress() {
    init_logger();
    let monitor = Arc::new(RwMonitor::new());
    let readers = Arc::new(AtomicIsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let writes_done = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let (monitor, readers) = (monitor.clone(), readers.clone());
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                monitor.start_read();
                readers.fetch_add(1, Ordering::SeqCst);
                thread::yield_now();
                readers.fetch_sub(1, Ordering::SeqCst);
                monitor.end_read();
            }
        }));
    }
    for _ in 0..2 {
        let (monitor, readers, violations, writes_done) = (
            monitor.clone(),
            readers.clone(),
            violations.clone(),
            writes_done.clone(),
        );
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                monitor.start_write();
                if readers.load(Ordering::SeqCst) > 0 {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                thread::yield_now();
                writes_done.fetch_add(1, Ordering::SeqCst);
                monitor.end_write();
            }
        }));
    }
    // 读者持续到场的情况下，所有写者仍然完成了全部写入
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(writes_done.load(Ordering::SeqCst), 200);
}

//! 按需换页与地址翻译的端到端检验

use std::sync::Arc;

use machine::config::PAGE_SIZE;
use machine::{
    BackingStore, Exception, Machine, MachineConfig, PageTableKind, PteFlag, ThreadId, TlbPolicy,
    TranslationEntry,
};
use sector_fs::{FileSystem, SynchDisk};
use sector_fs_fuse::MemDisk;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 每页以 `10 + 页号` 的字节填充，彼此可区分
fn striped_image(num_pages: usize) -> Vec<u8> {
    let mut image = vec![0u8; num_pages * PAGE_SIZE];
    for (page, chunk) in image.chunks_exact_mut(PAGE_SIZE).enumerate() {
        chunk.fill(10 + page as u8);
    }
    image
}

fn word(byte: u8) -> u32 {
    u32::from_le_bytes([byte; 4])
}

fn machine_with(
    num_phys_pages: usize,
    table_kind: PageTableKind,
    num_pages: usize,
) -> (Machine, ThreadId) {
    init_logger();
    let config = MachineConfig {
        num_phys_pages,
        tlb_size: 4,
        tlb_policy: TlbPolicy::Lru,
        table_kind,
    };
    let mut machine = Machine::new(config);
    let tid = machine.create_space(num_pages, BackingStore::Shadow(striped_image(num_pages)));
    machine.set_current(tid);
    (machine, tid)
}

// 四个页框、六个虚页：第六次访问之后恰好一次脏页写回，
// 被换出的内容可从后备存储取回，再访问换回后字节如初
#[test]
fn demand_paging_evicts_one_dirty_page() {
    let (mut machine, tid) = machine_with(4, PageTableKind::Linear, 6);

    machine.write_mem(0, 4, 0xdead_beef).unwrap();
    for page in 1..6 {
        assert_eq!(
            machine.read_mem(page * PAGE_SIZE, 4).unwrap(),
            word(10 + page as u8)
        );
    }

    assert_eq!(machine.stats.page_ins, 6);
    assert_eq!(machine.stats.page_outs, 1);
    match &machine.space(tid).backing {
        BackingStore::Shadow(image) => {
            assert_eq!(u32::from_le_bytes(image[0..4].try_into().unwrap()), 0xdead_beef);
        }
        BackingStore::File(_) => unreachable!(),
    }

    assert_eq!(machine.read_mem(0, 4).unwrap(), 0xdead_beef);
    assert_eq!(machine.stats.page_ins, 7);
    assert_eq!(machine.stats.page_outs, 1);
}

#[test]
fn fifo_tlb_policy_also_pages_in() {
    init_logger();
    let config = MachineConfig {
        num_phys_pages: 4,
        tlb_size: 2,
        tlb_policy: TlbPolicy::Fifo,
        table_kind: PageTableKind::Linear,
    };
    let mut machine = Machine::new(config);
    let tid = machine.create_space(4, BackingStore::Shadow(striped_image(4)));
    machine.set_current(tid);

    // TLB 只有两个槽位，反复横跳全靠重填
    for _ in 0..3 {
        for page in 0..4 {
            assert_eq!(
                machine.read_mem(page * PAGE_SIZE, 4).unwrap(),
                word(10 + page as u8)
            );
        }
    }
    assert_eq!(machine.stats.page_ins, 4);
    assert!(machine.stats.tlb_misses >= 4);
}

#[test]
fn inverted_table_pages_in_and_out() {
    let (mut machine, tid) = machine_with(2, PageTableKind::Inverted, 4);

    machine.write_mem(0, 4, 0x1122_3344).unwrap();
    assert_eq!(machine.read_mem(PAGE_SIZE, 4).unwrap(), word(11));
    // 第三页挤掉脏的第零页
    assert_eq!(machine.read_mem(2 * PAGE_SIZE, 4).unwrap(), word(12));
    assert_eq!(machine.stats.page_outs, 1);
    match &machine.space(tid).backing {
        BackingStore::Shadow(image) => {
            assert_eq!(u32::from_le_bytes(image[0..4].try_into().unwrap()), 0x1122_3344);
        }
        BackingStore::File(_) => unreachable!(),
    }

    assert_eq!(machine.read_mem(0, 4).unwrap(), 0x1122_3344);
}

// 写穿之后，物理内存、页表项与物理页表的脏位三处一致
#[test]
fn write_marks_dirty_everywhere() {
    let (mut machine, tid) = machine_with(4, PageTableKind::Linear, 2);

    machine.write_mem(PAGE_SIZE + 8, 4, 0xabcd_0123).unwrap();
    let phys = machine.translate(PAGE_SIZE + 8, 4, false).unwrap();
    assert_eq!(
        u32::from_le_bytes(machine.memory()[phys..phys + 4].try_into().unwrap()),
        0xabcd_0123
    );

    let entry = *machine.space(tid).page_table.entry(1);
    assert!(entry.flags.contains(PteFlag::Dirty));
    assert!(machine.phys_page(entry.physical_page).dirty);
}

#[test]
fn misaligned_access_raises_address_error() {
    let (mut machine, _) = machine_with(2, PageTableKind::Linear, 1);
    assert_eq!(machine.read_mem(2, 4), Err(Exception::AddressError));
    assert_eq!(machine.read_mem(1, 2), Err(Exception::AddressError));
    machine.read_mem(2, 2).unwrap();
}

#[test]
fn access_beyond_space_raises_address_error() {
    let (mut machine, _) = machine_with(2, PageTableKind::Linear, 1);
    assert_eq!(machine.read_mem(50 * PAGE_SIZE, 4), Err(Exception::AddressError));
}

#[test]
fn read_only_page_rejects_writes() {
    let (mut machine, tid) = machine_with(2, PageTableKind::Linear, 2);
    machine.space_mut(tid).set_read_only(1, true);

    assert_eq!(machine.read_mem(PAGE_SIZE, 4).unwrap(), word(11));
    assert_eq!(machine.write_mem(PAGE_SIZE, 4, 1), Err(Exception::ReadOnly));
    machine.write_mem(0, 4, 1).unwrap();
}

#[test]
fn bogus_frame_raises_bus_error() {
    let (mut machine, tid) = machine_with(2, PageTableKind::Linear, 1);
    machine.space_mut(tid).page_table.set(
        0,
        TranslationEntry {
            virtual_page: 0,
            physical_page: 99,
            flags: PteFlag::Valid.into(),
            in_time: 0,
            last_hit_time: 0,
        },
    );
    assert_eq!(machine.read_mem(0, 4), Err(Exception::BusError));
}

#[test]
fn spaces_are_isolated_across_switches() {
    init_logger();
    let mut machine = Machine::new(MachineConfig {
        num_phys_pages: 4,
        ..MachineConfig::default()
    });
    let a = machine.create_space(2, BackingStore::shadow(2));
    let b = machine.create_space(2, BackingStore::shadow(2));

    machine.set_current(a);
    machine.write_mem(0, 4, 0xaaaa_aaaa).unwrap();
    machine.set_current(b);
    machine.write_mem(0, 4, 0xbbbb_bbbb).unwrap();

    machine.set_current(a);
    assert_eq!(machine.read_mem(0, 4).unwrap(), 0xaaaa_aaaa);
    machine.set_current(b);
    assert_eq!(machine.read_mem(0, 4).unwrap(), 0xbbbb_bbbb);
}

#[test]
fn destroy_space_releases_frames() {
    init_logger();
    let mut machine = Machine::new(MachineConfig {
        num_phys_pages: 2,
        ..MachineConfig::default()
    });
    let tid = machine.create_space(2, BackingStore::shadow(2));
    machine.set_current(tid);
    machine.write_mem(0, 4, 1).unwrap();
    machine.write_mem(PAGE_SIZE, 4, 2).unwrap();

    machine.destroy_space(tid);
    assert!(!machine.phys_page(0).valid);
    assert!(!machine.phys_page(1).valid);
}

// 后备存储落在模拟文件系统里：换出的脏页要能从交换文件里读到
#[test]
fn file_backed_store_round_trips_through_the_fs() {
    init_logger();
    let disk = Arc::new(SynchDisk::new(Arc::new(MemDisk::new())));
    let mut fs = FileSystem::new(disk, true);
    let pages = 4;
    assert!(fs.create("/swap0", (pages * PAGE_SIZE) as i64));
    let swap = fs.open("/swap0").unwrap();

    let mut machine = Machine::new(MachineConfig {
        num_phys_pages: 2,
        ..MachineConfig::default()
    });
    let tid = machine.create_space(pages, BackingStore::File(swap));
    machine.set_current(tid);

    machine.write_mem(0, 4, 0x5a5a_00ff).unwrap();
    machine.read_mem(PAGE_SIZE, 4).unwrap();
    machine.read_mem(2 * PAGE_SIZE, 4).unwrap();
    assert_eq!(machine.stats.page_outs, 1);

    let mut check = fs.open("/swap0").unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(check.read_at(&mut buf, 0), 4);
    assert_eq!(u32::from_le_bytes(buf), 0x5a5a_00ff);

    assert_eq!(machine.read_mem(0, 4).unwrap(), 0x5a5a_00ff);
}

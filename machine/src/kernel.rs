//! # 内核上下文
//!
//! 机器、文件系统、打开文件表与控制台缓冲的集合体，
//! 显式传递而非进程级单例。用户程序陷入内核的唯一入口是
//! [`handle_exception`](Kernel::handle_exception)：
//! 系统调用在此分发，缺页在此重填，其余异常终止肇事线程。
//!
//! 线程调度器是外部协作者，Exec/Fork/Join/Yield 经
//! [`ThreadSystem`] 钩子转交给它。

use log::{debug, error, info, warn};

use sector_fs::{FileSystem, OpenFile};

use crate::exception::Exception;
use crate::machine::Machine;
use crate::registers::{ARG1_REG, ARG2_REG, ARG3_REG, BAD_VADDR_REG, SYSCALL_REG};
use crate::syscall::Syscall;

/// 线程系统的接口。默认实现给无调度器的裸机器用，
/// 一概拒绝或空转。
pub trait ThreadSystem {
    /// 装载并运行可执行文件，返回新线程号
    fn exec(&mut self, path: &str) -> i32 {
        let _ = path;
        -1
    }

    fn fork(&mut self, func_pc: i32) -> i32 {
        let _ = func_pc;
        -1
    }

    fn yield_now(&mut self) {}

    fn join(&mut self, tid: i32) {
        let _ = tid;
    }

    /// 当前线程以 `code` 退出
    fn finish(&mut self, code: i32) {
        let _ = code;
    }
}

struct NoThreads;

impl ThreadSystem for NoThreads {}

/// 新文件默认的初始大小；写越界时文件会自行扩容
const DEFAULT_FILE_SIZE: i64 = 128;

/// 控制台输入输出占据的句柄
const CONSOLE_INPUT: i32 = 0;
const CONSOLE_OUTPUT: i32 = 1;
/// 文件句柄从这里开始编号
const FIRST_FILE_HANDLE: i32 = 2;

pub struct Kernel {
    pub machine: Machine,
    pub file_system: FileSystem,
    /// 打开文件表，句柄减去 [`FIRST_FILE_HANDLE`] 即下标
    open_files: Vec<Option<OpenFile>>,
    threads: Box<dyn ThreadSystem>,
    /// 控制台输出缓冲
    pub console_out: Vec<u8>,
    /// 控制台输入缓冲，由嵌入方喂入
    pub console_in: Vec<u8>,
    cwd: String,
    pub halted: bool,
}

impl Kernel {
    pub fn new(machine: Machine, file_system: FileSystem) -> Self {
        Self {
            machine,
            file_system,
            open_files: Vec::new(),
            threads: Box::new(NoThreads),
            console_out: Vec::new(),
            console_in: Vec::new(),
            cwd: String::from("/"),
            halted: false,
        }
    }

    /// 换上真正的线程系统
    pub fn with_thread_system(mut self, threads: Box<dyn ThreadSystem>) -> Self {
        self.threads = threads;
        self
    }

    /// 用户态陷入内核的入口。只有缺页被就地恢复；
    /// 返回 Err 的异常终止肇事的用户线程。
    pub fn handle_exception(&mut self, which: Exception) -> Result<(), Exception> {
        match which {
            Exception::Syscall => self.handle_syscall(),
            Exception::PageFault => {
                let bad = self.machine.registers.read(BAD_VADDR_REG) as usize;
                self.machine.refill_tlb(bad)
            }
            other => {
                error!("unexpected user mode exception: {other}");
                Err(other)
            }
        }
    }
}

impl Kernel {
    fn handle_syscall(&mut self) -> Result<(), Exception> {
        let code = self.machine.registers.read(SYSCALL_REG);
        let call = match Syscall::try_from(code) {
            Ok(call) => call,
            Err(unknown) => {
                warn!("unknown syscall {unknown}");
                self.machine.registers.increment_pc();
                return Ok(());
            }
        };
        debug!("syscall {call:?}");

        match call {
            Syscall::Halt => {
                info!("halt initiated by user program");
                self.file_system.flush();
                info!("{}", self.machine.stats);
                self.halted = true;
            }
            Syscall::Exit => {
                let code = self.machine.registers.read(ARG1_REG);
                debug!("thread finished with code {code}");
                let current = self.machine.current();
                self.machine.destroy_space(current);
                self.threads.finish(code);
                // Exit 改变控制流，不推进 PC
                return Ok(());
            }
            Syscall::Exec => {
                let path = self.read_user_string(ARG1_REG)?;
                let path = self.resolve(&path);
                let tid = self.threads.exec(&path);
                self.machine.registers.write(SYSCALL_REG, tid);
                // Exec 同理
                return Ok(());
            }
            Syscall::Join => {
                let tid = self.machine.registers.read(ARG1_REG);
                self.threads.join(tid);
            }
            Syscall::Fork => {
                let func_pc = self.machine.registers.read(ARG1_REG);
                let tid = self.threads.fork(func_pc);
                self.machine.registers.write(SYSCALL_REG, tid);
            }
            Syscall::Yield => self.threads.yield_now(),
            Syscall::Create => {
                let path = self.read_user_string(ARG1_REG)?;
                let path = self.resolve(&path);
                self.file_system.create(&path, DEFAULT_FILE_SIZE);
            }
            Syscall::Open => {
                let path = self.read_user_string(ARG1_REG)?;
                let path = self.resolve(&path);
                let handle = match self.file_system.open(&path) {
                    Some(file) => self.insert_file(file),
                    None => -1,
                };
                self.machine.registers.write(SYSCALL_REG, handle);
            }
            Syscall::Close => {
                let handle = self.machine.registers.read(ARG1_REG);
                self.take_file(handle);
            }
            Syscall::Write => {
                let addr = self.machine.registers.read(ARG1_REG) as usize;
                let size = self.machine.registers.read(ARG2_REG) as usize;
                let handle = self.machine.registers.read(ARG3_REG);
                let mut data = Vec::with_capacity(size);
                for i in 0..size {
                    data.push(self.machine.read_mem(addr + i, 1)? as u8);
                }
                if handle == CONSOLE_OUTPUT {
                    self.console_out.extend_from_slice(&data);
                } else if let Some(file) = self.file_handle(handle) {
                    file.write(&data);
                } else {
                    warn!("write to a stale handle {handle}");
                }
            }
            Syscall::Read => {
                let addr = self.machine.registers.read(ARG1_REG) as usize;
                let size = self.machine.registers.read(ARG2_REG) as usize;
                let handle = self.machine.registers.read(ARG3_REG);
                let data = if handle == CONSOLE_INPUT {
                    let take = size.min(self.console_in.len());
                    self.console_in.drain(..take).collect()
                } else if let Some(file) = self.file_handle(handle) {
                    let mut buf = vec![0u8; size];
                    let read = file.read(&mut buf);
                    buf.truncate(read);
                    buf
                } else {
                    warn!("read from a stale handle {handle}");
                    Vec::new()
                };
                for (i, byte) in data.iter().enumerate() {
                    self.machine.write_mem(addr + i, 1, *byte as u32)?;
                }
                self.machine.registers.write(SYSCALL_REG, data.len() as i32);
            }
            Syscall::MkDir => {
                let path = self.read_user_string(ARG1_REG)?;
                let path = self.resolve(&path);
                self.file_system.create(&path, -1);
            }
            Syscall::RmDir | Syscall::Remove => {
                let path = self.read_user_string(ARG1_REG)?;
                let path = self.resolve(&path);
                self.file_system.remove(&path);
            }
            Syscall::Ls => {
                let listing = self.file_system.list();
                self.console_out.extend_from_slice(listing.as_bytes());
            }
            Syscall::Pwd => {
                self.console_out.extend_from_slice(self.cwd.as_bytes());
                self.console_out.push(b'\n');
            }
            Syscall::Cd => {
                let path = self.read_user_string(ARG1_REG)?;
                self.cwd = self.resolve(&path);
            }
            Syscall::Help => {
                self.console_out.extend_from_slice(HELP_TEXT.as_bytes());
            }
        }

        self.machine.registers.increment_pc();
        Ok(())
    }

    /// 读出用户内存里以 \0 结尾的字符串，地址取自寄存器 `reg`
    fn read_user_string(&mut self, reg: usize) -> Result<String, Exception> {
        let mut addr = self.machine.registers.read(reg) as usize;
        let mut bytes = Vec::new();
        loop {
            let value = self.machine.read_mem(addr, 1)?;
            if value == 0 {
                break;
            }
            bytes.push(value as u8);
            addr += 1;
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// 相对路径挂在当前工作目录之下
    fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else if self.cwd == "/" {
            format!("/{path}")
        } else {
            format!("{}/{path}", self.cwd)
        }
    }

    fn insert_file(&mut self, file: OpenFile) -> i32 {
        let index = match self.open_files.iter().position(Option::is_none) {
            Some(index) => {
                self.open_files[index] = Some(file);
                index
            }
            None => {
                self.open_files.push(Some(file));
                self.open_files.len() - 1
            }
        };
        FIRST_FILE_HANDLE + index as i32
    }

    fn file_handle(&mut self, handle: i32) -> Option<&mut OpenFile> {
        let index = usize::try_from(handle - FIRST_FILE_HANDLE).ok()?;
        self.open_files.get_mut(index)?.as_mut()
    }

    fn take_file(&mut self, handle: i32) -> Option<OpenFile> {
        let index = usize::try_from(handle - FIRST_FILE_HANDLE).ok()?;
        self.open_files.get_mut(index)?.take()
    }
}

const HELP_TEXT: &str = "\
x     [path] execute the file specified
rmdir [path] remove the dir specified by path
mkdir [path] create the dir specified by path
rm    [path] remove the file specified by path
ls    list all the files in the current dir
pwd   print the working directory
cd    [path] change the working directory
help  show this text
";

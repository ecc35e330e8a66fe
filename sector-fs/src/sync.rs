//! # 同步原语
//!
//! 线程系统暴露给内核其余部分的接口：信号量与互斥锁。
//! 内核只在可能阻塞的地方使用它们；地址翻译不会阻塞，因此不经过这里。

use std::sync::Condvar;
use std::sync::Mutex;

/// 计数信号量
pub struct Semaphore {
    value: Mutex<usize>,
    wakeup: Condvar,
}

impl Semaphore {
    pub fn new(value: usize) -> Self {
        Self {
            value: Mutex::new(value),
            wakeup: Condvar::new(),
        }
    }

    /// 等待：计数减一，为零则阻塞
    pub fn p(&self) {
        let mut value = self.value.lock().unwrap();
        while *value == 0 {
            value = self.wakeup.wait(value).unwrap();
        }
        *value -= 1;
    }

    /// 发信：计数加一，并唤醒一个等待者
    pub fn v(&self) {
        *self.value.lock().unwrap() += 1;
        self.wakeup.notify_one();
    }
}

/// 互斥锁，即初值为一的二元信号量
pub struct Lock(Semaphore);

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    #[inline]
    pub fn new() -> Self {
        Self(Semaphore::new(1))
    }

    #[inline]
    pub fn acquire(&self) {
        self.0.p();
    }

    #[inline]
    pub fn release(&self) {
        self.0.v();
    }
}

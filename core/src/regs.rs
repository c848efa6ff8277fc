//! CE 寄存器定义和操作
//!
//! 所有访问都是 volatile 的 32 位读写，本层不加锁，
//! 由调度器保证同一时刻只有一个提交者访问寄存器块。

use alloc::sync::Arc;
use core::ptr::{read_volatile, write_volatile};

use static_assertions::{const_assert, const_assert_eq};

use crate::{
    CE_PIO_BURST,
    desc::{DESC_WORDS, DescCtrl, Descriptor},
};

// ============ CE 寄存器偏移 ============

/// 控制寄存器
pub const CE_CTRL: usize = 0x00;
/// 中断使能
pub const CE_INTR_ENABLE: usize = 0x04;
/// 描述符地址 (低32位)
pub const CE_DESC_LOW: usize = 0x08;
/// 描述符地址 (高32位)
pub const CE_DESC_HIGH: usize = 0x0c;
/// 原始中断状态，写 1 清除
pub const CE_INTR_RAW: usize = 0x10;
/// 安全密钥有效标志
pub const CE_SE_KEY_VALID: usize = 0x14;
/// 当前描述符地址 (低32位)
pub const CE_CUR_DESC_LOW: usize = 0x18;
/// 当前描述符地址 (高32位)
pub const CE_CUR_DESC_HIGH: usize = 0x1c;
/// PIO 描述符窗口
pub const CE_DESC: usize = 0x80;
/// 密钥影子寄存器
pub const CE_KEY: usize = 0x100;
/// IV 影子寄存器
pub const CE_IV: usize = 0x180;
/// hash 结果影子寄存器
pub const CE_SHA_PARAM: usize = 0x1c0;

/// 寄存器块大小
pub const CE_REG_SIZE: usize = 0x1e0;

pub const CE_KEY_WORDS: usize = 24;
pub const CE_IV_WORDS: usize = 12;
pub const CE_SHA_PARAM_WORDS: usize = 8;

const_assert!(CE_DESC + DESC_WORDS * 4 <= CE_KEY);
const_assert!(CE_KEY + CE_KEY_WORDS * 4 <= CE_IV);
const_assert!(CE_IV + CE_IV_WORDS * 4 <= CE_SHA_PARAM);
const_assert_eq!(CE_SHA_PARAM + CE_SHA_PARAM_WORDS * 4, CE_REG_SIZE);

// ============ CE 控制位 ============

/// 读 burst 长度位
pub const CE_CTRL_RD_BURST_BIT: u32 = 16;
/// 写 burst 长度位
pub const CE_CTRL_WR_BURST_BIT: u32 = 24;
/// 全部中断源
pub const CE_INTR_ALL: u32 = 0xffff_ffff;

/// 32 位寄存器总线
///
/// 真实设备用 [`MmioBus`]，测试用软件设备模型
pub trait RegisterBus: Send + Sync {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);
}

impl<T: RegisterBus + ?Sized> RegisterBus for Arc<T> {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
}

/// 内存映射的寄存器块
pub struct MmioBus {
    base: *mut u8,
}

// SAFETY: 寄存器访问是通过内存映射进行的，可以安全地在线程间共享
// 多线程访问需要在更高层进行同步
unsafe impl Sync for MmioBus {}
unsafe impl Send for MmioBus {}

impl MmioBus {
    /// # Safety
    /// 调用者必须确保 base 指向有效的 CE 寄存器映射地址，且映射长度不小于 [`CE_REG_SIZE`]
    pub const unsafe fn new(base: *mut u8) -> Self {
        Self { base }
    }
}

impl RegisterBus for MmioBus {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        unsafe { read_volatile(self.base.add(offset) as *const u32) }
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        unsafe { write_volatile(self.base.add(offset) as *mut u32, value) }
    }
}

/// CE 寄存器协议
pub struct CeRegs<B> {
    bus: B,
}

impl<B: RegisterBus> CeRegs<B> {
    pub const fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// 设置 PIO burst 长度，清除后打开全部中断
    pub fn init(&self) {
        self.bus.write(
            CE_CTRL,
            (CE_PIO_BURST << CE_CTRL_RD_BURST_BIT) | (CE_PIO_BURST << CE_CTRL_WR_BURST_BIT),
        );
        self.bus.write(CE_INTR_RAW, CE_INTR_ALL);
        self.bus.write(CE_INTR_ENABLE, CE_INTR_ALL);
    }

    /// 停止引擎并清除挂起的中断
    pub fn destroy(&self) {
        self.bus.write(CE_CTRL, 0);
        self.bus.write(CE_INTR_ENABLE, 0);
        self.bus.write(CE_INTR_RAW, CE_INTR_ALL);
    }

    /// 把描述符逐字写入 PIO 窗口后置启动位，不等待
    pub fn trigger(&self, desc: &Descriptor) {
        for (i, word) in desc.to_words().iter().enumerate() {
            self.bus.write(CE_DESC + i * 4, *word);
        }
        io_barrier();
        let ctrl = self.bus.read(CE_CTRL);
        self.bus.write(CE_CTRL, ctrl | DescCtrl::START.bits());
    }

    pub fn int_status(&self) -> u32 {
        self.bus.read(CE_INTR_RAW)
    }

    pub fn int_clear(&self) {
        self.bus.write(CE_INTR_RAW, CE_INTR_ALL);
    }

    pub fn is_busy(&self) -> bool {
        self.bus.read(CE_CTRL) & DescCtrl::START.bits() != 0
    }

    pub fn is_secure_key_valid(&self) -> bool {
        self.bus.read(CE_SE_KEY_VALID) != 0
    }

    /// 读回 IV 影子寄存器，返回写入的字节数
    pub fn save_iv(&self, out: &mut [u8], block_len: usize) -> usize {
        self.read_shadow(CE_IV, out, block_len.min(CE_IV_WORDS * 4))
    }

    /// 读回 hash 结果影子寄存器，返回写入的字节数
    pub fn save_hash(&self, out: &mut [u8], hash_len: usize) -> usize {
        self.read_shadow(CE_SHA_PARAM, out, hash_len.min(CE_SHA_PARAM_WORDS * 4))
    }

    /// 每个寄存器按小端拆成 4 个字节
    fn read_shadow(&self, base: usize, out: &mut [u8], len: usize) -> usize {
        let words = len.min(out.len()) / 4;
        for (i, chunk) in out.chunks_exact_mut(4).take(words).enumerate() {
            chunk.copy_from_slice(&self.bus.read(base + i * 4).to_le_bytes());
        }
        words * 4
    }
}

/// 描述符写入与启动位之间的 I/O 屏障
#[inline]
fn io_barrier() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "riscv64")] {
            unsafe { core::arch::asm!("fence iorw, iorw") };
        } else {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}

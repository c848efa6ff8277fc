//! 软件设备模型
//!
//! 按寄存器布局模拟 CE：置启动位时解码 PIO 窗口中的描述符，
//! 在恒等映射的内存上执行，填写 IV / hash 影子寄存器并产生中断。
//! 运算是确定、可逆的替代变换，不是真正的密码算法。
//!
//! 描述符中的地址被直接当作 CPU 指针使用，只能配合恒等 DMA 映射。

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::{
    alg::{MAX_BLOCK_LEN, MAX_HASH_LEN},
    desc::{DESC_WORDS, DescCtrl, RawDesc},
    engine::IrqHandler,
    regs::{
        CE_CTRL, CE_DESC, CE_INTR_ENABLE, CE_INTR_RAW, CE_IV, CE_REG_SIZE, CE_SE_KEY_VALID,
        CE_SHA_PARAM, RegisterBus,
    },
};

/// efuse 中的安全密钥
pub const DUMMY_EFUSE_KEY: [u8; 32] = [0x5a; 32];

const FAMILY_AES: u32 = 0x02;
const FAMILY_DES: u32 = 0x04;
const FAMILY_SM4: u32 = 0x08;
const FAMILY_HASH: u32 = 0x10;
const FAMILY_BASE: u32 = 0x20;

const BASE64_TABLE: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// 描述符执行统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DummyStats {
    /// 累计启动次数
    pub triggers: usize,
    /// 已启动但中断尚未清除的描述符个数
    pub outstanding: usize,
    pub max_outstanding: usize,
    /// 前一个描述符未完成时再次启动的次数
    pub overlaps: usize,
    /// 累计寄存器写次数
    pub writes: usize,
}

/// 软件 CE
pub struct DummyCe {
    regs: Mutex<[u32; CE_REG_SIZE / 4]>,
    irq: Mutex<Option<IrqHandler>>,
    stats: Mutex<DummyStats>,
    hold_irq: AtomicBool,
}

impl DummyCe {
    pub fn new() -> Self {
        Self {
            regs: Mutex::new([0; CE_REG_SIZE / 4]),
            irq: Mutex::new(None),
            stats: Mutex::new(DummyStats::default()),
            hold_irq: AtomicBool::new(false),
        }
    }

    /// 接上中断线
    pub fn connect_irq(&self, handler: IrqHandler) {
        *self.irq.lock() = Some(handler);
    }

    pub fn set_secure_key_valid(&self, valid: bool) {
        self.regs.lock()[CE_SE_KEY_VALID / 4] = valid as u32;
    }

    /// 为 true 时描述符照常执行，但不送出中断
    pub fn hold_irq(&self, hold: bool) {
        self.hold_irq.store(hold, Ordering::Release);
    }

    /// 手动送出一次中断
    pub fn fire_irq(&self) {
        if let Some(handler) = self.irq.lock().as_ref() {
            handler();
        }
    }

    pub fn stats(&self) -> DummyStats {
        *self.stats.lock()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = DummyStats::default();
    }

    fn start(&self, regs: &mut [u32; CE_REG_SIZE / 4]) {
        {
            let mut stats = self.stats.lock();
            stats.triggers += 1;
            stats.outstanding += 1;
            if stats.outstanding > 1 {
                stats.overlaps += 1;
            }
            stats.max_outstanding = stats.max_outstanding.max(stats.outstanding);
        }

        let mut words = [0u32; DESC_WORDS];
        words.copy_from_slice(&regs[CE_DESC / 4..CE_DESC / 4 + DESC_WORDS]);
        let desc = RawDesc::from_words(words);
        match (desc.ctrl >> 8) & 0xff {
            FAMILY_AES | FAMILY_SM4 => run_cipher(regs, &desc, 16),
            FAMILY_DES => run_cipher(regs, &desc, 8),
            FAMILY_HASH => run_hash(regs, &desc),
            FAMILY_BASE => run_base64(&desc),
            family => warn!("dummy ce: unknown family {:#x}", family),
        }

        regs[CE_CTRL / 4] &= !DescCtrl::START.bits();
        regs[CE_INTR_RAW / 4] |= 1;
    }
}

impl Default for DummyCe {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for DummyCe {
    fn read(&self, offset: usize) -> u32 {
        self.regs.lock()[offset / 4]
    }

    fn write(&self, offset: usize, value: u32) {
        self.stats.lock().writes += 1;
        let raise = {
            let mut regs = self.regs.lock();
            match offset {
                CE_INTR_RAW => {
                    if regs[CE_INTR_RAW / 4] & value & 1 != 0 {
                        let mut stats = self.stats.lock();
                        stats.outstanding = stats.outstanding.saturating_sub(1);
                    }
                    regs[CE_INTR_RAW / 4] &= !value;
                    false
                }
                CE_CTRL => {
                    let prev = regs[CE_CTRL / 4];
                    regs[CE_CTRL / 4] = value;
                    let start = DescCtrl::START.bits();
                    if value & start != 0 && prev & start == 0 {
                        self.start(&mut regs);
                        regs[CE_INTR_ENABLE / 4] != 0
                    } else {
                        false
                    }
                }
                CE_SE_KEY_VALID => false,
                _ => {
                    regs[offset / 4] = value;
                    false
                }
            }
        };
        if raise && !self.hold_irq.load(Ordering::Acquire) {
            self.fire_irq();
        }
    }
}

fn write_shadow(regs: &mut [u32; CE_REG_SIZE / 4], base: usize, bytes: &[u8]) {
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        let mut word = [0u8; 4];
        word.copy_from_slice(chunk);
        regs[base / 4 + i] = u32::from_le_bytes(word);
    }
}

/// # Safety
/// 描述符地址必须是有效的 CPU 地址
unsafe fn input(addr: u64, len: usize) -> Vec<u8> {
    if len == 0 {
        return Vec::new();
    }
    unsafe { core::slice::from_raw_parts(addr as usize as *const u8, len) }.to_vec()
}

/// # Safety
/// 描述符地址必须是有效的 CPU 地址
unsafe fn output(addr: u64, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    unsafe { core::slice::from_raw_parts_mut(addr as usize as *mut u8, data.len()) }
        .copy_from_slice(data);
}

fn run_cipher(regs: &mut [u32; CE_REG_SIZE / 4], desc: &RawDesc, block_len: usize) {
    let key = if desc.ctrl & DescCtrl::SECURE_KEY.bits() != 0 {
        DUMMY_EFUSE_KEY
    } else {
        desc.operand
    };
    let mut kb = [0u8; MAX_BLOCK_LEN];
    for (j, b) in kb.iter_mut().enumerate() {
        *b = key[j] ^ key[j + 16];
    }
    let encrypt = desc.alg & 1 != 0;
    let mode = (desc.alg >> 1) & 3;
    let mut chain = desc.iv;

    let mut data = unsafe { input(desc.src, desc.len as usize) };
    for block in data.chunks_exact_mut(block_len) {
        match mode {
            // ECB
            0 => {
                for (j, b) in block.iter_mut().enumerate() {
                    *b ^= kb[j];
                }
            }
            // CBC
            1 => {
                let mut next = [0u8; MAX_BLOCK_LEN];
                for (j, b) in block.iter_mut().enumerate() {
                    let orig = *b;
                    *b ^= kb[j] ^ chain[j];
                    next[j] = if encrypt { *b } else { orig };
                }
                chain[..block_len].copy_from_slice(&next[..block_len]);
            }
            // CTR
            _ => {
                for (j, b) in block.iter_mut().enumerate() {
                    *b ^= kb[j] ^ chain[j];
                }
                for b in chain[..block_len].iter_mut().rev() {
                    *b = b.wrapping_add(1);
                    if *b != 0 {
                        break;
                    }
                }
            }
        }
    }
    unsafe { output(desc.dst, &data) };
    write_shadow(regs, CE_IV, &chain);
}

fn run_hash(regs: &mut [u32; CE_REG_SIZE / 4], desc: &RawDesc) {
    let words = if desc.alg == 0x01 { 5 } else { 8 };
    let mut state = [0u32; MAX_HASH_LEN / 4];
    for (i, s) in state.iter_mut().enumerate().take(words) {
        let mut w = [0u8; 4];
        w.copy_from_slice(&desc.operand[i * 4..i * 4 + 4]);
        *s = u32::from_le_bytes(w);
    }

    let data = unsafe { input(desc.src, desc.len as usize) };
    for block in data.chunks_exact(64) {
        for (i, s) in state.iter_mut().enumerate().take(words) {
            let mut w = [0u8; 4];
            w.copy_from_slice(&block[(i * 4) % 64..(i * 4) % 64 + 4]);
            *s = s
                .rotate_left(5)
                .wrapping_add(u32::from_le_bytes(w))
                .wrapping_add(0x9e37_79b9 ^ i as u32);
        }
    }

    let mut digest = [0u8; MAX_HASH_LEN];
    for (i, s) in state.iter().enumerate().take(words) {
        digest[i * 4..i * 4 + 4].copy_from_slice(&s.to_le_bytes());
    }
    write_shadow(regs, CE_SHA_PARAM, &digest[..words * 4]);
}

fn run_base64(desc: &RawDesc) {
    let src = unsafe { input(desc.src, desc.len as usize) };
    let out = if desc.alg & 1 != 0 {
        base64_encode(&src)
    } else {
        base64_decode(&src)
    };
    let len = out.len().min(desc.dst_len() as usize);
    unsafe { output(desc.dst, &out[..len]) };
}

fn base64_encode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len().div_ceil(3) * 4);
    for group in src.chunks(3) {
        let mut buf = [0u8; 3];
        buf[..group.len()].copy_from_slice(group);
        let n = (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2]);
        for i in 0..4 {
            if i <= group.len() {
                out.push(BASE64_TABLE[((n >> (18 - 6 * i)) & 0x3f) as usize]);
            } else {
                out.push(b'=');
            }
        }
    }
    out
}

fn base64_decode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() / 4 * 3);
    for group in src.chunks_exact(4) {
        let mut n = 0u32;
        let mut valid: usize = 0;
        for &c in group {
            let v = match BASE64_TABLE.iter().position(|&t| t == c) {
                Some(v) => {
                    valid += 1;
                    v as u32
                }
                None => 0,
            };
            n = (n << 6) | v;
        }
        let bytes = [(n >> 16) as u8, (n >> 8) as u8, n as u8];
        out.extend_from_slice(&bytes[..valid.saturating_sub(1)]);
    }
    out
}

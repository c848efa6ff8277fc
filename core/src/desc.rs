//! 硬件命令描述符
//!
//! 每次 trigger 在栈上构建一个描述符，写入 PIO 描述符窗口后即丢弃。
//! 描述符从不链接，`next` 恒为 0。

use bitflags::bitflags;
use memory_addr::PhysAddr;
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub use crate::alg::Direction;
use crate::{
    alg::{BaseAlg, CipherAlg, HashAlg, MAX_BLOCK_LEN, MAX_KEY_LEN, base64_output_len},
    error::{CeError, CeResult},
};

/// 描述符字节数
pub const DESC_BYTES: usize = 88;
/// 描述符 32 位字数，等于 PIO 窗口寄存器个数
pub const DESC_WORDS: usize = DESC_BYTES / 4;

bitflags! {
    /// 描述符控制字中驱动会改写的位
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescCtrl: u32 {
        /// 启动位 (同时也是控制寄存器的 busy 位)
        const START = 1 << 0;
        /// 密钥槽选择
        const KEY_SLOT = 0xf << 16;
        /// 使用 efuse 安全密钥，与 KEY_SLOT 互斥
        const SECURE_KEY = 1 << 27;
    }
}

/// 描述符的硬件内存布局
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RawDesc {
    pub ctrl: u32,
    pub alg: u32,
    pub next: u64,
    pub src: u64,
    pub dst: u64,
    pub len: u64,
    /// 密钥 / hash 初始值，或 base64 的输出长度
    pub operand: [u8; 32],
    pub iv: [u8; 16],
}

const_assert_eq!(core::mem::size_of::<RawDesc>(), DESC_BYTES);

impl RawDesc {
    /// 从 PIO 窗口镜像还原
    pub fn from_words(words: [u32; DESC_WORDS]) -> Self {
        zerocopy::transmute!(words)
    }

    /// base64 描述符的输出长度字段
    pub fn dst_len(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.operand[..8]);
        u64::from_ne_bytes(bytes)
    }
}

/// 密钥字段与输出长度字段共用同一段字节
///
/// 由算法族决定哪一个有效：cipher / hash 使用 `Key`，base64 使用 `DstLen`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Key([u8; MAX_KEY_LEN]),
    DstLen(u64),
}

impl Operand {
    fn to_bytes(self) -> [u8; MAX_KEY_LEN] {
        match self {
            Self::Key(key) => key,
            Self::DstLen(len) => {
                let mut bytes = [0u8; MAX_KEY_LEN];
                bytes[..8].copy_from_slice(&len.to_ne_bytes());
                bytes
            }
        }
    }
}

/// 分组密码操作参数
#[derive(Debug, Clone, Copy)]
pub struct CipherOp<'a> {
    pub alg: CipherAlg,
    pub dir: Direction,
    pub src: PhysAddr,
    pub dst: PhysAddr,
    pub len: usize,
    /// `None` 时使用安全密钥
    pub key: Option<&'a [u8]>,
    /// `None` 时 IV 全零
    pub iv: Option<&'a [u8]>,
}

/// hash 操作参数
#[derive(Debug, Clone, Copy)]
pub struct HashOp<'a> {
    pub alg: HashAlg,
    pub src: PhysAddr,
    pub len: usize,
    /// 当前 hash 状态，第一块时为标准初始值
    pub init: Option<&'a [u8]>,
}

/// base N 编解码操作参数
#[derive(Debug, Clone, Copy)]
pub struct Base64Op<'a> {
    pub alg: BaseAlg,
    pub dir: Direction,
    pub src: PhysAddr,
    pub dst: PhysAddr,
    /// 输入数据的 CPU 视图，解码时需要读取尾部填充
    pub input: &'a [u8],
    /// 输出缓冲区容量
    pub dst_cap: usize,
}

/// 命令描述符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub ctrl: DescCtrl,
    pub alg: u32,
    pub next: u64,
    pub src: PhysAddr,
    pub dst: PhysAddr,
    pub len: u64,
    pub operand: Operand,
    pub iv: [u8; MAX_BLOCK_LEN],
}

impl Descriptor {
    /// 构建分组密码描述符
    ///
    /// 未给出密钥时退回到 efuse 安全密钥，此时清除密钥槽选择位并置安全密钥位
    pub fn cipher(op: &CipherOp<'_>, secure_key_valid: bool) -> CeResult<Self> {
        let info = op.alg.info();
        if op.len % info.block_len != 0 {
            error!(
                "{}: length {} not aligned to block length {}",
                op.alg.name(),
                op.len,
                info.block_len
            );
            return Err(CeError::BlockLengthMismatch);
        }

        let mut ctrl = DescCtrl::from_bits_retain(info.ctrl);
        let mut key = [0u8; MAX_KEY_LEN];
        match op.key {
            Some(k) => {
                if k.len() < info.key_len {
                    error!(
                        "{}: key length {} shorter than {}",
                        op.alg.name(),
                        k.len(),
                        info.key_len
                    );
                    return Err(CeError::InvalidKeyLength);
                }
                key[..info.key_len].copy_from_slice(&k[..info.key_len]);
            }
            None => {
                if !secure_key_valid {
                    error!("{}: no key given and secure key not valid", op.alg.name());
                    return Err(CeError::KeyUnavailable);
                }
                ctrl.remove(DescCtrl::KEY_SLOT);
                ctrl.insert(DescCtrl::SECURE_KEY);
            }
        }

        let mut iv = [0u8; MAX_BLOCK_LEN];
        if let Some(v) = op.iv {
            if v.len() < info.block_len {
                error!(
                    "{}: iv length {} shorter than {}",
                    op.alg.name(),
                    v.len(),
                    info.block_len
                );
                return Err(CeError::InvalidArgument);
            }
            iv[..info.block_len].copy_from_slice(&v[..info.block_len]);
        }

        Ok(Self {
            ctrl,
            alg: info.alg | u32::from(op.dir),
            next: 0,
            src: op.src,
            dst: op.dst,
            len: op.len as u64,
            operand: Operand::Key(key),
            iv,
        })
    }

    /// 构建 hash 描述符，初始状态放在密钥字段
    pub fn hash(op: &HashOp<'_>) -> CeResult<Self> {
        let info = op.alg.info();
        if op.len % info.block_len != 0 {
            error!(
                "{}: length {} not aligned to block length {}",
                op.alg.name(),
                op.len,
                info.block_len
            );
            return Err(CeError::BlockLengthMismatch);
        }
        let Some(init) = op.init else {
            error!("{}: initial hash value must be given", op.alg.name());
            return Err(CeError::InvalidArgument);
        };
        if init.len() < info.hash_len {
            error!(
                "{}: initial hash value {} bytes, need {}",
                op.alg.name(),
                init.len(),
                info.hash_len
            );
            return Err(CeError::InvalidArgument);
        }

        let mut key = [0u8; MAX_KEY_LEN];
        key[..info.hash_len].copy_from_slice(&init[..info.hash_len]);
        Ok(Self {
            ctrl: DescCtrl::from_bits_retain(info.ctrl),
            alg: info.alg,
            next: 0,
            src: op.src,
            dst: PhysAddr::from(0),
            len: op.len as u64,
            operand: Operand::Key(key),
            iv: [0; MAX_BLOCK_LEN],
        })
    }

    /// 构建 base64 描述符，输出长度由输入计算
    pub fn base64(op: &Base64Op<'_>) -> CeResult<Self> {
        let info = op.alg.info();
        let len = op.input.len();
        if !op.dir.is_encrypt() && len % info.encoded_align != 0 {
            error!(
                "{}: encoded data must be {} bytes aligned, got {}",
                op.alg.name(),
                info.encoded_align,
                len
            );
            return Err(CeError::BlockLengthMismatch);
        }
        let out_len = base64_output_len(op.alg, op.dir, op.input)?;
        if op.dst_cap < out_len {
            error!(
                "{}: output buffer {} bytes, need {}",
                op.alg.name(),
                op.dst_cap,
                out_len
            );
            return Err(CeError::InvalidArgument);
        }

        Ok(Self {
            ctrl: DescCtrl::from_bits_retain(info.ctrl),
            alg: u32::from(op.dir),
            next: 0,
            src: op.src,
            dst: op.dst,
            len: len as u64,
            operand: Operand::DstLen(out_len as u64),
            iv: [0; MAX_BLOCK_LEN],
        })
    }

    pub fn to_raw(&self) -> RawDesc {
        RawDesc {
            ctrl: self.ctrl.bits(),
            alg: self.alg,
            next: self.next,
            src: self.src.as_usize() as u64,
            dst: self.dst.as_usize() as u64,
            len: self.len,
            operand: self.operand.to_bytes(),
            iv: self.iv,
        }
    }

    /// PIO 窗口镜像，按本机字节序逐字写入
    pub fn to_words(&self) -> [u32; DESC_WORDS] {
        zerocopy::transmute!(self.to_raw())
    }
}

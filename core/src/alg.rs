//! 算法描述表
//!
//! 三张只读表 (cipher / hash / base N)，以算法编号为下标，
//! 保存描述符控制字模板、算法选择子、块长和密钥/摘要长度。

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{CeError, CeResult};

/// 最大块长 (IV 长度上限)
pub const MAX_BLOCK_LEN: usize = 16;
/// 最大密钥长度
pub const MAX_KEY_LEN: usize = 32;
/// 最大摘要长度
pub const MAX_HASH_LEN: usize = 32;
/// 最大 hash 块长
pub const MAX_HASH_BLOCK_LEN: usize = 64;

/// Base64 填充字符
pub const BASE64_PAD: u8 = b'=';

/// 操作方向
///
/// 选择子最低位：加密/编码为 1，解密/解码为 0
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum Direction {
    Decrypt = 0,
    Encrypt = 1,
}

impl Direction {
    pub const ENCODE: Self = Self::Encrypt;
    pub const DECODE: Self = Self::Decrypt;

    pub fn is_encrypt(self) -> bool {
        self == Self::Encrypt
    }
}

/// 对称算法表行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherInfo {
    /// 描述符控制字模板
    pub ctrl: u32,
    /// 算法选择子 (不含方向位)
    pub alg: u32,
    pub block_len: usize,
    pub key_len: usize,
}

/// 对称算法编号
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum CipherAlg {
    DesEcb = 0,
    DesCbc,
    DesCtr,
    DesEde3Ecb,
    DesEde3Cbc,
    DesEde3Ctr,
    Aes128Ecb,
    Aes128Cbc,
    Aes128Ctr,
    Aes192Ecb,
    Aes192Cbc,
    Aes192Ctr,
    Aes256Ecb,
    Aes256Cbc,
    Aes256Ctr,
    Sm4Ecb,
    Sm4Cbc,
    Sm4Ctr,
}

/// 对称算法表大小，合法编号必须小于该值
pub const CIPHER_MAX: u32 = 18;

const DES_CTRL: u32 = 0x0188_0407;
const AES_CTRL: u32 = 0x0188_0207;
const SM4_CTRL: u32 = 0x0188_0807;

const fn cipher_row(ctrl: u32, alg: u32, block_len: usize, key_len: usize) -> CipherInfo {
    CipherInfo {
        ctrl,
        alg,
        block_len,
        key_len,
    }
}

static CIPHER_INFO: [CipherInfo; CIPHER_MAX as usize] = [
    cipher_row(DES_CTRL, 0x00, 8, 8),
    cipher_row(DES_CTRL, 0x02, 8, 8),
    cipher_row(DES_CTRL, 0x04, 8, 8),
    cipher_row(DES_CTRL, 0x08, 8, 24),
    cipher_row(DES_CTRL, 0x0a, 8, 24),
    cipher_row(DES_CTRL, 0x0c, 8, 24),
    cipher_row(AES_CTRL, 0x20, 16, 16),
    cipher_row(AES_CTRL, 0x22, 16, 16),
    cipher_row(AES_CTRL, 0x24, 16, 16),
    cipher_row(AES_CTRL, 0x10, 16, 24),
    cipher_row(AES_CTRL, 0x12, 16, 24),
    cipher_row(AES_CTRL, 0x14, 16, 24),
    cipher_row(AES_CTRL, 0x08, 16, 32),
    cipher_row(AES_CTRL, 0x0a, 16, 32),
    cipher_row(AES_CTRL, 0x0c, 16, 32),
    cipher_row(SM4_CTRL, 0x00, 16, 16),
    cipher_row(SM4_CTRL, 0x02, 16, 16),
    cipher_row(SM4_CTRL, 0x04, 16, 16),
];

static CIPHER_NAME: [&str; CIPHER_MAX as usize] = [
    "des-ecb",
    "des-cbc",
    "des-ctr",
    "des-ede3-ecb",
    "des-ede3-cbc",
    "des-ede3-ctr",
    "aes-128-ecb",
    "aes-128-cbc",
    "aes-128-ctr",
    "aes-192-ecb",
    "aes-192-cbc",
    "aes-192-ctr",
    "aes-256-ecb",
    "aes-256-cbc",
    "aes-256-ctr",
    "sm4-ecb",
    "sm4-cbc",
    "sm4-ctr",
];

/// 分组密码族
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherFamily {
    Des,
    DesEde3,
    Aes,
    Sm4,
}

impl CipherFamily {
    /// crypto API 中的算法名
    pub fn cra_name(self) -> &'static str {
        match self {
            Self::Des => "des",
            Self::DesEde3 => "des3_ede",
            Self::Aes => "aes",
            Self::Sm4 => "sm4",
        }
    }
}

/// 工作模式
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum CipherMode {
    Ecb = 0,
    Cbc,
    Ctr,
}

impl CipherMode {
    pub fn cra_name(self) -> &'static str {
        match self {
            Self::Ecb => "ecb",
            Self::Cbc => "cbc",
            Self::Ctr => "ctr",
        }
    }

    /// ECB 没有 IV，不需要回读
    pub fn has_iv(self) -> bool {
        self != Self::Ecb
    }
}

impl CipherAlg {
    /// 从原始表下标解析
    pub fn from_index(index: u32) -> CeResult<Self> {
        Self::try_from(index).map_err(|_| {
            error!("unknown cipher [{}]", index);
            CeError::UnknownAlgorithm
        })
    }

    /// 根据 (算法族, 模式, 密钥长度) 选择表行
    ///
    /// AES 通过密钥长度区分 128/192/256，其余算法族密钥长度固定
    pub fn lookup(family: CipherFamily, mode: CipherMode, key_len: usize) -> CeResult<Self> {
        let base = match family {
            CipherFamily::Des => Self::DesEcb,
            CipherFamily::DesEde3 => Self::DesEde3Ecb,
            CipherFamily::Sm4 => Self::Sm4Ecb,
            CipherFamily::Aes => match key_len {
                16 => Self::Aes128Ecb,
                24 => Self::Aes192Ecb,
                32 => Self::Aes256Ecb,
                _ => {
                    error!("unsupported aes key length {}", key_len);
                    return Err(CeError::InvalidKeyLength);
                }
            },
        };
        let alg = Self::from_index(u32::from(base) + u32::from(mode))?;
        if alg.key_len() != key_len {
            error!(
                "{} expects {} bytes key, got {}",
                alg.name(),
                alg.key_len(),
                key_len
            );
            return Err(CeError::InvalidKeyLength);
        }
        Ok(alg)
    }

    pub fn info(self) -> &'static CipherInfo {
        &CIPHER_INFO[self as usize]
    }

    pub fn block_len(self) -> usize {
        self.info().block_len
    }

    pub fn key_len(self) -> usize {
        self.info().key_len
    }

    pub fn family(self) -> CipherFamily {
        match self as u32 {
            0..=2 => CipherFamily::Des,
            3..=5 => CipherFamily::DesEde3,
            6..=14 => CipherFamily::Aes,
            _ => CipherFamily::Sm4,
        }
    }

    pub fn mode(self) -> CipherMode {
        match self as u32 % 3 {
            0 => CipherMode::Ecb,
            1 => CipherMode::Cbc,
            _ => CipherMode::Ctr,
        }
    }

    pub fn name(self) -> &'static str {
        CIPHER_NAME[self as usize]
    }
}

/// hash 算法表行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashInfo {
    pub ctrl: u32,
    pub alg: u32,
    pub block_len: usize,
    pub hash_len: usize,
}

/// hash 算法编号
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum HashAlg {
    Sha1 = 0,
    Sha256,
}

pub const HASH_MAX: u32 = 2;

static HASH_INFO: [HashInfo; HASH_MAX as usize] = [
    HashInfo {
        ctrl: 0x0188_1007,
        alg: 0x01,
        block_len: 64,
        hash_len: 20,
    },
    HashInfo {
        ctrl: 0x0188_1007,
        alg: 0x03,
        block_len: 64,
        hash_len: 32,
    },
];

static SHA1_INIT_STATE: [u8; 20] = [
    0x67, 0x45, 0x23, 0x01, 0xef, 0xcd, 0xab, 0x89, 0x98, 0xba, 0xdc, 0xfe, 0x10, 0x32, 0x54, 0x76,
    0xc3, 0xd2, 0xe1, 0xf0,
];

static SHA256_INIT_STATE: [u8; 32] = [
    0x6a, 0x09, 0xe6, 0x67, 0xbb, 0x67, 0xae, 0x85, 0x3c, 0x6e, 0xf3, 0x72, 0xa5, 0x4f, 0xf5, 0x3a,
    0x51, 0x0e, 0x52, 0x7f, 0x9b, 0x05, 0x68, 0x8c, 0x1f, 0x83, 0xd9, 0xab, 0x5b, 0xe0, 0xcd, 0x19,
];

impl HashAlg {
    pub fn from_index(index: u32) -> CeResult<Self> {
        Self::try_from(index).map_err(|_| {
            error!("unknown hash [{}]", index);
            CeError::UnknownAlgorithm
        })
    }

    pub fn info(self) -> &'static HashInfo {
        &HASH_INFO[self as usize]
    }

    pub fn block_len(self) -> usize {
        self.info().block_len
    }

    pub fn hash_len(self) -> usize {
        self.info().hash_len
    }

    /// 标准初始状态 (大端字节序)
    ///
    /// 驱动不会自动使用它，调用者需要显式传入
    pub fn standard_init(self) -> &'static [u8] {
        match self {
            Self::Sha1 => &SHA1_INIT_STATE,
            Self::Sha256 => &SHA256_INIT_STATE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

/// base N 算法表行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseInfo {
    pub ctrl: u32,
    /// 明文分组字节数
    pub data_align: usize,
    /// 编码分组字节数
    pub encoded_align: usize,
}

impl BaseInfo {
    /// 编码输出长度：`ceil(len / data_align) * encoded_align`
    pub const fn encoded_len(&self, len: usize) -> usize {
        len.div_ceil(self.data_align) * self.encoded_align
    }

    /// 解码输出长度：从尾部向前统计填充字符后
    /// `floor(len / encoded_align) * data_align - pad`
    pub fn decoded_len(&self, src: &[u8]) -> CeResult<usize> {
        if src.is_empty() {
            return Ok(0);
        }
        let pad = src.iter().rev().take_while(|&&b| b == BASE64_PAD).count();
        if pad >= self.data_align {
            error!("{} padding bytes in {} bytes input", pad, src.len());
            return Err(CeError::InvalidArgument);
        }
        (src.len() / self.encoded_align * self.data_align)
            .checked_sub(pad)
            .ok_or_else(|| {
                error!("{} padding bytes in {} bytes input", pad, src.len());
                CeError::InvalidArgument
            })
    }
}

/// base N 算法编号，目前只支持 RFC 4648 第 4 节的标准 base64
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum BaseAlg {
    Base64 = 0,
}

pub const BASE_MAX: u32 = 1;

static BASE_INFO: [BaseInfo; BASE_MAX as usize] = [BaseInfo {
    ctrl: 0x0188_2007,
    data_align: 3,
    encoded_align: 4,
}];

impl BaseAlg {
    pub fn from_index(index: u32) -> CeResult<Self> {
        Self::try_from(index).map_err(|_| {
            error!("unknown base N method [{}]", index);
            CeError::UnknownAlgorithm
        })
    }

    pub fn info(self) -> &'static BaseInfo {
        &BASE_INFO[self as usize]
    }

    pub fn name(self) -> &'static str {
        "base64"
    }
}

/// 按原始下标查询 cipher 块长
pub fn cipher_block_len(index: u32) -> CeResult<usize> {
    CipherAlg::from_index(index).map(CipherAlg::block_len)
}

/// 按原始下标查询摘要长度
pub fn hash_len(index: u32) -> CeResult<usize> {
    HashAlg::from_index(index).map(HashAlg::hash_len)
}

/// 按原始下标查询 hash 块长
pub fn hash_block_len(index: u32) -> CeResult<usize> {
    HashAlg::from_index(index).map(HashAlg::block_len)
}

/// base N 操作的输出长度
///
/// 解码时需要读取输入尾部以统计填充字符
pub fn base64_output_len(alg: BaseAlg, dir: Direction, src: &[u8]) -> CeResult<usize> {
    let info = alg.info();
    match dir {
        Direction::Encrypt => Ok(info.encoded_len(src.len())),
        Direction::Decrypt => info.decoded_len(src),
    }
}

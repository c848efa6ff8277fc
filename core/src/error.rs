//! CE 错误类型定义

use core::fmt;

use axerrno::AxError;

/// CE 操作错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeError {
    /// 无效参数 (缺少 hash 初始值、输出缓冲区过短等)
    InvalidArgument,
    /// 算法编号超出表范围
    UnknownAlgorithm,
    /// 长度不是算法块长的整数倍
    BlockLengthMismatch,
    /// 密钥长度与算法不匹配
    InvalidKeyLength,
    /// 未提供密钥且安全密钥 (efuse) 无效
    KeyUnavailable,
    /// scatter-gather DMA 映射失败
    MappingFailure,
    /// 分段边界切开了一个块
    WalkFailure,
    /// 请求队列已满且请求不允许进入 backlog
    QueueFull,
    /// 请求类型既不是 cipher 也不是 hash
    UnsupportedRequestClass,
    /// 无法获取中断线
    IrqUnavailable,
    /// 看门狗超时
    Timeout,
    /// 设备已解绑
    NoDevice,
}

impl CeError {
    /// 获取错误码 (兼容 Linux errno 风格)
    pub fn as_errno(&self) -> i32 {
        match self {
            CeError::InvalidArgument => -22,         // EINVAL
            CeError::UnknownAlgorithm => -22,        // EINVAL
            CeError::BlockLengthMismatch => -22,     // EINVAL
            CeError::InvalidKeyLength => -22,        // EINVAL
            CeError::KeyUnavailable => -126,         // ENOKEY
            CeError::MappingFailure => -12,          // ENOMEM
            CeError::WalkFailure => -22,             // EINVAL
            CeError::QueueFull => -28,               // ENOSPC
            CeError::UnsupportedRequestClass => -95, // EOPNOTSUPP
            CeError::IrqUnavailable => -16,          // EBUSY
            CeError::Timeout => -110,                // ETIMEDOUT
            CeError::NoDevice => -19,                // ENODEV
        }
    }
}

impl fmt::Display for CeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "Invalid argument"),
            Self::UnknownAlgorithm => write!(f, "Unknown algorithm"),
            Self::BlockLengthMismatch => write!(f, "Length not aligned to block length"),
            Self::InvalidKeyLength => write!(f, "Invalid key length"),
            Self::KeyUnavailable => write!(f, "No key given and secure key not valid"),
            Self::MappingFailure => write!(f, "DMA mapping failed"),
            Self::WalkFailure => write!(f, "Scatter list splits a block"),
            Self::QueueFull => write!(f, "Request queue full"),
            Self::UnsupportedRequestClass => write!(f, "Unsupported request class"),
            Self::IrqUnavailable => write!(f, "Interrupt line unavailable"),
            Self::Timeout => write!(f, "Hardware operation timed out"),
            Self::NoDevice => write!(f, "Device removed"),
        }
    }
}

impl From<CeError> for AxError {
    fn from(err: CeError) -> Self {
        match err {
            CeError::InvalidArgument
            | CeError::BlockLengthMismatch
            | CeError::InvalidKeyLength
            | CeError::WalkFailure => AxError::InvalidInput,
            CeError::UnknownAlgorithm | CeError::UnsupportedRequestClass => AxError::Unsupported,
            CeError::KeyUnavailable | CeError::NoDevice => AxError::NotFound,
            CeError::MappingFailure | CeError::QueueFull => AxError::NoMemory,
            CeError::IrqUnavailable => AxError::AlreadyExists,
            CeError::Timeout => AxError::Interrupted,
        }
    }
}

pub type CeResult<T> = Result<T, CeError>;

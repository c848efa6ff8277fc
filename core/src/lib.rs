//! Bitmain Crypto Engine (CE) 硬件层
//!
//! 描述符构建、寄存器协议以及单实例的完成同步。
//! 不包含请求队列，队列调度见 `bce-api`。

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod alg;
pub mod desc;
pub mod engine;
pub mod error;
pub mod regs;

#[cfg(any(test, feature = "dummy"))]
pub mod dummy;

pub use alg::{BaseAlg, CipherAlg, CipherFamily, CipherMode, HashAlg};
pub use desc::{Base64Op, CipherOp, Descriptor, Direction, HashOp, Operand};
pub use engine::{CePlatform, Completion, Engine, EngineSession, IrqHandler};
pub use error::{CeError, CeResult};
pub use regs::{CeRegs, MmioBus, RegisterBus};

/// 请求队列深度
pub const CE_REQUEST_QUEUE_SIZE: usize = 50;

/// PIO 模式下读写 burst 长度
pub const CE_PIO_BURST: u32 = 16;

/// 驱动运行时配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CeConfig {
    /// 请求队列深度，超出部分进入 backlog
    pub queue_len: usize,
    /// 单个描述符的等待上限 (毫秒)，`None` 表示一直等待
    pub watchdog_ms: Option<u64>,
}

impl Default for CeConfig {
    fn default() -> Self {
        Self {
            queue_len: CE_REQUEST_QUEUE_SIZE,
            watchdog_ms: None,
        }
    }
}

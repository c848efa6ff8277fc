//! CE 请求管线
//!
//! 把异步的 cipher / hash 请求排入带 backlog 的队列，由单个工作函数
//! 逐个取出，按 scatter-gather 分段构建描述符并同步等待硬件完成。

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod cipher;
pub mod dma;
pub mod hash;
pub mod inst;
pub mod queue;
pub mod request;

pub use dma::{ChunkWalk, DmaDirection, DmaMapper, DmaSegment, LinearMapper, MappedSg};
pub use inst::{CeInstance, WorkQueue};
pub use queue::{CryptoQueue, Enqueued};
pub use request::{
    AsyncRequest, CipherCtx, CipherRequest, HashRequest, HashState, RequestBody, RequestFlags,
    RequestNotify, ScatterList, Segment,
};

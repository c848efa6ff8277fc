//! 带 backlog 的请求队列
//!
//! 前 `max_qlen` 个请求是正常排队的请求，之后的都是 backlog。
//! 因此只要队列长度超过 `max_qlen`，第一个 backlog 请求总在下标
//! `max_qlen` 处；每次出队都会把它推进到正常区域。

use alloc::collections::VecDeque;

use bce_core::{CeError, CeResult};

use crate::request::{AsyncRequest, RequestFlags};

/// 入队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// 正常排队 (EINPROGRESS)
    InProgress,
    /// 队列已满，进入 backlog (EBUSY)，请求仍会被处理
    Backlogged,
}

impl Enqueued {
    pub fn as_errno(&self) -> i32 {
        match self {
            Enqueued::InProgress => -115, // EINPROGRESS
            Enqueued::Backlogged => -16,  // EBUSY
        }
    }
}

pub struct CryptoQueue {
    list: VecDeque<AsyncRequest>,
    max_qlen: usize,
}

impl CryptoQueue {
    pub fn new(max_qlen: usize) -> Self {
        Self {
            list: VecDeque::new(),
            max_qlen,
        }
    }

    /// 队列满且请求不允许 backlog 时返回 [`CeError::QueueFull`]，请求被丢弃
    pub fn enqueue(&mut self, req: AsyncRequest) -> CeResult<Enqueued> {
        let ret = if self.list.len() >= self.max_qlen {
            if !req.flags.contains(RequestFlags::MAY_BACKLOG) {
                error!(
                    "request queue full ({} queued), alg type {:#x}",
                    self.list.len(),
                    req.alg_type
                );
                return Err(CeError::QueueFull);
            }
            Enqueued::Backlogged
        } else {
            Enqueued::InProgress
        };
        self.list.push_back(req);
        Ok(ret)
    }

    /// 第一个 backlog 请求
    pub fn get_backlog(&self) -> Option<&AsyncRequest> {
        self.list.get(self.max_qlen)
    }

    pub fn dequeue(&mut self) -> Option<AsyncRequest> {
        self.list.pop_front()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn max_qlen(&self) -> usize {
        self.max_qlen
    }
}

//! 异步请求类型

use alloc::{sync::Arc, vec::Vec};

use bce_core::{
    CeError, CeResult, CipherAlg, CipherFamily, CipherMode, Direction, HashAlg,
    alg::{MAX_BLOCK_LEN, MAX_HASH_LEN, MAX_KEY_LEN},
};
use bitflags::bitflags;
use memory_addr::VirtAddr;

/// 算法类型掩码
pub const CRYPTO_ALG_TYPE_MASK: u32 = 0x0000_000f;
/// 异步分组密码
pub const CRYPTO_ALG_TYPE_ABLKCIPHER: u32 = 0x0000_000d;
/// 异步 hash
pub const CRYPTO_ALG_TYPE_AHASH: u32 = 0x0000_000f;

bitflags! {
    /// 请求标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RequestFlags: u32 {
        const MAY_SLEEP = 0x200;
        /// 队列满时允许进入 backlog
        const MAY_BACKLOG = 0x400;
    }
}

/// 一段连续的虚拟内存
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub vaddr: VirtAddr,
    pub len: usize,
}

/// scatter-gather 列表
///
/// 只记录调用者缓冲区的位置，不持有数据
#[derive(Debug, Clone, Default)]
pub struct ScatterList {
    segments: Vec<Segment>,
}

impl ScatterList {
    /// # Safety
    /// 每一段在请求完成回调之前必须保持有效，且不被其他代码访问
    pub unsafe fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// 整个缓冲区作为一段
    ///
    /// # Safety
    /// 同 [`ScatterList::new`]
    pub unsafe fn from_buf(buf: &mut [u8]) -> Self {
        unsafe { Self::split(buf, &[]) }
    }

    /// 按给定长度切分缓冲区，剩余部分作为最后一段
    ///
    /// # Safety
    /// 同 [`ScatterList::new`]
    pub unsafe fn split(buf: &mut [u8], lens: &[usize]) -> Self {
        let base = buf.as_mut_ptr() as usize;
        let mut segments = Vec::with_capacity(lens.len() + 1);
        let mut off = 0;
        for &len in lens {
            let len = len.min(buf.len() - off);
            segments.push(Segment {
                vaddr: VirtAddr::from(base + off),
                len,
            });
            off += len;
        }
        if off < buf.len() {
            segments.push(Segment {
                vaddr: VirtAddr::from(base + off),
                len: buf.len() - off,
            });
        }
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn total_len(&self) -> usize {
        self.segments.iter().map(|s| s.len).sum()
    }
}

/// 分组密码上下文：算法、方向、密钥和当前 IV
#[derive(Debug, Clone)]
pub struct CipherCtx {
    pub alg: CipherAlg,
    pub dir: Direction,
    key: Option<[u8; MAX_KEY_LEN]>,
    iv: [u8; MAX_BLOCK_LEN],
}

impl CipherCtx {
    /// 按密钥长度选择算法
    pub fn new(
        family: CipherFamily,
        mode: CipherMode,
        dir: Direction,
        key: &[u8],
    ) -> CeResult<Self> {
        let alg = CipherAlg::lookup(family, mode, key.len())?;
        let mut buf = [0u8; MAX_KEY_LEN];
        buf[..key.len()].copy_from_slice(key);
        Ok(Self {
            alg,
            dir,
            key: Some(buf),
            iv: [0; MAX_BLOCK_LEN],
        })
    }

    /// 使用 efuse 中的安全密钥
    pub fn with_secure_key(alg: CipherAlg, dir: Direction) -> Self {
        Self {
            alg,
            dir,
            key: None,
            iv: [0; MAX_BLOCK_LEN],
        }
    }

    /// ECB 没有 IV，忽略
    pub fn set_iv(&mut self, iv: &[u8]) -> CeResult<()> {
        if !self.alg.mode().has_iv() {
            return Ok(());
        }
        let block_len = self.alg.block_len();
        if iv.len() < block_len {
            error!(
                "{}: iv length {} shorter than {}",
                self.alg.name(),
                iv.len(),
                block_len
            );
            return Err(CeError::InvalidArgument);
        }
        self.iv[..block_len].copy_from_slice(&iv[..block_len]);
        Ok(())
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv[..self.alg.block_len()]
    }

    pub(crate) fn iv_mut(&mut self) -> &mut [u8] {
        let block_len = self.alg.block_len();
        &mut self.iv[..block_len]
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_ref().map(|k| &k[..self.alg.key_len()])
    }
}

/// 分组密码请求
#[derive(Debug)]
pub struct CipherRequest {
    pub ctx: CipherCtx,
    pub src: ScatterList,
    /// `None` 表示原地操作
    pub dst: Option<ScatterList>,
    pub nbytes: usize,
}

/// 导出的 hash 中间状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashState {
    pub alg: HashAlg,
    pub state: [u8; MAX_HASH_LEN],
    /// 已处理的字节数
    pub count: u64,
}

/// hash 请求
///
/// 驱动不提供默认初始值，调用者必须通过 [`HashRequest::set_init`]
/// 或 [`HashRequest::resume`] 给出
#[derive(Debug)]
pub struct HashRequest {
    pub alg: HashAlg,
    pub(crate) state: Option<[u8; MAX_HASH_LEN]>,
    pub(crate) count: u64,
    pub src: ScatterList,
    pub nbytes: usize,
}

impl HashRequest {
    pub fn new(alg: HashAlg, src: ScatterList, nbytes: usize) -> Self {
        Self {
            alg,
            state: None,
            count: 0,
            src,
            nbytes,
        }
    }

    /// 从导出的状态继续
    pub fn resume(state: &HashState, src: ScatterList, nbytes: usize) -> Self {
        Self {
            alg: state.alg,
            state: Some(state.state),
            count: state.count,
            src,
            nbytes,
        }
    }

    pub fn set_init(&mut self, init: &[u8]) -> CeResult<()> {
        let hash_len = self.alg.hash_len();
        if init.len() < hash_len {
            error!(
                "{}: initial hash value {} bytes, need {}",
                self.alg.name(),
                init.len(),
                hash_len
            );
            return Err(CeError::InvalidArgument);
        }
        let mut state = [0u8; MAX_HASH_LEN];
        state[..hash_len].copy_from_slice(&init[..hash_len]);
        self.state = Some(state);
        self.count = 0;
        Ok(())
    }

    pub fn export(&self) -> Option<HashState> {
        self.state.map(|state| HashState {
            alg: self.alg,
            state,
            count: self.count,
        })
    }

    /// 当前 hash 值，长度为算法摘要长度
    pub fn digest(&self) -> Option<&[u8]> {
        let hash_len = self.alg.hash_len();
        self.state.as_ref().map(|s| &s[..hash_len])
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn has_init(&self) -> bool {
        self.state.is_some()
    }
}

/// 请求内容
#[derive(Debug)]
pub enum RequestBody {
    Cipher(CipherRequest),
    Hash(HashRequest),
}

/// 请求状态通知
pub trait RequestNotify: Send + Sync {
    /// backlog 中的请求被调度时调用，表示 "in progress"，不是错误
    fn backlog(&self) {}

    /// 每个请求恰好调用一次，返回请求内容 (包含更新后的 IV / hash 状态)
    fn complete(&self, body: RequestBody, result: CeResult<()>);
}

impl<F> RequestNotify for F
where
    F: Fn(RequestBody, CeResult<()>) + Send + Sync,
{
    fn complete(&self, body: RequestBody, result: CeResult<()>) {
        self(body, result)
    }
}

/// 异步请求
pub struct AsyncRequest {
    /// crypto 算法类型，低 4 位决定由哪个处理函数接收
    pub alg_type: u32,
    pub flags: RequestFlags,
    pub body: RequestBody,
    notify: Arc<dyn RequestNotify>,
}

impl AsyncRequest {
    pub fn new(
        alg_type: u32,
        flags: RequestFlags,
        body: RequestBody,
        notify: Arc<dyn RequestNotify>,
    ) -> Self {
        Self {
            alg_type,
            flags,
            body,
            notify,
        }
    }

    pub fn cipher(req: CipherRequest, flags: RequestFlags, notify: Arc<dyn RequestNotify>) -> Self {
        Self::new(
            CRYPTO_ALG_TYPE_ABLKCIPHER,
            flags,
            RequestBody::Cipher(req),
            notify,
        )
    }

    pub fn hash(req: HashRequest, flags: RequestFlags, notify: Arc<dyn RequestNotify>) -> Self {
        Self::new(CRYPTO_ALG_TYPE_AHASH, flags, RequestBody::Hash(req), notify)
    }

    pub fn notify(&self) -> &Arc<dyn RequestNotify> {
        &self.notify
    }

    pub(crate) fn into_parts(self) -> (u32, RequestBody, Arc<dyn RequestNotify>) {
        (self.alg_type, self.body, self.notify)
    }

    /// 提交前检查，失败的请求不会进入队列
    pub fn validate(&self, secure_key_valid: bool) -> CeResult<()> {
        match &self.body {
            RequestBody::Cipher(req) => {
                let alg = req.ctx.alg;
                let block_len = alg.block_len();
                if req.nbytes % block_len != 0 {
                    error!(
                        "{}: request length {} not aligned to block length {}",
                        alg.name(),
                        req.nbytes,
                        block_len
                    );
                    return Err(CeError::BlockLengthMismatch);
                }
                if req.ctx.key().is_none() && !secure_key_valid {
                    error!("{}: no key given and secure key not valid", alg.name());
                    return Err(CeError::KeyUnavailable);
                }
                check_sg(alg.name(), "src", &req.src, req.nbytes)?;
                if let Some(dst) = &req.dst {
                    check_sg(alg.name(), "dst", dst, req.nbytes)?;
                }
            }
            RequestBody::Hash(req) => {
                let block_len = req.alg.block_len();
                if req.nbytes % block_len != 0 {
                    error!(
                        "{}: request length {} not aligned to block length {}",
                        req.alg.name(),
                        req.nbytes,
                        block_len
                    );
                    return Err(CeError::BlockLengthMismatch);
                }
                if !req.has_init() {
                    error!("{}: initial hash value must be given", req.alg.name());
                    return Err(CeError::InvalidArgument);
                }
                check_sg(req.alg.name(), "src", &req.src, req.nbytes)?;
            }
        }
        Ok(())
    }
}

fn check_sg(name: &str, which: &str, sg: &ScatterList, nbytes: usize) -> CeResult<()> {
    if sg.total_len() < nbytes {
        error!(
            "{}: {} list holds {} bytes, request needs {}",
            name,
            which,
            sg.total_len(),
            nbytes
        );
        return Err(CeError::InvalidArgument);
    }
    Ok(())
}

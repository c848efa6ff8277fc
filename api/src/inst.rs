//! CE 实例与请求调度
//!
//! 请求在锁内入队；如果没有工作函数在运行，就置 busy 并调度一个。
//! 工作函数每次在锁内取出一个请求，释放锁后处理，直到队列为空时
//! 在锁内清除 busy 退出。因此同一实例任何时刻最多一个请求在访问硬件。

use alloc::{boxed::Box, sync::Arc, vec::Vec};

use bce_core::{Base64Op, CeConfig, CeError, CePlatform, CeResult, Engine, RegisterBus};
use spin::Mutex;

use crate::{
    cipher,
    dma::DmaMapper,
    hash,
    queue::{CryptoQueue, Enqueued},
    request::{
        AsyncRequest, CRYPTO_ALG_TYPE_ABLKCIPHER, CRYPTO_ALG_TYPE_AHASH, CRYPTO_ALG_TYPE_MASK,
        RequestBody,
    },
};

/// 延迟执行的工作
pub trait WorkQueue: Send + Sync {
    fn schedule(&self, work: Box<dyn FnOnce() + Send>);
}

struct QueueState {
    queue: CryptoQueue,
    /// 工作函数是否已调度或正在运行
    busy: bool,
}

/// CE 实例
pub struct CeInstance<B> {
    engine: Arc<Engine<B>>,
    state: Mutex<QueueState>,
    wq: Arc<dyn WorkQueue>,
    dma: Arc<dyn DmaMapper>,
}

impl<B: RegisterBus + 'static> CeInstance<B> {
    /// 绑定设备并创建空队列
    pub fn new(
        bus: B,
        irq: usize,
        platform: Arc<dyn CePlatform>,
        wq: Arc<dyn WorkQueue>,
        dma: Arc<dyn DmaMapper>,
        config: CeConfig,
    ) -> CeResult<Arc<Self>> {
        let engine = Engine::attach(bus, irq, platform, config)?;
        Ok(Arc::new(Self {
            engine,
            state: Mutex::new(QueueState {
                queue: CryptoQueue::new(config.queue_len),
                busy: false,
            }),
            wq,
            dma,
        }))
    }

    /// 提交请求，不阻塞
    ///
    /// 参数错误和队列满在这里同步返回，请求不会进入队列也不会收到回调
    pub fn enqueue(self: &Arc<Self>, req: AsyncRequest) -> CeResult<Enqueued> {
        if self.engine.is_removed() {
            return Err(CeError::NoDevice);
        }
        req.validate(self.engine.is_secure_key_valid())?;
        let (ret, start) = {
            let mut state = self.state.lock();
            let ret = state.queue.enqueue(req)?;
            let start = !state.busy;
            state.busy = true;
            (ret, start)
        };
        if start {
            let this = self.clone();
            self.wq.schedule(Box::new(move || this.run_queue()));
        }
        Ok(ret)
    }

    fn run_queue(&self) {
        loop {
            let (backlog, req) = {
                let mut state = self.state.lock();
                let backlog = state.queue.get_backlog().map(|r| r.notify().clone());
                let req = state.queue.dequeue();
                if req.is_none() {
                    state.busy = false;
                }
                (backlog, req)
            };
            let Some(req) = req else {
                debug!("ce: request queue drained");
                return;
            };
            if let Some(backlog) = backlog {
                backlog.backlog();
            }
            self.dispatch(req);
        }
    }

    fn dispatch(&self, req: AsyncRequest) {
        let (alg_type, body, notify) = req.into_parts();
        let session = match self.engine.session() {
            Ok(session) => session,
            Err(e) => {
                notify.complete(body, Err(e));
                return;
            }
        };
        let (body, result) = match (alg_type & CRYPTO_ALG_TYPE_MASK, body) {
            (CRYPTO_ALG_TYPE_ABLKCIPHER, RequestBody::Cipher(mut req)) => {
                let result = cipher::process(&session, &*self.dma, &mut req);
                (RequestBody::Cipher(req), result)
            }
            (CRYPTO_ALG_TYPE_AHASH, RequestBody::Hash(mut req)) => {
                let result = hash::process(&session, &*self.dma, &mut req);
                (RequestBody::Hash(req), result)
            }
            (_, body) => {
                error!("ce: unsupported request class, alg type {:#x}", alg_type);
                (body, Err(CeError::UnsupportedRequestClass))
            }
        };
        drop(session);
        if let Err(e) = result {
            warn!("ce: request failed: {}", e);
        }
        notify.complete(body, result);
    }
}

impl<B: RegisterBus> CeInstance<B> {
    /// 中断入口
    pub fn handle_irq(&self) -> bool {
        self.engine.handle_irq()
    }

    /// 同步执行一次 base64 编解码
    ///
    /// 与队列中的请求互斥使用硬件，地址必须已经是 DMA 地址
    pub fn base64(&self, op: &Base64Op<'_>) -> CeResult<()> {
        self.engine.run_base64(op)
    }

    /// 解绑设备
    ///
    /// 队列中尚未处理的请求以 [`CeError::NoDevice`] 完成；
    /// 正在处理的请求结束后引擎才停止
    pub fn destroy(&self) {
        let drained: Vec<AsyncRequest> = {
            let mut state = self.state.lock();
            core::iter::from_fn(|| state.queue.dequeue()).collect()
        };
        if !drained.is_empty() {
            warn!("ce: destroying instance with {} queued requests", drained.len());
        }
        self.engine.destroy();
        for req in drained {
            let (_, body, notify) = req.into_parts();
            notify.complete(body, Err(CeError::NoDevice));
        }
    }

    pub fn engine(&self) -> &Arc<Engine<B>> {
        &self.engine
    }

    /// 队列中尚未取出的请求数
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }
}

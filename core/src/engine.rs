//! CE 实例与完成同步
//!
//! 一个 [`Engine`] 对应一个物理加速器。状态机：
//! `Idle -> Triggered -> (中断) -> Idle`。描述符只能通过
//! [`EngineSession`] 提交，会话持有硬件锁直到调用方取回结果，
//! 所以任何时刻最多一个描述符处于 `Triggered`。

use alloc::{boxed::Box, sync::Arc};
use core::sync::atomic::{AtomicBool, Ordering};

use spin::{Mutex, MutexGuard};

use crate::{
    CeConfig,
    alg::{CipherAlg, HashAlg},
    desc::{Base64Op, CipherOp, Descriptor, HashOp},
    error::{CeError, CeResult},
    regs::{CeRegs, RegisterBus},
};

/// 中断处理函数
pub type IrqHandler = Box<dyn Fn() + Send + Sync>;

/// 平台提供的中断与时间服务
pub trait CePlatform: Send + Sync {
    /// 注册中断处理函数
    fn request_irq(&self, irq: usize, handler: IrqHandler) -> CeResult<()>;
    fn enable_irq(&self, irq: usize);
    fn disable_irq(&self, irq: usize);

    /// 等待完成时每轮调用一次
    fn relax(&self) {
        core::hint::spin_loop();
    }

    /// 单调毫秒时钟，`None` 表示平台没有时钟，此时不能配置看门狗
    fn now_ms(&self) -> Option<u64> {
        None
    }
}

/// 完成标志，中断置位，等待方消费后复位
pub struct Completion {
    done: AtomicBool,
}

impl Completion {
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    pub fn complete(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// 已完成则消费并返回 true
    pub fn try_consume(&self) -> bool {
        self.done.swap(false, Ordering::AcqRel)
    }

    pub fn reinit(&self) {
        self.done.store(false, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

/// CE 硬件实例
pub struct Engine<B> {
    regs: CeRegs<B>,
    irq: usize,
    platform: Arc<dyn CePlatform>,
    config: CeConfig,
    completion: Completion,
    /// 从触发到等待返回一直持有
    hw: Mutex<()>,
    triggered: AtomicBool,
    irq_enabled: AtomicBool,
    removed: AtomicBool,
}

impl<B: RegisterBus + 'static> Engine<B> {
    /// 绑定设备：注册中断 (保持关闭直到第一次使用)，然后初始化寄存器
    pub fn attach(
        bus: B,
        irq: usize,
        platform: Arc<dyn CePlatform>,
        config: CeConfig,
    ) -> CeResult<Arc<Self>> {
        if config.watchdog_ms.is_some() && platform.now_ms().is_none() {
            error!("ce: watchdog configured but platform has no clock");
            return Err(CeError::InvalidArgument);
        }
        let engine = Arc::new(Self {
            regs: CeRegs::new(bus),
            irq,
            platform,
            config,
            completion: Completion::new(),
            hw: Mutex::new(()),
            triggered: AtomicBool::new(false),
            irq_enabled: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&engine);
        let handler: IrqHandler = Box::new(move || {
            if let Some(engine) = weak.upgrade() {
                engine.handle_irq();
            }
        });
        engine.platform.request_irq(irq, handler).map_err(|e| {
            error!("ce: request irq {} failed: {}", irq, e);
            CeError::IrqUnavailable
        })?;
        engine.platform.disable_irq(irq);
        engine.regs.init();
        info!("ce: engine attached, irq {}", irq);
        Ok(engine)
    }
}

impl<B: RegisterBus> Engine<B> {
    /// 停止引擎，关闭中断
    ///
    /// 等待正在执行的描述符结束；之后的 [`Engine::session`] 都返回
    /// [`CeError::NoDevice`]
    pub fn destroy(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _hw = self.hw.lock();
        self.regs.destroy();
        if self.irq_enabled.swap(false, Ordering::AcqRel) {
            self.platform.disable_irq(self.irq);
        }
        self.triggered.store(false, Ordering::Release);
        info!("ce: engine destroyed");
    }

    /// 中断处理：只清除原始中断状态并通知完成
    ///
    /// 返回 false 表示不是本设备的中断
    pub fn handle_irq(&self) -> bool {
        let status = self.regs.int_status();
        if status == 0 {
            debug!("ce: spurious interrupt");
            return false;
        }
        self.regs.int_clear();
        self.triggered.store(false, Ordering::Release);
        self.completion.complete();
        true
    }

    /// 独占硬件，阻塞直到上一个会话结束
    pub fn session(&self) -> CeResult<EngineSession<'_, B>> {
        let hw = self.hw.lock();
        if self.removed.load(Ordering::Acquire) {
            warn!("ce: engine already destroyed");
            return Err(CeError::NoDevice);
        }
        Ok(EngineSession {
            engine: self,
            _hw: hw,
        })
    }

    /// 提交一个 base64 描述符并等待完成
    pub fn run_base64(&self, op: &Base64Op<'_>) -> CeResult<()> {
        let session = self.session()?;
        session.submit_base64(op)?;
        session.wait()
    }

    fn reset(&self) {
        self.regs.destroy();
        self.regs.init();
        self.triggered.store(false, Ordering::Release);
        self.completion.reinit();
    }

    /// 写入描述符并启动，第一次使用时打开中断
    fn start(&self, desc: &Descriptor) {
        if !self.irq_enabled.swap(true, Ordering::AcqRel) {
            self.platform.enable_irq(self.irq);
        }
        let was_triggered = self.triggered.swap(true, Ordering::AcqRel);
        debug_assert!(!was_triggered, "descriptor triggered while another is in flight");
        trace!(
            "ce: trigger ctrl {:#010x} alg {:#x} len {}",
            desc.ctrl.bits(),
            desc.alg,
            desc.len
        );
        self.regs.trigger(desc);
    }

    fn wait(&self) -> CeResult<()> {
        let deadline = match (self.config.watchdog_ms, self.platform.now_ms()) {
            (Some(ms), Some(now)) => Some(now.saturating_add(ms)),
            _ => None,
        };
        while !self.completion.try_consume() {
            if let Some(deadline) = deadline {
                if self.platform.now_ms().is_some_and(|now| now >= deadline) {
                    error!(
                        "ce: descriptor not completed in {} ms, resetting engine",
                        self.config.watchdog_ms.unwrap_or_default()
                    );
                    self.reset();
                    return Err(CeError::Timeout);
                }
            }
            self.platform.relax();
        }
        Ok(())
    }

    pub fn query_interrupt_status(&self) -> u32 {
        self.regs.int_status()
    }

    pub fn clear_interrupt(&self) {
        self.regs.int_clear();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.regs.is_busy()
    }

    pub fn is_secure_key_valid(&self) -> bool {
        self.regs.is_secure_key_valid()
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn irq(&self) -> usize {
        self.irq
    }

    pub fn config(&self) -> &CeConfig {
        &self.config
    }

    pub fn regs(&self) -> &CeRegs<B> {
        &self.regs
    }
}

/// 对硬件的独占访问
///
/// 提交之后必须 [`wait`](Self::wait) 再提交下一个；会话释放时硬件锁随之释放。
pub struct EngineSession<'a, B> {
    engine: &'a Engine<B>,
    _hw: MutexGuard<'a, ()>,
}

impl<B: RegisterBus> EngineSession<'_, B> {
    /// 提交一个分组密码描述符，不等待
    pub fn submit_cipher(&self, op: &CipherOp<'_>) -> CeResult<()> {
        let desc = Descriptor::cipher(op, self.engine.is_secure_key_valid())?;
        self.engine.start(&desc);
        Ok(())
    }

    /// 提交一个 hash 描述符，不等待
    pub fn submit_hash(&self, op: &HashOp<'_>) -> CeResult<()> {
        let desc = Descriptor::hash(op)?;
        self.engine.start(&desc);
        Ok(())
    }

    /// 提交一个 base64 描述符，不等待
    pub fn submit_base64(&self, op: &Base64Op<'_>) -> CeResult<()> {
        let desc = Descriptor::base64(op)?;
        self.engine.start(&desc);
        Ok(())
    }

    /// 阻塞直到当前描述符完成，然后复位完成标志
    ///
    /// 配置了看门狗且超时时复位引擎并返回 [`CeError::Timeout`]
    pub fn wait(&self) -> CeResult<()> {
        self.engine.wait()
    }

    pub fn save_iv(&self, alg: CipherAlg, out: &mut [u8]) -> usize {
        self.engine.regs.save_iv(out, alg.block_len())
    }

    pub fn save_hash(&self, alg: HashAlg, out: &mut [u8]) -> usize {
        self.engine.regs.save_hash(out, alg.hash_len())
    }
}

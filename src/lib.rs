//! Bitmain Crypto Engine 平台驱动
//!
//! 设备树匹配、probe / remove，以及对 `bce-core` / `bce-api` 的重新导出。

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

use alloc::sync::Arc;

use axerrno::{AxError, AxResult};

pub use bce_api::*;
pub use bce_core::{
    Base64Op, BaseAlg, CE_REQUEST_QUEUE_SIZE, CeConfig, CeError, CePlatform, CeResult, Engine,
    EngineSession, IrqHandler, MmioBus, RegisterBus,
};

/// 驱动名
pub const DRIVER_NAME: &str = "bce";

/// 设备树 compatible 列表
pub const OF_MATCH: &[&str] = &["bitmain,crypto-engine", "bitmain,spacc", "bitmain,ce"];

/// 平台设备资源
pub struct PlatformDevice<B> {
    pub compatible: &'static str,
    /// 映射好的寄存器块
    pub bus: B,
    pub irq: Option<usize>,
}

pub fn of_match(compatible: &str) -> bool {
    OF_MATCH.contains(&compatible)
}

/// 运行时服务
pub struct Services {
    pub platform: Arc<dyn CePlatform>,
    pub wq: Arc<dyn WorkQueue>,
    pub dma: Arc<dyn DmaMapper>,
}

/// 绑定设备
pub fn probe<B: RegisterBus + 'static>(
    dev: PlatformDevice<B>,
    services: Services,
    config: CeConfig,
) -> AxResult<Arc<CeInstance<B>>> {
    if !of_match(dev.compatible) {
        warn!("{}: no match for {}", DRIVER_NAME, dev.compatible);
        return Err(AxError::NotFound);
    }
    let Some(irq) = dev.irq else {
        error!("{}: no irq resource", DRIVER_NAME);
        return Err(CeError::InvalidArgument.into());
    };
    let inst = CeInstance::new(
        dev.bus,
        irq,
        services.platform,
        services.wq,
        services.dma,
        config,
    )?;
    info!("{}: probe success, irq {}", DRIVER_NAME, irq);
    Ok(inst)
}

/// 解绑设备
pub fn remove<B: RegisterBus>(inst: &CeInstance<B>) {
    inst.destroy();
    info!("{}: removed", DRIVER_NAME);
}

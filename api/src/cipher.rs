//! 分组密码请求处理

use bce_core::{CeResult, CipherOp, EngineSession, RegisterBus};

use crate::{
    dma::{ChunkWalk, DmaDirection, DmaMapper, MappedSg},
    request::CipherRequest,
};

/// 逐块处理一个分组密码请求
///
/// 每块提交一个描述符并等待完成，非 ECB 模式在块之间回读 IV。
/// 映射在返回时 (包括出错) 自动解除。
pub fn process<B: RegisterBus>(
    session: &EngineSession<'_, B>,
    dma: &dyn DmaMapper,
    req: &mut CipherRequest,
) -> CeResult<()> {
    if req.nbytes == 0 {
        return Ok(());
    }
    let alg = req.ctx.alg;

    let (src, dst) = match &req.dst {
        None => (MappedSg::map(dma, &req.src, DmaDirection::Bidirectional)?, None),
        Some(dst) => {
            let src = MappedSg::map(dma, &req.src, DmaDirection::ToDevice)?;
            let dst = MappedSg::map(dma, dst, DmaDirection::FromDevice)?;
            (src, Some(dst))
        }
    };
    let dst_segs = dst.as_ref().unwrap_or(&src).segments();

    let mut offset = 0;
    for chunk in ChunkWalk::new(src.segments(), Some(dst_segs), req.nbytes, alg.block_len()) {
        let chunk = chunk.inspect_err(|e| {
            error!("{}: walk failed at offset {}: {}", alg.name(), offset, e);
        })?;
        debug!(
            "{}: chunk at offset {}, {} bytes",
            alg.name(),
            offset,
            chunk.len
        );
        session.submit_cipher(&CipherOp {
            alg,
            dir: req.ctx.dir,
            src: chunk.src,
            dst: chunk.dst,
            len: chunk.len,
            key: req.ctx.key(),
            iv: Some(req.ctx.iv()),
        })?;
        session.wait()?;
        if alg.mode().has_iv() {
            session.save_iv(alg, req.ctx.iv_mut());
        }
        offset += chunk.len;
    }
    Ok(())
}

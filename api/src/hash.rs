//! hash 请求处理

use bce_core::{CeError, CeResult, EngineSession, HashOp, RegisterBus};

use crate::{
    dma::{ChunkWalk, DmaDirection, DmaMapper, MappedSg},
    request::HashRequest,
};

/// 逐块处理一个 hash 请求，运行状态保存在请求中
pub fn process<B: RegisterBus>(
    session: &EngineSession<'_, B>,
    dma: &dyn DmaMapper,
    req: &mut HashRequest,
) -> CeResult<()> {
    let alg = req.alg;
    let Some(state) = req.state.as_mut() else {
        error!("{}: initial hash value must be given", alg.name());
        return Err(CeError::InvalidArgument);
    };
    if req.nbytes == 0 {
        return Ok(());
    }

    let src = MappedSg::map(dma, &req.src, DmaDirection::ToDevice)?;
    for chunk in ChunkWalk::new(src.segments(), None, req.nbytes, alg.block_len()) {
        let chunk = chunk.inspect_err(|e| {
            error!("{}: walk failed after {} bytes: {}", alg.name(), req.count, e);
        })?;
        debug!("{}: chunk of {} bytes", alg.name(), chunk.len);
        session.submit_hash(&HashOp {
            alg,
            src: chunk.src,
            len: chunk.len,
            init: Some(&state[..]),
        })?;
        session.wait()?;
        session.save_hash(alg, &mut state[..]);
        req.count += chunk.len as u64;
    }
    Ok(())
}

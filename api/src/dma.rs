//! scatter-gather DMA 映射与分块遍历

use alloc::vec::Vec;

use bce_core::{CeError, CeResult};
use memory_addr::PhysAddr;

use crate::request::ScatterList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    ToDevice,
    FromDevice,
    Bidirectional,
}

/// 映射后的一段设备地址
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSegment {
    pub addr: PhysAddr,
    pub len: usize,
}

/// DMA 映射服务
pub trait DmaMapper: Send + Sync {
    fn map_sg(&self, sg: &ScatterList, dir: DmaDirection) -> CeResult<Vec<DmaSegment>>;
    fn unmap_sg(&self, sg: &ScatterList, segs: &[DmaSegment], dir: DmaDirection);
}

/// 线性映射：`paddr = vaddr - offset`
///
/// 对应内核的直接映射区；偏移为 0 时即恒等映射
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearMapper {
    offset: usize,
}

impl LinearMapper {
    pub const fn new(phys_virt_offset: usize) -> Self {
        Self {
            offset: phys_virt_offset,
        }
    }

    pub const fn identity() -> Self {
        Self::new(0)
    }
}

impl DmaMapper for LinearMapper {
    fn map_sg(&self, sg: &ScatterList, _dir: DmaDirection) -> CeResult<Vec<DmaSegment>> {
        sg.segments()
            .iter()
            .map(|seg| {
                let vaddr = seg.vaddr.as_usize();
                let paddr = vaddr.checked_sub(self.offset).ok_or_else(|| {
                    error!("vaddr {:#x} below linear mapping offset {:#x}", vaddr, self.offset);
                    CeError::MappingFailure
                })?;
                Ok(DmaSegment {
                    addr: PhysAddr::from(paddr),
                    len: seg.len,
                })
            })
            .collect()
    }

    fn unmap_sg(&self, _sg: &ScatterList, _segs: &[DmaSegment], _dir: DmaDirection) {}
}

/// 映射守卫，离开作用域时解除映射
pub struct MappedSg<'a> {
    mapper: &'a dyn DmaMapper,
    sg: &'a ScatterList,
    segs: Vec<DmaSegment>,
    dir: DmaDirection,
}

impl<'a> MappedSg<'a> {
    pub fn map(mapper: &'a dyn DmaMapper, sg: &'a ScatterList, dir: DmaDirection) -> CeResult<Self> {
        let segs = mapper.map_sg(sg, dir).map_err(|e| {
            error!(
                "map {} segments ({} bytes, {:?}) failed: {}",
                sg.segments().len(),
                sg.total_len(),
                dir,
                e
            );
            CeError::MappingFailure
        })?;
        Ok(Self {
            mapper,
            sg,
            segs,
            dir,
        })
    }

    pub fn segments(&self) -> &[DmaSegment] {
        &self.segs
    }
}

impl Drop for MappedSg<'_> {
    fn drop(&mut self) {
        self.mapper.unmap_sg(self.sg, &self.segs, self.dir);
    }
}

/// 一次描述符处理的数据块
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub src: PhysAddr,
    pub dst: PhysAddr,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    index: usize,
    offset: usize,
}

impl Cursor {
    /// 跳过已用完的段，返回当前段剩余部分
    fn current(&mut self, segs: &[DmaSegment]) -> Option<(PhysAddr, usize)> {
        while let Some(seg) = segs.get(self.index) {
            if self.offset < seg.len {
                return Some((seg.addr + self.offset, seg.len - self.offset));
            }
            self.index += 1;
            self.offset = 0;
        }
        None
    }

    fn advance(&mut self, len: usize) {
        self.offset += len;
    }
}

/// 按块长对齐的分块遍历
///
/// 每个块不跨越源或目的段的边界，长度截断到块长整数倍。
/// 段边界切开一个块时产生 [`CeError::WalkFailure`] 并结束遍历。
pub struct ChunkWalk<'a> {
    src: &'a [DmaSegment],
    dst: Option<&'a [DmaSegment]>,
    src_pos: Cursor,
    dst_pos: Cursor,
    remaining: usize,
    block_len: usize,
}

impl<'a> ChunkWalk<'a> {
    /// `dst` 为 `None` 时 (hash) 块的目的地址为 0
    pub fn new(
        src: &'a [DmaSegment],
        dst: Option<&'a [DmaSegment]>,
        nbytes: usize,
        block_len: usize,
    ) -> Self {
        Self {
            src,
            dst,
            src_pos: Cursor::default(),
            dst_pos: Cursor::default(),
            remaining: nbytes,
            block_len,
        }
    }

    fn fail(&mut self, what: &str) -> Option<CeResult<Chunk>> {
        error!(
            "{}: {} bytes left, block length {}",
            what, self.remaining, self.block_len
        );
        self.remaining = 0;
        Some(Err(CeError::WalkFailure))
    }
}

impl Iterator for ChunkWalk<'_> {
    type Item = CeResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let Some((src, src_avail)) = self.src_pos.current(self.src) else {
            return self.fail("source list exhausted");
        };
        let (dst, dst_avail) = match self.dst {
            Some(segs) => match self.dst_pos.current(segs) {
                Some(cur) => cur,
                None => return self.fail("destination list exhausted"),
            },
            None => (PhysAddr::from(0), usize::MAX),
        };

        let avail = src_avail.min(dst_avail).min(self.remaining);
        let len = avail - avail % self.block_len;
        if len == 0 {
            return self.fail("segment boundary splits a block");
        }
        self.src_pos.advance(len);
        self.dst_pos.advance(len);
        self.remaining -= len;
        trace!("chunk src {:?} dst {:?} len {}", src, dst, len);
        Some(Ok(Chunk { src, dst, len }))
    }
}

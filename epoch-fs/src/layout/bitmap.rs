use crate::block_cache::BlockCache;
use crate::{BLOCK_BITS, BlockId};

/// 位图区域内块的结构。
///
/// 以`u32`为组，块`n`对应第`n / 32`组的第`n % 32`位，**1表示空闲**。
type BitmapBlock = [u32; BLOCK_BITS / 32];

/// 位图区域，紧跟在超级块之后，每个块占一位
#[derive(Debug)]
pub struct Bitmap {
    /// 位图的起始块
    start_block_id: u32,
    /// 位图占用块数
    blocks: u32,
    /// 位图所指示的总块数
    total_blocks: u32,
}

/// 块在位图中的位置：位图块索引 + 组索引 + 组内索引
struct BitPos(u32);

impl Bitmap {
    #[inline]
    pub fn new(total_blocks: u32) -> Self {
        Self {
            start_block_id: 2,
            blocks: total_blocks.div_ceil(BLOCK_BITS as u32),
            total_blocks,
        }
    }

    /// 位图占用的块数
    #[inline]
    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    /// 保留区（#0、超级块、位图本身）之后的第一个块
    #[inline]
    pub fn reserved_end(&self) -> u32 {
        self.start_block_id + self.blocks
    }

    pub fn is_free(&self, id: BlockId, cache: &BlockCache) -> bool {
        let raw = u32::from(id);
        if raw == 0 || raw >= self.total_blocks {
            return false;
        }

        let (block_index, group_index, ingroup_index) = BitPos(raw).decode();
        cache
            .get(self.block_of(block_index))
            .lock()
            .map(0, |bitmap_block: &BitmapBlock| {
                bitmap_block[group_index] & (1 << ingroup_index) != 0
            })
    }

    /// 从保留区之后开始，分配第一个空闲块。
    /// 被改动的位图块会立即写回磁盘。
    pub fn alloc(&self, cache: &BlockCache) -> Option<BlockId> {
        let first = self.reserved_end();
        let (first_block, first_group, _) = BitPos(first).decode();

        for block_index in first_block..self.blocks as usize {
            let bitmap_block_id = self.block_of(block_index);
            let found = {
                let block = cache.get(bitmap_block_id);
                let mut block = block.lock();

                let skip = if block_index == first_block { first_group } else { 0 };
                let found = block.map(0, |bitmap_block: &BitmapBlock| {
                    bitmap_block
                        .iter()
                        .enumerate()
                        .skip(skip)
                        .find_map(|(group_index, &bits)| {
                            self.first_free_in(block_index, group_index, bits)
                        })
                });

                if let Some((group_index, ingroup_index)) = found {
                    block.map_mut(0, |bitmap_block: &mut BitmapBlock| {
                        bitmap_block[group_index] &= !(1 << ingroup_index)
                    });
                }
                found
            };

            if let Some((group_index, ingroup_index)) = found {
                cache.flush(bitmap_block_id);
                return Some(BlockId::new(BitPos::encode(
                    block_index,
                    group_index,
                    ingroup_index,
                )));
            }
        }

        None
    }

    pub fn dealloc(&self, id: BlockId, cache: &BlockCache) {
        let raw = u32::from(id);
        // 0号块是块号中的空指针
        if raw == 0 {
            panic!("attempt to free zero block");
        }
        assert!(raw < self.total_blocks, "freeing block {raw} outside volume");

        let (block_index, group_index, ingroup_index) = BitPos(raw).decode();
        cache
            .get(self.block_of(block_index))
            .lock()
            .map_mut(0, |bitmap_block: &mut BitmapBlock| {
                // 编号一定得是已分配的
                assert_eq!(bitmap_block[group_index] & (1 << ingroup_index), 0);
                bitmap_block[group_index] |= 1 << ingroup_index;
            });
    }

    /// 格式化：保留区与卷外的位置为占用，其余空闲
    pub fn format(&self, cache: &BlockCache) {
        let reserved_end = self.reserved_end();
        for block_index in 0..self.blocks as usize {
            cache
                .get(self.block_of(block_index))
                .lock()
                .map_mut(0, |bitmap_block: &mut BitmapBlock| {
                    for (group_index, bits) in bitmap_block.iter_mut().enumerate() {
                        *bits = 0;
                        for ingroup_index in 0..32 {
                            let raw = BitPos::encode(block_index, group_index, ingroup_index);
                            if (reserved_end..self.total_blocks).contains(&raw) {
                                *bits |= 1 << ingroup_index;
                            }
                        }
                    }
                });
        }
    }

    /// 检查保留区（#0、超级块、全部位图块）均标记为占用
    pub fn validate(&self, cache: &BlockCache) {
        for raw in 0..self.reserved_end() {
            if self.is_free(BlockId::new(raw), cache) {
                log::error!("reserved block {raw} is marked free");
                panic!("bitmap is corrupt: reserved block {raw} free");
            }
        }
    }
}

impl Bitmap {
    #[inline]
    fn block_of(&self, block_index: usize) -> BlockId {
        BlockId::new(self.start_block_id + block_index as u32)
    }

    /// 组内编号最小、且落在卷内的空闲位
    fn first_free_in(
        &self,
        block_index: usize,
        group_index: usize,
        bits: u32,
    ) -> Option<(usize, usize)> {
        let mut bits = bits;
        while bits != 0 {
            let ingroup_index = bits.trailing_zeros() as usize;
            let raw = BitPos::encode(block_index, group_index, ingroup_index);
            if raw >= self.total_blocks {
                return None;
            }
            if raw >= self.reserved_end() {
                return Some((group_index, ingroup_index));
            }
            bits &= bits - 1;
        }
        None
    }
}

impl BitPos {
    /// 线性映射编码得到块号
    #[inline]
    fn encode(block_index: usize, group_index: usize, ingroup_index: usize) -> u32 {
        (block_index * BLOCK_BITS + group_index * 32 + ingroup_index) as u32
    }

    fn decode(self) -> (usize, usize, usize) {
        let mut raw = self.0 as usize;

        let block_index = raw / BLOCK_BITS;
        raw %= BLOCK_BITS;
        (block_index, raw / 32, raw % 32)
    }
}

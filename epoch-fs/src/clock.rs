use core::sync::atomic::{AtomicU32, Ordering};

/// 逻辑时间，每次创建、恢复或撤销都会推进一格
pub type Timestamp = u32;

/// 全局逻辑时钟。
///
/// 时钟的值同时保存在超级块中，推进时一并写入。
#[derive(Debug)]
pub struct Clock {
    last: AtomicU32,
}

impl Clock {
    pub(crate) const fn new(last: Timestamp) -> Self {
        Self {
            last: AtomicU32::new(last),
        }
    }

    /// 当前纪元
    #[inline]
    pub fn now(&self) -> Timestamp {
        self.last.load(Ordering::Acquire)
    }

    /// 推进一格，返回新的时刻
    pub(crate) fn advance(&self) -> Timestamp {
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }
}

//! Reference block resolution with a small per-hour cache.

use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::HourSlot;
use crate::ledger::{DynamicGlobalProperties, Ledger};

/// Hours of block props kept around: the current one and the one before.
const CACHE_CAPACITY: usize = 2;

/// Fields binding a transaction to a recent block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefBlock {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
}

impl RefBlock {
    /// Low 16 bits of the head block number, and the little-endian u32 at
    /// byte 4 of the head block id (bytes 0..4 are the block number itself).
    pub fn from_head(head_block_number: u32, head_block_id: &str) -> Result<Self, crate::Error> {
        let id = hex::decode(head_block_id)
            .map_err(|e| crate::Error::Rpc(format!("invalid head_block_id hex: {e}")))?;
        let prefix: [u8; 4] = id
            .get(4..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                crate::Error::Rpc(format!("head_block_id too short: {} bytes", id.len()))
            })?;
        Ok(Self {
            ref_block_num: (head_block_number & 0xFFFF) as u16,
            ref_block_prefix: u32::from_le_bytes(prefix),
        })
    }

    pub fn from_props(props: &DynamicGlobalProperties) -> Result<Self, crate::Error> {
        Self::from_head(props.head_block_number, &props.head_block_id)
    }
}

/// Caches one [`RefBlock`] per hour slot, evicting the oldest beyond capacity.
pub struct RefBlockCache {
    entries: Mutex<VecDeque<(HourSlot, RefBlock)>>,
}

impl Default for RefBlockCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RefBlockCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(CACHE_CAPACITY)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<(HourSlot, RefBlock)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cached(&self, slot: HourSlot) -> Option<RefBlock> {
        self.lock()
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, rb)| *rb)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn insert(&self, slot: HourSlot, ref_block: RefBlock) {
        let mut entries = self.lock();
        if entries.iter().any(|(s, _)| *s == slot) {
            return;
        }
        entries.push_back((slot, ref_block));
        while entries.len() > CACHE_CAPACITY {
            entries.pop_front();
        }
    }

    /// Ref block for `slot`. Hits the ledger once per slot; failures propagate.
    pub async fn resolve(
        &self,
        ledger: &dyn Ledger,
        slot: HourSlot,
    ) -> Result<RefBlock, crate::Error> {
        if let Some(rb) = self.cached(slot) {
            return Ok(rb);
        }
        let props = ledger.dynamic_global_properties().await.map_err(|e| {
            warn!(error = %e, "Failed to fetch dynamic global properties");
            e
        })?;
        let ref_block = RefBlock::from_props(&props)?;
        debug!(
            hour = slot.hour_of_day(),
            head = props.head_block_number,
            ref_block_num = ref_block.ref_block_num,
            ref_block_prefix = ref_block.ref_block_prefix,
            "Resolved reference block"
        );
        self.insert(slot, ref_block);
        Ok(ref_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{MemoryLedger, TEST_HEAD_BLOCK_ID};

    #[test]
    fn test_ref_block_num_is_low_16_bits() {
        for n in [0u32, 1, 65_535, 65_536, 65_537, 0x0123_4567, u32::MAX] {
            let rb = RefBlock::from_head(n, TEST_HEAD_BLOCK_ID).unwrap();
            assert_eq!(u32::from(rb.ref_block_num), n % 65_536);
        }
    }

    #[test]
    fn test_ref_block_prefix_reads_bytes_4_to_8_le() {
        let rb = RefBlock::from_head(1, "00000001aabbccdd").unwrap();
        assert_eq!(rb.ref_block_prefix, 0xddccbbaa);
    }

    #[test]
    fn test_ref_block_rejects_short_or_bad_id() {
        assert!(RefBlock::from_head(1, "00000001aabb").is_err());
        assert!(RefBlock::from_head(1, "not hex").is_err());
    }

    #[tokio::test]
    async fn test_resolve_fetches_once_per_hour() {
        let ledger = MemoryLedger::new(&[]);
        let cache = RefBlockCache::new();
        let slot = HourSlot::from_index(1000);

        let a = cache.resolve(&ledger, slot).await.unwrap();
        ledger.set_head(9, "00000009aabbccdd");
        let b = cache.resolve(&ledger, slot).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(ledger.props_calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_refetches_on_new_hour() {
        let ledger = MemoryLedger::new(&[]);
        let cache = RefBlockCache::new();

        let a = cache.resolve(&ledger, HourSlot::from_index(1000)).await.unwrap();
        ledger.set_head(9, "0000000911223344");
        let b = cache.resolve(&ledger, HourSlot::from_index(1001)).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(b.ref_block_num, 9);
        assert_eq!(ledger.props_calls(), 2);
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let ledger = MemoryLedger::new(&[]);
        let cache = RefBlockCache::new();
        for i in 0..10 {
            cache.resolve(&ledger, HourSlot::from_index(i)).await.unwrap();
        }
        assert_eq!(cache.len(), CACHE_CAPACITY);
        assert!(cache.cached(HourSlot::from_index(9)).is_some());
        assert!(cache.cached(HourSlot::from_index(8)).is_some());
        assert!(cache.cached(HourSlot::from_index(0)).is_none());
    }

    #[tokio::test]
    async fn test_resolve_failure_is_not_cached() {
        let ledger = MemoryLedger::new(&[]);
        let cache = RefBlockCache::new();
        ledger.fail_props(true);
        assert!(cache.resolve(&ledger, HourSlot::from_index(5)).await.is_err());
        assert!(cache.is_empty());

        ledger.fail_props(false);
        assert!(cache.resolve(&ledger, HourSlot::from_index(5)).await.is_ok());
        assert_eq!(ledger.props_calls(), 2);
    }
}

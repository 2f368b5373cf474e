use std::fmt;

const COUNT_MASK: u64 = 0xffff;
const SIZE_BITS: u32 = 22;
const SIZE_MASK: u64 = (1 << SIZE_BITS) - 1;
const BLOCK_SHIFT: u32 = 16;
const DELETE_SHIFT: u32 = BLOCK_SHIFT + SIZE_BITS;

/// The most slots a node can ever allocate.
pub const MAX_RECORDS: usize = COUNT_MASK as usize;

bitflags! {
    struct Control: u64 {
        const FROZEN = 1 << 60;
    }
}

/// Node status word.
///
/// ```text
///  63  61  60      59..38        37..16        15..0
/// [ 0 0 | F | delete size | block size | record count ]
/// ```
///
/// * record count: slots ever allocated, including reserved and tombstoned ones.
/// * block size: arena bytes consumed by records.
/// * delete size: arena bytes belonging to tombstoned records.
/// * F: frozen, set once a consolidation or split has claimed the node.
///
/// The two high bits stay clear for the descriptor marks of the `mwcas` crate.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusWord(u64);

impl StatusWord {
    pub fn new(record_count: usize, block_size: usize, delete_size: usize) -> Self {
        debug_assert!(record_count as u64 <= COUNT_MASK);
        debug_assert!(block_size as u64 <= SIZE_MASK && delete_size <= block_size);
        Self(
            record_count as u64
                | (block_size as u64) << BLOCK_SHIFT
                | (delete_size as u64) << DELETE_SHIFT,
        )
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn into_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn record_count(self) -> usize {
        (self.0 & COUNT_MASK) as usize
    }

    #[inline]
    pub fn block_size(self) -> usize {
        ((self.0 >> BLOCK_SHIFT) & SIZE_MASK) as usize
    }

    #[inline]
    pub fn delete_size(self) -> usize {
        ((self.0 >> DELETE_SHIFT) & SIZE_MASK) as usize
    }

    #[inline]
    pub fn is_frozen(self) -> bool {
        Control::from_bits_truncate(self.0).contains(Control::FROZEN)
    }

    /// Accounts one more slot and `len` more arena bytes.
    pub fn reserve(self, len: usize) -> Self {
        debug_assert!(self.record_count() < MAX_RECORDS);
        self.with_sizes(self.record_count() + 1, self.block_size() + len, self.delete_size())
    }

    /// Accounts `len` arena bytes as garbage.
    pub fn delete(self, len: usize) -> Self {
        self.with_sizes(self.record_count(), self.block_size(), self.delete_size() + len)
    }

    pub fn freeze(self) -> Self {
        Self(self.0 | Control::FROZEN.bits())
    }

    pub fn unfreeze(self) -> Self {
        Self(self.0 & !Control::FROZEN.bits())
    }

    fn with_sizes(self, record_count: usize, block_size: usize, delete_size: usize) -> Self {
        let control = self.0 & Control::all().bits();
        Self(Self::new(record_count, block_size, delete_size).0 | control)
    }
}

impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusWord")
            .field("records", &self.record_count())
            .field("block", &self.block_size())
            .field("deleted", &self.delete_size())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_independent() {
        let status = StatusWord::new(3, 96, 32).freeze();
        assert_eq!(status.record_count(), 3);
        assert_eq!(status.block_size(), 96);
        assert_eq!(status.delete_size(), 32);
        assert!(status.is_frozen());

        let status = status.unfreeze().reserve(40).delete(40);
        assert_eq!(
            (status.record_count(), status.block_size(), status.delete_size()),
            (4, 136, 72)
        );
        assert!(!status.is_frozen());
    }

    #[test]
    fn frozen_bit_survives_accounting() {
        let status = StatusWord::default().freeze().reserve(16);
        assert!(status.is_frozen());
        assert_eq!(status.into_raw() >> 62, 0);
    }

    #[test]
    fn extreme_sizes_stay_below_reserved_bits() {
        let max = SIZE_MASK as usize;
        let status = StatusWord::new(MAX_RECORDS, max, max).freeze();
        assert_eq!(status.into_raw() >> 62, 0);
        assert_eq!(status.block_size(), max);
        assert_eq!(status.delete_size(), max);
    }
}

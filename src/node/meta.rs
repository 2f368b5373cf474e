use std::fmt;

const STATE_MASK: u64 = 0b11;
const OFFSET_SHIFT: u32 = 2;
const OFFSET_MASK: u64 = (1 << 22) - 1;
const KEY_LEN_SHIFT: u32 = 24;
const KEY_LEN_MASK: u64 = 0xffff;
const TOTAL_LEN_SHIFT: u32 = 40;
const TOTAL_LEN_MASK: u64 = (1 << 22) - 1;

/// Lifecycle of a slot. Only ever moves forward:
/// `Vacant -> Reserved -> Visible -> Tombstoned`, or `Reserved -> Tombstoned` for a reservation
/// that was abandoned before becoming visible.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Visibility {
    Vacant = 0,
    Reserved = 1,
    Visible = 2,
    Tombstoned = 3,
}

/// Slot metadata word.
///
/// ```text
///  63 62   61..40      39..24    23..2   1..0
/// [ 0 0 | total len | key len | offset | state ]
/// ```
///
/// `offset` is the byte offset of the record inside the node's data block, `total len` the
/// padded number of arena bytes it occupies. The two high bits stay clear for the descriptor
/// marks of the `mwcas` crate.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotMeta(u64);

impl SlotMeta {
    pub const VACANT: SlotMeta = SlotMeta(0);

    pub fn reserved(offset: usize, key_len: usize, total_len: usize) -> Self {
        Self::with_state(Visibility::Reserved, offset, key_len, total_len)
    }

    pub fn visible(offset: usize, key_len: usize, total_len: usize) -> Self {
        Self::with_state(Visibility::Visible, offset, key_len, total_len)
    }

    fn with_state(state: Visibility, offset: usize, key_len: usize, total_len: usize) -> Self {
        debug_assert!(offset as u64 <= OFFSET_MASK);
        debug_assert!(key_len as u64 <= KEY_LEN_MASK);
        debug_assert!(total_len as u64 <= TOTAL_LEN_MASK);
        Self(
            state as u64
                | (offset as u64) << OFFSET_SHIFT
                | (key_len as u64) << KEY_LEN_SHIFT
                | (total_len as u64) << TOTAL_LEN_SHIFT,
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
    pub fn visibility(self) -> Visibility {
        match self.0 & STATE_MASK {
            0 => Visibility::Vacant,
            1 => Visibility::Reserved,
            2 => Visibility::Visible,
            _ => Visibility::Tombstoned,
        }
    }

    #[inline]
    pub fn is_reserved(self) -> bool {
        self.visibility() == Visibility::Reserved
    }

    #[inline]
    pub fn is_visible(self) -> bool {
        self.visibility() == Visibility::Visible
    }

    #[inline]
    pub fn offset(self) -> usize {
        ((self.0 >> OFFSET_SHIFT) & OFFSET_MASK) as usize
    }

    #[inline]
    pub fn key_len(self) -> usize {
        ((self.0 >> KEY_LEN_SHIFT) & KEY_LEN_MASK) as usize
    }

    #[inline]
    pub fn total_len(self) -> usize {
        ((self.0 >> TOTAL_LEN_SHIFT) & TOTAL_LEN_MASK) as usize
    }

    /// Reserved -> visible.
    pub fn finalize(self) -> Self {
        debug_assert!(self.is_reserved());
        Self((self.0 & !STATE_MASK) | Visibility::Visible as u64)
    }

    pub fn tombstone(self) -> Self {
        debug_assert!(matches!(
            self.visibility(),
            Visibility::Reserved | Visibility::Visible
        ));
        Self((self.0 & !STATE_MASK) | Visibility::Tombstoned as u64)
    }
}

impl fmt::Debug for SlotMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotMeta")
            .field("state", &self.visibility())
            .field("offset", &self.offset())
            .field("key_len", &self.key_len())
            .field("total_len", &self.total_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_keeps_location() {
        let meta = SlotMeta::reserved(4072, 3, 16);
        assert!(meta.is_reserved());
        assert!(!meta.is_visible());

        let visible = meta.finalize();
        assert!(visible.is_visible());
        assert_eq!(
            (visible.offset(), visible.key_len(), visible.total_len()),
            (4072, 3, 16)
        );

        let dead = visible.tombstone();
        assert_eq!(dead.visibility(), Visibility::Tombstoned);
        assert!(!dead.is_visible());
        assert_eq!(dead.offset(), 4072);
    }

    #[test]
    fn abandoned_reservation() {
        let dead = SlotMeta::reserved(8, 1, 16).tombstone();
        assert_eq!(dead.visibility(), Visibility::Tombstoned);
        assert_eq!(dead.total_len(), 16);
    }

    #[test]
    fn vacant_is_zero() {
        assert_eq!(SlotMeta::VACANT.into_raw(), 0);
        assert_eq!(SlotMeta::VACANT.visibility(), Visibility::Vacant);
    }

    #[test]
    fn extreme_fields_stay_below_reserved_bits() {
        let max = (1 << 22) - 1;
        let meta = SlotMeta::visible(max, u16::MAX as usize, max).tombstone();
        assert_eq!(meta.into_raw() >> 62, 0);
        assert_eq!(meta.key_len(), u16::MAX as usize);
    }
}

//! Splitting contract storage into scanner work packets.

/// `(offset, limit)` pairs covering `[0, total]` in steps of `per_packet`.
///
/// The bound is inclusive, so a total that is an exact multiple of the
/// packet size still gets a trailing packet and an empty contract gets
/// one. The last packet's limit is not clamped to the remaining items.
///
/// `per_packet` must be non-zero.
pub fn partition(total: u64, per_packet: u64) -> impl Iterator<Item = (u64, u64)> {
    let step = usize::try_from(per_packet.max(1)).unwrap_or(usize::MAX);
    (0..=total).step_by(step).map(move |offset| (offset, per_packet))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_last_packet() {
        let packets: Vec<_> = partition(235, 100).collect();
        assert_eq!(packets, vec![(0, 100), (100, 100), (200, 100)]);
    }

    #[test]
    fn exact_multiple_gets_trailing_packet() {
        let offsets: Vec<u64> = partition(200, 100).map(|(o, _)| o).collect();
        assert_eq!(offsets, vec![0, 100, 200]);
    }

    #[test]
    fn empty_contract_gets_one_packet() {
        assert_eq!(partition(0, 50).collect::<Vec<_>>(), vec![(0, 50)]);
    }

    #[test]
    fn packet_larger_than_contract() {
        assert_eq!(partition(7, 1000).collect::<Vec<_>>(), vec![(0, 1000)]);
    }
}

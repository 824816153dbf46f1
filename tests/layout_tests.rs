//! Integration tests for the region slicing derivation

use shmfabric::{
    config::{MIN_REGION_SIZE, PAGE_SIZE, SLICE_SIZE_CAP},
    normalize_region_size, FabricError, RegionLayout,
};

#[cfg(test)]
mod tests {
    use super::*;

    const POW2_COUNTS: [u32; 7] = [1, 2, 4, 8, 16, 32, 64];

    #[test]
    fn test_geometry_over_all_pow2_counts() {
        for &count in POW2_COUNTS.iter() {
            for &size in [MIN_REGION_SIZE, 1 << 30].iter() {
                let layout = RegionLayout::compute(size, count).unwrap();

                let uncapped = size >> count.trailing_zeros();
                assert_eq!(layout.slice_size(), uncapped.min(SLICE_SIZE_CAP));
                assert_eq!(layout.slice_size() % PAGE_SIZE, 0, "page alignment");
                assert!(layout.slice_size() <= size / count as usize);

                // deterministic: recomputation from the same inputs agrees
                let again = RegionLayout::compute(size, count).unwrap();
                assert_eq!(layout, again);
            }
        }
    }

    #[test]
    fn test_slice_divides_per_client_share() {
        for &count in POW2_COUNTS.iter() {
            let layout = RegionLayout::compute(1 << 30, count).unwrap();
            let share = (1usize << 30) / count as usize;
            assert_eq!(share % layout.slice_size(), 0);
        }
    }

    #[test]
    fn test_non_pow2_counts_fail() {
        for count in [3, 5, 6, 7, 9, 12, 33, 63] {
            let err = RegionLayout::compute(MIN_REGION_SIZE, count).unwrap_err();
            assert!(
                matches!(err, FabricError::InvalidTopology { .. }),
                "count {} must be InvalidTopology",
                count
            );
        }
    }

    #[test]
    fn test_scenario_four_clients_one_megabyte() {
        let layout = RegionLayout::compute(1 << 20, 4).unwrap();
        assert_eq!(layout.slice_size(), 1 << 18);
        for index in 0..4 {
            assert_eq!(layout.slice_offset(index), (index as usize) << 18);
        }
    }

    #[test]
    fn test_peer_rederives_coordinator_geometry() {
        // the protocol transmits only (region_size, client_count); the peer
        // must land on the exact same slice size on its own
        let coordinator = RegionLayout::compute(64 << 20, 8).unwrap();
        let transmitted = (coordinator.total_size() as u64, coordinator.client_count());

        let peer = RegionLayout::compute(transmitted.0 as usize, transmitted.1).unwrap();
        assert_eq!(peer.slice_size(), coordinator.slice_size());
        assert_eq!(peer, coordinator);
    }

    #[test]
    fn test_floor_is_never_silently_undershot() {
        assert_eq!(normalize_region_size(4096), MIN_REGION_SIZE);
        assert_eq!(normalize_region_size(MIN_REGION_SIZE - 4096), MIN_REGION_SIZE);
        assert_eq!(normalize_region_size(MIN_REGION_SIZE), MIN_REGION_SIZE);
        assert_eq!(normalize_region_size(1 << 30), 1 << 30);
    }

    #[test]
    fn test_unaligned_geometry_fails() {
        let err = RegionLayout::compute(MIN_REGION_SIZE + 123, 4).unwrap_err();
        assert!(matches!(err, FabricError::InvalidTopology { .. }));
    }
}

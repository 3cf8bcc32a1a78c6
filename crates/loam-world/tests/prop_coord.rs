use loam_world::ChunkCoord;
use proptest::prelude::*;

fn arb_coord() -> impl Strategy<Value = ChunkCoord> {
    (-4096i32..4096, -64i32..64, -4096i32..4096)
        .prop_map(|(cx, cy, cz)| ChunkCoord::new(cx, cy, cz))
}

fn small_delta() -> impl Strategy<Value = (i32, i32, i32)> {
    (-8i32..=8, -8i32..=8, -8i32..=8)
}

proptest! {
    // Distinct coords inside the 21-bit window get distinct z-order keys
    #[test]
    fn morton_injective_in_window(a in arb_coord(), b in arb_coord()) {
        if a != b {
            prop_assert_ne!(a.morton_key(), b.morton_key());
        }
    }

    // Offsetting twice equals offsetting by the component sums
    #[test]
    fn offset_is_additive(c in arb_coord(), d1 in small_delta(), d2 in small_delta()) {
        let step = c.offset(d1.0, d1.1, d1.2).offset(d2.0, d2.1, d2.2);
        let direct = c.offset(d1.0 + d2.0, d1.1 + d2.1, d1.2 + d2.2);
        prop_assert_eq!(step, direct);
    }

    // distance_sq is symmetric and zero exactly on equal coords
    #[test]
    fn distance_symmetric(a in arb_coord(), b in arb_coord()) {
        prop_assert_eq!(a.distance_sq(b), b.distance_sq(a));
        prop_assert_eq!(a.distance_sq(b) == 0, a == b);
    }

    // with_y never touches the horizontal components
    #[test]
    fn with_y_preserves_columns(c in arb_coord(), y in -64i32..64) {
        let moved = c.with_y(y);
        prop_assert_eq!(moved.cx, c.cx);
        prop_assert_eq!(moved.cz, c.cz);
        prop_assert_eq!(moved.cy, y);
    }

    // Every face neighbor round-trips back through the opposite offset
    #[test]
    fn face_neighbors_invert(c in arb_coord()) {
        for (i, (dx, dy, dz)) in loam_world::FACE_OFFSETS.iter().enumerate() {
            let n = c.face_neighbors()[i];
            prop_assert_eq!(n.offset(-dx, -dy, -dz), c);
        }
    }
}

//! Unit conversion and stage bookkeeping properties.

use proptest::prelude::*;
use scope_control::NavigationController;
use scope_core::config::StageConfig;
use scope_core::types::Axis;
use scope_core::EventBus;
use scope_driver_mock::MockMicrocontroller;
use std::sync::Arc;

fn navigation() -> (Arc<MockMicrocontroller>, NavigationController) {
    let mcu = Arc::new(MockMicrocontroller::new());
    let nav = NavigationController::new(mcu.clone(), StageConfig::default(), EventBus::new());
    (mcu, nav)
}

fn linear_axis() -> impl Strategy<Value = Axis> {
    prop_oneof![Just(Axis::X), Just(Axis::Y), Just(Axis::Z)]
}

proptest! {
    #[test]
    fn conversion_is_within_half_a_microstep(axis in linear_axis(), mm in -60.0f64..60.0) {
        let (_, nav) = navigation();
        let back = nav.usteps_to_mm(axis, nav.mm_to_usteps(axis, mm));
        prop_assert!((back - mm).abs() <= nav.mm_per_ustep(axis) / 2.0 + 1e-12);
    }

    #[test]
    fn relative_moves_accumulate(
        axis in linear_axis(),
        moves in prop::collection::vec(-5.0f64..5.0, 1..8),
    ) {
        let (_, nav) = navigation();
        let expected_usteps: i64 = moves.iter().map(|mm| nav.mm_to_usteps(axis, *mm)).sum();
        tokio_test::block_on(async {
            for mm in &moves {
                nav.move_relative(axis, *mm).await.unwrap();
            }
            nav.refresh_position().await.unwrap();
        });
        prop_assert_eq!(nav.usteps(axis), expected_usteps);
        let total: f64 = moves.iter().sum();
        // every move rounds by at most half a microstep
        let tolerance = nav.mm_per_ustep(axis) * moves.len() as f64 / 2.0 + 1e-9;
        let position = nav.position();
        let reported = match axis {
            Axis::X => position.x_mm,
            Axis::Y => position.y_mm,
            _ => position.z_mm,
        };
        prop_assert!((reported - total).abs() <= tolerance);
    }

    #[test]
    fn absolute_moves_land_on_the_rounded_target(mm in -20.0f64..20.0) {
        let (mcu, nav) = navigation();
        tokio_test::block_on(async {
            nav.move_relative(Axis::Z, 1.0).await.unwrap();
            nav.move_absolute(Axis::Z, mm).await.unwrap();
            nav.refresh_position().await.unwrap();
        });
        prop_assert_eq!(nav.z_usteps(), nav.mm_to_usteps(Axis::Z, mm));
        // Z runs inverted on the device
        prop_assert_eq!(mcu.probe().raw().z, -nav.mm_to_usteps(Axis::Z, mm));
    }
}

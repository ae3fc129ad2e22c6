//! Contrast autofocus against a simulated focus target.

mod common;

use common::Rig;
use scope_control::autofocus::run_contrast_autofocus;
use scope_control::{AutofocusController, AutofocusParams, FocusMap};
use scope_core::config::{AutofocusConfig, ScopeConfig};
use scope_core::types::{Axis, TriggerMode};
use scope_core::{Owner, ScopeError};
use scope_driver_mock::{FocusTarget, MockCamera};
use std::sync::Arc;

fn focus_rig(focus_z_mm: f64) -> Rig {
    Rig::new(ScopeConfig::default(), |mcu, z_mm_per_count| {
        let scene = FocusTarget::new(mcu.probe(), z_mm_per_count, focus_z_mm);
        Arc::new(MockCamera::builder(64, 64).scene(Arc::new(scene)).build())
    })
}

/// Z where a pass with best plane `best` must end, stage-direction microsteps.
fn expected_final_usteps(rig: &Rig, params: &AutofocusParams, best: usize) -> i64 {
    let dz = rig.navigation.mm_to_usteps(Axis::Z, params.delta_z_um / 1000.0);
    let offset = dz * i64::from(params.n_planes / 2);
    -offset + (best as i64 + 1) * dz
}

#[tokio::test]
async fn backlash_and_scan_moves_cancel() {
    for focus_um in [-4.0, 0.0, 3.0] {
        let rig = focus_rig(focus_um / 1000.0);
        let params =
            AutofocusParams::from_config(&AutofocusConfig::default(), TriggerMode::Software);

        let outcome = run_contrast_autofocus(&rig.devices(), &params)
            .await
            .unwrap();

        rig.navigation.refresh_position().await.unwrap();
        assert_eq!(
            rig.navigation.z_usteps(),
            expected_final_usteps(&rig, &params, outcome.best_index),
            "focus at {focus_um} um"
        );
        let z_um = rig.navigation.position().z_um();
        assert!(
            (z_um - focus_um).abs() <= params.delta_z_um / 2.0 + 0.05,
            "landed at {z_um} um for focus at {focus_um} um"
        );
    }
}

#[tokio::test]
async fn scan_stops_once_contrast_falls() {
    let rig = focus_rig(0.003);
    let params = AutofocusParams::from_config(&AutofocusConfig::default(), TriggerMode::Software);

    let outcome = run_contrast_autofocus(&rig.devices(), &params)
        .await
        .unwrap();

    assert_eq!(outcome.best_index, 6);
    assert!(!outcome.at_range_edge);
    // one plane past the peak is enough to stop
    assert_eq!(outcome.series.len(), 8);
    rig.navigation.refresh_position().await.unwrap();
    assert_eq!(rig.navigation.z_usteps(), 520);
}

#[tokio::test]
async fn controller_refuses_while_another_operation_owns_the_stage() {
    let rig = focus_rig(0.0);
    let controller = AutofocusController::new(
        rig.devices(),
        rig.arbiter.clone(),
        AutofocusConfig::default(),
    );
    let _slide = rig.arbiter.try_acquire(Owner::SlidePositioning).unwrap();

    match controller.autofocus().await {
        Err(ScopeError::ResourceBusy { requested, held_by }) => {
            assert_eq!(requested, Owner::Autofocus);
            assert_eq!(held_by, Owner::SlidePositioning);
        }
        other => panic!("expected ResourceBusy, got {other:?}"),
    }
    assert!(rig.mcu.commands().is_empty());
}

#[tokio::test]
async fn controller_pauses_and_restores_live_view() {
    let rig = focus_rig(0.0);
    let controller = AutofocusController::new(
        rig.devices(),
        rig.arbiter.clone(),
        AutofocusConfig::default(),
    );
    rig.live.start_live().await.unwrap();
    assert_eq!(rig.arbiter.holder(), Some(Owner::Live));

    let outcome = controller.autofocus().await.unwrap();

    assert!(!outcome.from_focus_map);
    assert!(rig.live.is_live());
    assert_eq!(rig.arbiter.holder(), Some(Owner::Live));
    assert!(rig.camera.callback_enabled());
    rig.live.stop_live().await.unwrap();
}

#[tokio::test]
async fn focus_map_replaces_the_scan() {
    let rig = focus_rig(0.0);
    let controller = AutofocusController::new(
        rig.devices(),
        rig.arbiter.clone(),
        AutofocusConfig::default(),
    );
    assert!(controller.set_use_focus_map(true).is_err());

    let map =
        FocusMap::from_points([(0.0, 0.0, 0.010), (10.0, 0.0, 0.020), (0.0, 10.0, 0.010)]).unwrap();
    controller.set_focus_map(map);
    controller.set_use_focus_map(true).unwrap();

    rig.navigation.move_to(5.0, 2.0).await.unwrap();
    rig.navigation.wait_till_idle().await.unwrap();
    let outcome = controller.autofocus().await.unwrap();

    assert!(outcome.from_focus_map);
    assert!(outcome.series.is_empty());
    let z_mm = rig.navigation.position().z_mm;
    assert!((z_mm - 0.015).abs() < 1e-5, "z = {z_mm}");
}

#[tokio::test]
async fn generated_focus_map_follows_a_flat_sample() {
    let rig = focus_rig(0.003);
    let controller = AutofocusController::new(
        rig.devices(),
        rig.arbiter.clone(),
        AutofocusConfig::default(),
    );

    let map = controller
        .generate_focus_map([(0.0, 0.0), (2.0, 0.0), (0.0, 2.0)])
        .await
        .unwrap();

    assert_eq!(controller.focus_map(), Some(map));
    for (x, y) in [(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)] {
        let z_mm = map.z_at(x, y);
        assert!((z_mm - 0.003).abs() < 0.0008, "z({x}, {y}) = {z_mm}");
    }
    assert!(rig.arbiter.is_free());
}

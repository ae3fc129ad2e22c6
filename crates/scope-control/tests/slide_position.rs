mod common;

use common::Rig;
use scope_control::SlidePositionController;
use scope_core::config::{ScopeConfig, SlideConfig};
use scope_core::events::ScopeEvent;
use scope_core::types::{Axis, HomeTarget, SlidePosition};
use scope_core::{Owner, ScopeError};
use scope_driver_mock::{MockCamera, MotionCommand};
use std::sync::Arc;
use std::time::Duration;

fn slide_rig(slide: SlideConfig) -> (Rig, Arc<SlidePositionController>) {
    let config = ScopeConfig {
        slide,
        ..ScopeConfig::default()
    };
    let rig = Rig::new(config, |_, _| Arc::new(MockCamera::new(32, 32)));
    let controller = Arc::new(SlidePositionController::new(
        Arc::clone(&rig.navigation),
        rig.live.clone(),
        rig.arbiter.clone(),
        rig.events.clone(),
        rig.config.slide.clone(),
    ));
    (rig, controller)
}

fn is_move(command: &MotionCommand, axis: Axis) -> bool {
    matches!(
        command,
        MotionCommand::MoveAbsolute { axis: a, .. } | MotionCommand::MoveRelative { axis: a, .. }
            if *a == axis
    )
}

#[tokio::test]
async fn first_loading_homes_then_moves() {
    let (rig, slide) = slide_rig(SlideConfig::default());
    let mut events = rig.events.subscribe();

    slide.move_to_loading().await.unwrap().unwrap();

    let commands = rig.mcu.commands();
    assert_eq!(commands[0], MotionCommand::Home(HomeTarget::Xy));
    assert_eq!(commands[1], MotionCommand::Zero(Axis::X));
    assert_eq!(commands[2], MotionCommand::Zero(Axis::Y));
    assert!(is_move(&commands[3], Axis::X));
    assert!(is_move(&commands[4], Axis::Y));
    assert_eq!(commands.len(), 5);

    assert_eq!(slide.slide_position(), SlidePosition::Loading);
    assert!(slide.is_homed());
    assert!(rig.arbiter.is_free());
    let position = rig.navigation.position();
    assert!((position.x_mm - 30.0).abs() < 1e-3);
    assert!((position.y_mm - 55.0).abs() < 1e-3);

    let mut changed = None;
    while let Ok(event) = events.try_recv() {
        if let ScopeEvent::SlidePositionChanged(p) = event {
            changed = Some(p);
        }
    }
    assert_eq!(changed, Some(SlidePosition::Loading));
}

#[tokio::test]
async fn homed_stage_moves_y_before_x() {
    let (rig, slide) = slide_rig(SlideConfig::default());
    slide.move_to_loading().await.unwrap().unwrap();
    rig.mcu.clear_commands();

    slide.move_to_scanning().await.unwrap().unwrap();

    let commands = rig.mcu.commands();
    assert_eq!(commands.len(), 2);
    assert!(is_move(&commands[0], Axis::Y));
    assert!(is_move(&commands[1], Axis::X));
    assert_eq!(slide.slide_position(), SlidePosition::Scanning);
}

#[tokio::test]
async fn separate_homing_moves_each_axis_after_its_home() {
    let (rig, slide) = slide_rig(SlideConfig {
        home_x_and_y_separately: true,
        ..SlideConfig::default()
    });

    slide.transition(SlidePosition::Loading).await.unwrap();

    let commands = rig.mcu.commands();
    assert_eq!(commands[0], MotionCommand::Home(HomeTarget::X));
    assert_eq!(commands[1], MotionCommand::Zero(Axis::X));
    assert!(is_move(&commands[2], Axis::X));
    assert_eq!(commands[3], MotionCommand::Home(HomeTarget::Y));
    assert_eq!(commands[4], MotionCommand::Zero(Axis::Y));
    assert!(is_move(&commands[5], Axis::Y));
}

#[tokio::test]
async fn retracted_objective_returns_from_below() {
    let (rig, slide) = slide_rig(SlideConfig {
        retract_objective_before_moving: true,
        ..SlideConfig::default()
    });
    rig.navigation.move_absolute(Axis::Z, 1.5).await.unwrap();
    rig.navigation.wait_till_idle().await.unwrap();
    let working_z = rig.navigation.z_usteps();

    slide.transition(SlidePosition::Loading).await.unwrap();
    assert!(slide.objective_retracted());
    assert!((rig.navigation.position().z_mm - 0.1).abs() < 1e-4);

    rig.mcu.clear_commands();
    slide.transition(SlidePosition::Scanning).await.unwrap();

    assert!(!slide.objective_retracted());
    assert_eq!(rig.navigation.z_usteps(), working_z);
    let backlash = rig.navigation.config().z_backlash_usteps();
    let z_commands = rig.mcu.commands_for(Axis::Z);
    let sign = i64::from(rig.config.stage.z.movement_sign);
    assert_eq!(
        z_commands,
        vec![
            MotionCommand::MoveAbsolute {
                axis: Axis::Z,
                usteps: (working_z - backlash) * sign
            },
            MotionCommand::MoveRelative {
                axis: Axis::Z,
                usteps: backlash * sign
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stalled_stage_times_out_and_is_stopped() {
    let (rig, slide) = slide_rig(SlideConfig {
        switching_timeout_s: 2.0,
        ..SlideConfig::default()
    });
    rig.mcu.stall();

    let err = slide
        .transition(SlidePosition::Loading)
        .await
        .unwrap_err();

    match &err {
        ScopeError::HardwareTimeout { operation, elapsed } => {
            assert_eq!(operation, "slide loading");
            assert!(*elapsed >= Duration::from_secs(2));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(err.is_fatal());
    assert_eq!(slide.slide_position(), SlidePosition::Unknown);
    assert!(!slide.is_homed());
    assert!(rig.arbiter.is_free());

    let commands = rig.mcu.commands();
    let tail = &commands[commands.len() - 2..];
    assert_eq!(
        tail,
        &[
            MotionCommand::MoveRelative {
                axis: Axis::X,
                usteps: 0
            },
            MotionCommand::MoveRelative {
                axis: Axis::Y,
                usteps: 0
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn timeout_leaves_live_view_stopped() {
    let (rig, slide) = slide_rig(SlideConfig {
        switching_timeout_s: 1.0,
        ..SlideConfig::default()
    });
    rig.live.start_live().await.unwrap();
    rig.mcu.stall();

    assert!(slide.transition(SlidePosition::Scanning).await.is_err());
    assert!(!rig.live.is_live());
}

#[tokio::test]
async fn live_view_resumes_after_a_transition() {
    let (rig, slide) = slide_rig(SlideConfig::default());
    rig.live.start_live().await.unwrap();

    slide.transition(SlidePosition::Scanning).await.unwrap();

    assert!(rig.live.is_live());
    assert_eq!(rig.arbiter.holder(), Some(Owner::Live));
    rig.live.stop_live().await.unwrap();
}

#[tokio::test]
async fn busy_resources_are_refused() {
    let (rig, slide) = slide_rig(SlideConfig::default());
    let _af = rig.arbiter.try_acquire(Owner::Autofocus).unwrap();

    let err = slide.transition(SlidePosition::Loading).await.unwrap_err();

    assert!(matches!(
        err,
        ScopeError::ResourceBusy {
            requested: Owner::SlidePositioning,
            held_by: Owner::Autofocus
        }
    ));
    assert!(rig.mcu.commands().is_empty());
}

#[tokio::test]
async fn unknown_target_is_a_configuration_error() {
    let (rig, slide) = slide_rig(SlideConfig::default());
    assert!(matches!(
        slide.transition(SlidePosition::Unknown).await,
        Err(ScopeError::Configuration(_))
    ));
    assert!(rig.mcu.commands().is_empty());
}

#[tokio::test]
async fn awaited_transitions_round_trip() {
    let (rig, slide) = slide_rig(SlideConfig::default());
    slide.move_to_loading_position().await.unwrap();
    assert_eq!(slide.slide_position(), SlidePosition::Loading);
    slide.move_to_scanning_position().await.unwrap();
    assert_eq!(slide.slide_position(), SlidePosition::Scanning);
    assert!(rig.arbiter.is_free());
}

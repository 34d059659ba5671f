//! Scripted-detection scenarios run through a full guiding session

use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use multistar::{
    test_util::{detection, ScriptedFinder, SkyHandle},
    AdmissionEventKind, AdmissionState, AdmissionTransition, FrameOutcome, FrameResult,
    GuideEvent, GuidingSession, MultiStarConfig, PixelPoint, SessionError,
    SimpleFrameController, StarMeasurement, StrategyKind,
};
use ndarray::Array2;
use shared_wasm::{AdmissionStateKind, FrameOutcomeKind, Timestamp};

type Session = GuidingSession<ScriptedFinder, SimpleFrameController>;

const LOCK: PixelPoint = PixelPoint { x: 100.0, y: 100.0 };

/// (x, y, snr) of the three pool stars at rest
const FIELD: [(f64, f64, f64); 3] = [(100.0, 100.0, 20.0), (150.0, 100.0, 15.0), (100.0, 150.0, 10.0)];

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn session_with(config: MultiStarConfig) -> (Session, SkyHandle) {
    init_logger();
    let finder = ScriptedFinder::new();
    let sky = finder.handle();
    let controller = SimpleFrameController::guiding_at(LOCK);
    let mut session = GuidingSession::new(config, finder, controller).unwrap();
    let pool: Vec<PixelPoint> = FIELD.iter().map(|&(x, y, _)| PixelPoint::new(x, y)).collect();
    session.select_stars(&pool).unwrap();
    (session, sky)
}

/// The field shifted by (dx, dy) with only the stars in `present` visible.
fn field(dx: f64, dy: f64, present: &[usize]) -> Vec<StarMeasurement> {
    present
        .iter()
        .map(|&i| {
            let (x, y, snr) = FIELD[i];
            detection(x + dx, y + dy, snr, 1000.0)
        })
        .collect()
}

fn step(session: &mut Session, sky: &SkyHandle, stars: Vec<StarMeasurement>, t_ms: u64) -> FrameResult {
    let frame = Array2::<u16>::zeros((8, 8));
    sky.set(stars);
    session.process_frame(frame.view(), Timestamp::from_millis(t_ms))
}

/// Small alternating residual so the error statistics are non-zero.
fn jitter(k: u64) -> f64 {
    if k % 2 == 0 {
        0.2
    } else {
        -0.2
    }
}

fn record_transitions(session: &mut Session) -> Arc<Mutex<Vec<AdmissionTransition>>> {
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = transitions.clone();
    session.register_callback(move |event| {
        if let GuideEvent::Admission(t) = event {
            sink.lock().unwrap().push(*t);
        }
    });
    transitions
}

#[test]
fn test_weighted_solution_from_two_of_three_stars() {
    let (mut session, sky) = session_with(MultiStarConfig::default());
    step(&mut session, &sky, field(0.0, 0.0, &[0, 1]), 500);
    let stars = vec![
        detection(102.0, 100.0, 20.0, 1000.0),
        detection(150.0, 102.0, 10.0, 1000.0),
    ];
    let result = step(&mut session, &sky, stars, 1000);

    assert_eq!(result.outcome, FrameOutcome::Nominal);
    let solution = result.solution.unwrap();
    assert_relative_eq!(solution.x, 101.333, epsilon = 1e-3);
    assert_relative_eq!(solution.y, 100.667, epsilon = 1e-3);

    let offset = result.offset.unwrap();
    assert_relative_eq!(offset.camera.x, 4.0 / 3.0, epsilon = 1e-9);
    assert_relative_eq!(offset.camera.y, 2.0 / 3.0, epsilon = 1e-9);
    assert_eq!(result.star_count.to_string(), "2/2");
    assert_eq!(result.error_info.status, "m=1000 SNR=20.0");
}

#[test]
fn test_reacquired_star_rejoins_without_discontinuity() {
    let (mut session, sky) = session_with(MultiStarConfig::default());
    let reacquired = Arc::new(Mutex::new(Vec::new()));
    let sink = reacquired.clone();
    session.register_callback(move |event| {
        if let GuideEvent::Reacquired { index, .. } = event {
            sink.lock().unwrap().push(*index);
        }
    });

    step(&mut session, &sky, field(0.0, 0.0, &[0, 1, 2]), 1000);
    for k in 2..=4 {
        let result = step(&mut session, &sky, field(0.0, 0.0, &[0, 1]), k * 1000);
        assert_eq!(result.star_count.used, 2);
    }

    // Star 2 comes back a full pixel away from where it was referenced.
    let mut returned = field(0.0, 0.0, &[0, 1, 2]);
    returned[2].position.x += 1.0;

    let mut previous = session.strategy().current_position().unwrap();
    for k in 5..=8 {
        let result = step(&mut session, &sky, returned.clone(), k * 1000);
        let expected_used = if k < 7 { 2 } else { 3 };
        assert_eq!(result.star_count.used, expected_used, "frame {k}");

        let solution = result.solution.unwrap();
        assert_relative_eq!(solution.x, previous.x, epsilon = 1e-12);
        assert_relative_eq!(solution.y, previous.y, epsilon = 1e-12);
        previous = solution;
    }

    assert_eq!(*reacquired.lock().unwrap(), vec![2]);
    assert_eq!(session.strategy().star_count().max, 3);
}

#[test]
fn test_total_loss_activates_forced_tolerance_once() {
    let (mut session, sky) = session_with(MultiStarConfig::default());
    let transitions = record_transitions(&mut session);

    for k in 1..=12 {
        let result = step(&mut session, &sky, field(jitter(k), 0.0, &[0, 1, 2]), k * 1000);
        assert_eq!(result.outcome, FrameOutcome::Nominal);
    }
    assert_eq!(session.controller().error_frame_count, 12);

    for k in 13..=14 {
        let result = step(&mut session, &sky, Vec::new(), k * 1000);
        assert_eq!(result.outcome, FrameOutcome::AllPointsLost);
        assert!(result.solution.is_none());
        assert_eq!(session.checker().state(), AdmissionState::Waiting);
    }
    assert_eq!(session.checker().forced_tolerance(), Some(2.0));

    // Every star was lost, so each sits out the reacquisition debounce.
    for k in 15..=16 {
        let result = step(&mut session, &sky, field(jitter(k), 0.0, &[0, 1, 2]), k * 1000);
        assert_eq!(result.outcome, FrameOutcome::NoEligibleContributors);
        assert_eq!(result.error_info.status, "Recovering");
    }

    let result = step(&mut session, &sky, field(jitter(17), 0.0, &[0, 1, 2]), 17_000);
    assert_eq!(result.outcome, FrameOutcome::Nominal);
    assert_eq!(result.star_count.used, 3);
    // Measured against the references held through the loss
    assert_relative_eq!(result.solution.unwrap().x, 99.8, epsilon = 1e-9);
    assert_eq!(session.checker().state(), AdmissionState::Guiding);
    assert_eq!(session.checker().forced_tolerance(), None);

    let transitions = transitions.lock().unwrap();
    let activations = transitions
        .iter()
        .filter(|t| t.event == AdmissionEventKind::Activate)
        .count();
    assert_eq!(activations, 1);
    assert_eq!(transitions[0].tolerance, Some(2.0));
    assert_eq!(
        transitions.last().map(|t| t.event),
        Some(AdmissionEventKind::Deactivate)
    );
}

#[test]
fn test_drift_during_total_loss_is_kept() {
    let (mut session, sky) = session_with(MultiStarConfig::default());
    step(&mut session, &sky, field(0.0, 0.0, &[0, 1, 2]), 1000);
    let lost = step(&mut session, &sky, Vec::new(), 2000);
    assert_eq!(lost.outcome, FrameOutcome::AllPointsLost);

    // The whole field moved 5 px while nothing was visible.
    for k in 3..=4 {
        let result = step(&mut session, &sky, field(5.0, 0.0, &[0, 1, 2]), k * 1000);
        assert_eq!(result.outcome, FrameOutcome::NoEligibleContributors);
    }
    for k in 5..=6 {
        let result = step(&mut session, &sky, field(5.0, 0.0, &[0, 1, 2]), k * 1000);
        assert_eq!(result.outcome, FrameOutcome::Nominal, "frame {k}");
        assert_eq!(result.star_count.used, 3);
        let solution = result.solution.unwrap();
        assert_relative_eq!(solution.x, 105.0, epsilon = 1e-9);
        assert_relative_eq!(solution.y, 100.0, epsilon = 1e-9);
        assert_relative_eq!(result.distance, 5.0, epsilon = 1e-9);
        assert_relative_eq!(result.offset.unwrap().camera.x, 5.0, epsilon = 1e-9);
    }
}

#[test]
fn test_ra_only_distance_uses_x_offset() {
    let (mut session, sky) = session_with(MultiStarConfig::default());
    session.controller_mut().ra_only = true;

    let result = step(&mut session, &sky, field(3.0, 4.0, &[0, 1, 2]), 1000);
    assert_eq!(result.outcome, FrameOutcome::Nominal);
    assert_relative_eq!(result.distance, 3.0, epsilon = 1e-9);

    let offset = result.offset.unwrap();
    assert_relative_eq!(offset.camera.y, 4.0, epsilon = 1e-9);
    let mount = offset.mount.unwrap();
    assert_relative_eq!(mount.x, 3.0, epsilon = 1e-9);
    assert_relative_eq!(session.controller().smoothed_error_ra, 3.0, epsilon = 1e-9);
}

#[test]
fn test_without_lock_solution_follows_selection() {
    let (mut session, sky) = session_with(MultiStarConfig::default());
    session.controller_mut().lock_position = None;

    let result = step(&mut session, &sky, field(2.0, -1.0, &[0, 1, 2]), 1000);
    assert_eq!(result.outcome, FrameOutcome::Nominal);
    let solution = result.solution.unwrap();
    assert_relative_eq!(solution.x, 102.0, epsilon = 1e-9);
    assert_relative_eq!(solution.y, 99.0, epsilon = 1e-9);
    assert!(result.offset.is_none());
    assert_eq!(result.distance, 0.0);
    assert_eq!(session.controller().error_frame_count, 1);
}

#[test]
fn test_uncalibrated_mount_has_no_mount_offset() {
    let (mut session, sky) = session_with(MultiStarConfig::default());
    session.controller_mut().transform = None;

    let result = step(&mut session, &sky, field(3.0, 4.0, &[0, 1, 2]), 1000);
    assert_eq!(result.outcome, FrameOutcome::Nominal);
    assert_relative_eq!(result.distance, 5.0, epsilon = 1e-9);

    let offset = result.offset.unwrap();
    assert_relative_eq!(offset.camera.x, 3.0, epsilon = 1e-9);
    assert!(offset.mount.is_none());
    assert_eq!(session.controller().smoothed_error_ra, 0.0);
    assert_relative_eq!(session.controller().smoothed_error, 5.0, epsilon = 1e-9);
}

#[test]
fn test_jump_rejected_then_admitted_after_timeout() {
    let (mut session, sky) = session_with(MultiStarConfig::default());

    for k in 1..=12 {
        step(&mut session, &sky, field(jitter(k), 0.0, &[0, 1, 2]), k * 1000);
    }
    let before_jump = session.strategy().current_position();

    for k in 13..=17 {
        let result = step(&mut session, &sky, field(10.0, 0.0, &[0, 1, 2]), k * 1000);
        assert_eq!(result.outcome, FrameOutcome::JumpRejected, "frame {k}");
        assert_eq!(result.error_info.status, "Recovering");
        assert!(result.distance > 9.0);
        // Published solution holds while rejecting
        assert_eq!(session.strategy().current_position(), before_jump);
        assert_eq!(session.checker().state(), AdmissionState::Waiting);
    }

    // Five seconds after the first rejection the offset is admitted anyway.
    let timeout = step(&mut session, &sky, field(10.0, 0.0, &[0, 1, 2]), 18_000);
    assert_eq!(timeout.outcome, FrameOutcome::Nominal);
    assert_eq!(session.checker().state(), AdmissionState::Recovering);
    assert_relative_eq!(timeout.solution.unwrap().x, 110.0, epsilon = 1e-9);

    let settled = step(&mut session, &sky, field(jitter(19), 0.0, &[0, 1, 2]), 19_000);
    assert_eq!(settled.outcome, FrameOutcome::Nominal);
    assert_eq!(session.checker().state(), AdmissionState::Guiding);
}

#[test]
fn test_jump_tolerance_disabled_accepts_jumps() {
    let config = MultiStarConfig {
        tolerate_jumps_enabled: false,
        ..Default::default()
    };
    let (mut session, sky) = session_with(config);
    for k in 1..=12 {
        step(&mut session, &sky, field(jitter(k), 0.0, &[0, 1, 2]), k * 1000);
    }
    let result = step(&mut session, &sky, field(10.0, 0.0, &[0, 1, 2]), 13_000);
    assert_eq!(result.outcome, FrameOutcome::Nominal);
    assert_eq!(session.checker().state(), AdmissionState::Guiding);
}

#[test]
fn test_identical_inputs_identical_results() {
    let script: Vec<Vec<StarMeasurement>> = (1..=30u64)
        .map(|k| match k {
            8..=10 => field(jitter(k), 0.0, &[0, 2]),
            15..=16 => Vec::new(),
            20..=24 => field(6.0, 1.0, &[0, 1, 2]),
            _ => field(jitter(k), 0.1, &[0, 1, 2]),
        })
        .collect();

    let run = || {
        let (mut session, sky) = session_with(MultiStarConfig::default());
        let transitions = record_transitions(&mut session);
        let results: Vec<FrameResult> = script
            .iter()
            .enumerate()
            .map(|(k, stars)| step(&mut session, &sky, stars.clone(), (k as u64 + 1) * 1000))
            .collect();
        let transitions = transitions.lock().unwrap().clone();
        (results, transitions)
    };

    let (results_a, transitions_a) = run();
    let (results_b, transitions_b) = run();
    assert_eq!(results_a, results_b);
    assert_eq!(transitions_a, transitions_b);
    assert!(!transitions_a.is_empty());
}

#[test]
fn test_reacquire_count_bounded_under_flicker() {
    let (mut session, sky) = session_with(MultiStarConfig::default());
    for k in 1..=40u64 {
        let present: &[usize] = if k % 3 == 0 { &[0, 1] } else { &[0, 1, 2] };
        step(&mut session, &sky, field(0.0, 0.0, present), k * 1000);

        let status = session.status();
        for slot in &status.slots {
            assert!(slot.reacquire_good_count <= 3);
        }
        if k % 3 == 0 {
            assert_eq!(status.slots[2].reacquire_good_count, 0);
            assert!(status.slots[2].lost);
        }
    }
}

#[test]
fn test_status_snapshot_visible_from_other_thread() {
    let (mut session, sky) = session_with(MultiStarConfig::default());
    let handle = session.status_handle();

    for k in 1..=3 {
        step(&mut session, &sky, field(0.5, 0.0, &[0, 1, 2]), k * 1000);
    }
    step(&mut session, &sky, Vec::new(), 4000);

    let status = std::thread::spawn(move || handle.lock().unwrap().clone())
        .join()
        .unwrap();
    assert_eq!(status.frames_processed, 4);
    assert_eq!(status.outcome, FrameOutcomeKind::AllPointsLost);
    assert_eq!(status.status, "Star lost");
    assert!(!status.locked);
    assert_eq!(status.solution_x, None);
    assert_eq!(status.admission, AdmissionStateKind::Waiting);
    assert_eq!(status.max_stars_used, 3);
    assert_eq!(status.slots.len(), 3);
}

#[test]
fn test_reset_forgets_selection() {
    let (mut session, sky) = session_with(MultiStarConfig::default());
    step(&mut session, &sky, field(0.0, 0.0, &[0, 1, 2]), 1000);
    session.reset();

    let result = step(&mut session, &sky, field(0.0, 0.0, &[0, 1, 2]), 2000);
    assert_eq!(result.outcome, FrameOutcome::NoTargetSelected);
    assert_eq!(result.error_info.status, "No star selected");
    assert_eq!(session.controller().auto_exposure_resets, 0);
}

#[test]
fn test_invalid_selection_rejected() {
    let (mut session, _sky) = session_with(MultiStarConfig::default());
    assert!(matches!(
        session.select_stars(&[]),
        Err(SessionError::EmptyPool)
    ));
    assert!(matches!(
        session.select_stars(&[LOCK, PixelPoint::new(f64::NAN, 1.0)]),
        Err(SessionError::NonFinitePosition(1))
    ));
}

#[test]
fn test_dropped_frames_reset_auto_exposure() {
    let (mut session, sky) = session_with(MultiStarConfig::default());
    session.controller_mut().exposure.auto_exposure = true;

    let ok = step(&mut session, &sky, field(0.0, 0.0, &[0, 1, 2]), 1000);
    assert_eq!(ok.error_info.status, "m=1000 SNR=20.0 Exp=1.0 s");
    assert_eq!(session.controller().last_snr, Some(20.0));

    step(&mut session, &sky, Vec::new(), 2000);
    step(&mut session, &sky, field(0.0, 0.0, &[0, 1, 2]), 3000);
    assert_eq!(session.controller().auto_exposure_resets, 2);
}

#[test]
fn test_single_star_strategy_from_config() {
    let config = MultiStarConfig {
        strategy: StrategyKind::SingleStar,
        ..Default::default()
    };
    let (mut session, sky) = session_with(config);
    let result = step(&mut session, &sky, field(0.4, -0.3, &[0, 1, 2]), 1000);
    assert_eq!(result.outcome, FrameOutcome::Nominal);
    assert_eq!(result.star_count.to_string(), "1/1");
    let solution = result.solution.unwrap();
    assert_relative_eq!(solution.x, 100.4, epsilon = 1e-9);
    assert_relative_eq!(solution.y, 99.7, epsilon = 1e-9);
}

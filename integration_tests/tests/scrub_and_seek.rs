mod common;

use common::{frame_body, TimelineHost, BASE_SEC};
use serde_json::json;
use timeline_core::{
    FetchTarget, FrameOrigin, Mode, ModeSource, SeekError, StepDirection, TransportSpeed,
};

const HALF_HOUR: i64 = 1800;

/// Twelve frames, half an hour apart, 10:00Z to 15:30Z.
fn half_hourly(config: &str) -> TimelineHost {
    let timestamps: Vec<i64> = (0..12).map(|i| BASE_SEC + i * HALF_HOUR).collect();
    let mut host = TimelineHost::new(config).with_frames(&timestamps, |index, sec| {
        frame_body(
            sec,
            json!([{ "zx": index as i64, "zy": 0, "count": 50 }]),
            json!([]),
        )
    });
    host.start();
    host
}

#[test]
fn time_of_day_seek_lands_on_the_nearest_frame() {
    let mut host = half_hourly(r#"{ "seek": { "utc_offset_minutes": 0 } }"#);
    host.controller.scrub(0);
    host.settle(16);

    let outcome = host.controller.seek("14:30").expect("valid time");
    assert_eq!(outcome.target_ms, (BASE_SEC + 9 * HALF_HOUR) * 1000);
    assert_eq!(outcome.nearest_index, 9);
    host.settle(16);

    assert_eq!(host.controller.mode(), Mode::Archive);
    assert_eq!(host.controller.focus(), Some(9));
    let frame = host.controller.current_frame().expect("seek rendered");
    assert_eq!(frame.origin, FrameOrigin::Archive { index: 9, requested: 9 });
    assert_eq!(host.controller.delta_label().as_deref(), Some("+00:00:00"));

    let diagnostics = host.controller.diagnostics();
    let seek = diagnostics.seek.expect("seek recorded");
    assert_eq!(seek.input, "14:30");
    assert_eq!(seek.nearest_sec, BASE_SEC + 9 * HALF_HOUR);
    assert_eq!(seek.delta_sec, 0.0);
    assert_eq!(
        diagnostics.last_mode_change.map(|change| change.source),
        Some(ModeSource::User)
    );
}

#[test]
fn time_of_day_is_read_in_the_configured_zone() {
    let mut host = half_hourly(r#"{ "seek": { "utc_offset_minutes": 120 } }"#);
    host.controller.scrub(0);
    host.settle(16);

    // 14:30 at UTC+2 is 12:30Z.
    let outcome = host.controller.seek("14:30").expect("valid time");
    assert_eq!(outcome.nearest_index, 5);

    let outcome = host.controller.seek("2024-05-01T12:40:00Z").expect("valid time");
    assert_eq!(outcome.nearest_index, 5);
    // Zone-less datetimes are local too: 13:20Z.
    let outcome = host.controller.seek("2024-05-01 15:20").expect("valid time");
    assert_eq!(outcome.nearest_index, 7);
}

#[test]
fn seek_moves_the_delta_anchor() {
    let mut host = half_hourly(r#"{ "seek": { "utc_offset_minutes": 0 } }"#);
    host.controller.seek("2024-05-01T11:00:00Z").expect("valid time");
    host.settle(16);
    host.controller.step(StepDirection::Forward);
    host.controller.step(StepDirection::Forward);
    assert_eq!(host.controller.focus(), Some(4));
    assert_eq!(host.controller.delta_label().as_deref(), Some("+01:00:00"));
}

#[test]
fn invalid_seek_leaves_everything_in_place() {
    let mut host = half_hourly(r#"{ "seek": { "utc_offset_minutes": 0 } }"#);
    host.controller.scrub(3);
    host.settle(16);
    let fetched = host.archive_fetch_count();
    let rendered = host.controller.diagnostics().rendered_index;

    for input in ["half past", "25:00", "2024/05/01 10:00", ""] {
        assert_eq!(
            host.controller.seek(input),
            Err(SeekError::InvalidFormat),
            "{input:?}"
        );
    }
    host.settle(100);

    assert_eq!(host.controller.focus(), Some(3));
    assert_eq!(host.controller.diagnostics().rendered_index, rendered);
    assert!(host.controller.diagnostics().seek.is_none());
    assert_eq!(host.archive_fetch_count(), fetched);
}

#[test]
fn scrubs_inside_one_tick_start_a_single_load() {
    let mut host = half_hourly("{}");
    for index in 1..=8 {
        host.controller.scrub(index);
    }
    host.settle(16);

    let diagnostics = host.controller.diagnostics();
    assert_eq!(diagnostics.scrub_request_id, 1);
    assert_eq!(diagnostics.rendered_index, Some(8));
}

#[test]
fn latest_scrub_wins_over_a_load_still_in_flight() {
    let mut host = half_hourly(r#"{ "archive": { "buffer_size": 3 } }"#);
    host.controller.scrub(2);
    host.advance(16);
    host.controller.scrub(9);
    host.advance(16);

    host.resolve_all();
    host.settle(16);
    host.settle(16);

    let frame = host.controller.current_frame().expect("rendered");
    assert_eq!(frame.origin, FrameOrigin::Archive { index: 9, requested: 9 });
}

#[test]
fn older_load_landing_after_a_newer_scrub_is_not_shown() {
    let mut host = half_hourly(r#"{ "archive": { "buffer_size": 3 } }"#);
    host.controller.scrub(2);
    host.advance(16);
    host.controller.scrub(9);
    host.advance(16);
    let request_id = host.controller.diagnostics().scrub_request_id;

    let resolved = host.resolve_matching(|target| {
        matches!(target, FetchTarget::Archive { index: 2, .. })
    });
    assert_eq!(resolved, 1);
    let shown = host.controller.current_frame().map(|frame| frame.origin);
    assert_ne!(shown, Some(FrameOrigin::Archive { index: 2, requested: 2 }));
    assert_ne!(host.controller.diagnostics().rendered_index, Some(2));

    host.settle(16);
    let diagnostics = host.controller.diagnostics();
    assert!(diagnostics.scrub_request_id > request_id);
    assert_eq!(diagnostics.rendered_index, Some(9));
    let frame = host.controller.current_frame().expect("rendered");
    assert_eq!(frame.origin, FrameOrigin::Archive { index: 9, requested: 9 });
}

#[test]
fn switching_to_live_discards_a_pending_archive_load() {
    let mut host = half_hourly(r#"{ "archive": { "buffer_size": 3 } }"#);
    host.controller.scrub(2);
    host.advance(16);
    host.controller.select_live();

    host.resolve_all();
    host.settle(16);

    assert_eq!(host.controller.mode(), Mode::Live);
    assert!(host.controller.current_frame().is_none());
    assert_eq!(host.controller.diagnostics().rendered_index, None);
}

#[test]
fn playback_runs_to_the_start_and_stops() {
    let mut host = half_hourly("{}");
    host.controller.scrub(2);
    host.settle(16);

    host.controller.rewind();
    assert!(host.controller.is_playing());
    host.settle(250);
    assert_eq!(host.controller.focus(), Some(1));
    host.settle(250);
    assert_eq!(host.controller.focus(), Some(0));
    host.settle(250);

    assert!(!host.controller.is_playing());
    assert_eq!(host.controller.focus(), Some(0));
    assert_eq!(host.controller.diagnostics().transport.ticks, 3);
}

#[test]
fn stepping_keeps_playback_and_scrubbing_stops_it() {
    let mut host = half_hourly("{}");
    host.controller.scrub(5);
    host.settle(16);

    host.controller.forward();
    host.settle(250);
    assert_eq!(host.controller.focus(), Some(6));

    assert!(host.controller.step(StepDirection::Backward));
    assert!(host.controller.is_playing());
    host.settle(250);
    assert_eq!(host.controller.focus(), Some(6));

    host.controller.scrub(1);
    assert!(!host.controller.is_playing());
    host.settle(1000);
    assert_eq!(host.controller.focus(), Some(1));
}

#[test]
fn speed_tier_sets_the_tick_interval() {
    let mut host = half_hourly("{}");
    host.controller.scrub(0);
    host.settle(16);

    host.controller.set_speed(TransportSpeed::X5);
    host.controller.play();
    host.settle(50);
    assert_eq!(host.controller.focus(), Some(1));
    host.settle(50);
    assert_eq!(host.controller.focus(), Some(2));
    assert_eq!(host.controller.diagnostics().transport.tick_ms, 50);

    host.controller.pause();
    host.settle(500);
    assert_eq!(host.controller.focus(), Some(2));
}

#[test]
fn transport_is_inert_in_live_mode() {
    let mut host = half_hourly("{}");
    host.controller.play();
    host.controller.forward();
    assert!(!host.controller.is_playing());
    assert_eq!(host.controller.mode(), Mode::Live);
}

#[test]
fn stepping_from_live_enters_archive() {
    let mut host = half_hourly("{}");
    assert_eq!(host.controller.focus(), Some(11));

    assert!(host.controller.step(StepDirection::Backward));
    assert_eq!(host.controller.mode(), Mode::Archive);
    assert_eq!(host.controller.focus(), Some(10));
    let change = host
        .controller
        .diagnostics()
        .last_mode_change
        .expect("mode change recorded");
    assert_eq!((change.from, change.to), (Mode::Live, Mode::Archive));
    assert_eq!(change.source, ModeSource::Transport);

    assert!(host.controller.step(StepDirection::Forward));
    assert!(!host.controller.step(StepDirection::Forward));
    assert_eq!(host.controller.focus(), Some(11));
}

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use serde::Serialize;
use serde_json::json;
use timeline_core::{FetchError, FetchId, FrameOrigin, TimelineController};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::commands::InspectorCommand;
use crate::source::DirectorySource;

/// Upper bound on how long the loop sleeps, so background compute results
/// are picked up promptly.
const IDLE_POLL: Duration = Duration::from_millis(50);

pub async fn run(
    mut controller: TimelineController,
    source: Arc<DirectorySource>,
    mut commands: UnboundedReceiver<InspectorCommand>,
) -> Result<()> {
    let mut fetches: JoinSet<(FetchId, Result<String, FetchError>)> = JoinSet::new();
    let mut hold_until: Option<Instant> = None;

    controller.start();

    loop {
        for request in controller.take_fetch_requests() {
            let source = Arc::clone(&source);
            fetches.spawn(async move {
                let result = source.fetch(&request.target).await;
                (request.id, result)
            });
        }

        let now = Instant::now();
        if hold_until.is_some_and(|until| until <= now) {
            hold_until = None;
        }
        let accepting = hold_until.is_none();
        let mut wait = controller
            .time_until_next_timer()
            .unwrap_or(IDLE_POLL)
            .min(IDLE_POLL);
        if let Some(until) = hold_until {
            wait = wait.min(until - now);
        }

        tokio::select! {
            Some(joined) = fetches.join_next(), if !fetches.is_empty() => match joined {
                Ok((id, result)) => controller.on_fetch_complete(id, result),
                Err(err) => warn!("Fetch task failed: {}", err),
            },
            command = commands.recv(), if accepting => match command {
                Some(InspectorCommand::Quit) => break,
                Some(InspectorCommand::Wait(ms)) => {
                    hold_until = Some(Instant::now() + Duration::from_millis(ms));
                }
                Some(command) => apply(&mut controller, command)?,
                None => {
                    debug!("Command input closed");
                    break;
                }
            },
            _ = tokio::time::sleep(wait) => controller.run_due_timers(),
        }
    }

    fetches.abort_all();
    Ok(())
}

fn apply(controller: &mut TimelineController, command: InspectorCommand) -> Result<()> {
    match command {
        InspectorCommand::Live => controller.select_live(),
        InspectorCommand::Archive => controller.select_archive(),
        InspectorCommand::Scrub(index) => controller.scrub(index),
        InspectorCommand::Step(direction) => {
            if !controller.step(direction) {
                print_json(&json!({ "step": "at_edge" }))?;
            }
        }
        InspectorCommand::Play => controller.play(),
        InspectorCommand::Pause => controller.pause(),
        InspectorCommand::Toggle => controller.toggle_play(),
        InspectorCommand::Rewind => controller.rewind(),
        InspectorCommand::Forward => controller.forward(),
        InspectorCommand::Speed(speed) => controller.set_speed(speed),
        InspectorCommand::Seek(input) => match controller.seek(&input) {
            Ok(outcome) => print_json(&json!({
                "seek": input,
                "target_ms": outcome.target_ms,
                "nearest_index": outcome.nearest_index,
                "nearest_sec": outcome.nearest_sec,
            }))?,
            Err(err) => print_json(&json!({ "seek": input, "error": err.to_string() }))?,
        },
        InspectorCommand::Status => print_json(&controller.diagnostics())?,
        InspectorCommand::Frame => print_frame(controller)?,
        InspectorCommand::Flow => print_json(controller.flow())?,
        InspectorCommand::Wait(_) | InspectorCommand::Quit => {}
    }
    Ok(())
}

fn print_frame(controller: &TimelineController) -> Result<()> {
    let Some(frame) = controller.current_frame() else {
        return print_json(&json!({ "frame": null }));
    };
    let origin = match frame.origin {
        FrameOrigin::Live { sequence } => json!({ "live": sequence }),
        FrameOrigin::Archive { index, requested } => {
            json!({ "archive": index, "requested": requested })
        }
    };
    let buckets = frame.buckets.as_ref().map(|buckets| {
        json!({
            "green": buckets.green.len(),
            "yellow": buckets.yellow.len(),
            "red": buckets.red.len(),
            "yellow_min": buckets.thresholds.yellow,
            "red_min": buckets.thresholds.red,
        })
    });
    print_json(&json!({
        "origin": origin,
        "time": frame.timestamp_sec.map(frame_schema::time::format_iso),
        "snapped": frame.snapped(),
        "players": frame.base.players.len(),
        "hotspots": frame.payload.hotspots.len(),
        "union": frame.union,
        "severity": buckets,
        "delta": controller.delta_label(),
        "note": controller.note(),
    }))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

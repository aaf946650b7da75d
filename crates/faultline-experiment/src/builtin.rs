//! Built-in action kinds: `aws:fis:wait` and
//! `aws:cloudwatch:assert-alarm-state`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::alarm::{AlarmSource, AlarmState, parse_alarm_states};
use crate::registry::{ActionContext, ActionFailure, ActionHandler, ActionKind, ActionRegistry};

pub const WAIT: &str = "aws:fis:wait";
pub const ASSERT_ALARM_STATE: &str = "aws:cloudwatch:assert-alarm-state";

/// Register the built-in kinds. `alarms` backs the alarm assertion.
pub fn register(registry: &mut ActionRegistry, alarms: Arc<dyn AlarmSource>) {
    registry.register(
        WAIT,
        ActionKind::new(Arc::new(WaitHandler))
            .with_param("duration")
            .with_param_check("duration", check_duration),
    );
    registry.register(
        ASSERT_ALARM_STATE,
        ActionKind::new(Arc::new(AssertAlarmStateHandler::new(alarms)))
            .with_param("alarmArns")
            .with_param("alarmStates")
            .with_param_check("alarmArns", check_non_empty_list)
            .with_param_check("alarmStates", check_non_empty_list),
    );
}

/// Parse an ISO-8601 duration such as `PT20M`, `PT5M30S`, `PT0.5S` or `P1D`.
///
/// Years and months are rejected because their length is not fixed.
pub fn parse_iso8601_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    let body = s
        .strip_prefix('P')
        .ok_or_else(|| format!("'{s}' is not an ISO-8601 duration (must start with P)"))?;
    let (date, time) = match body.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return Err(format!("'{s}' has an empty time part"));
            }
            (date, Some(time))
        }
        None => (body, None),
    };
    if date.is_empty() && time.is_none() {
        return Err(format!("'{s}' has no components"));
    }

    let mut secs = 0f64;
    secs += sum_components(date, &[('W', 604_800.0), ('D', 86_400.0)], s)?;
    if let Some(time) = time {
        secs += sum_components(time, &[('H', 3_600.0), ('M', 60.0), ('S', 1.0)], s)?;
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("'{s}': {e}"))
}

/// Sum `<number><unit>` components, requiring units in the given order.
fn sum_components(part: &str, units: &[(char, f64)], whole: &str) -> Result<f64, String> {
    let mut total = 0f64;
    let mut rest = part;
    let mut next_unit = 0;

    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("'{whole}' has a number without a unit"))?;
        let (number, tail) = rest.split_at(split);
        let mut chars = tail.chars();
        let unit = chars.next().unwrap_or_default();

        let position = units[next_unit..]
            .iter()
            .position(|(u, _)| *u == unit)
            .ok_or_else(|| format!("'{whole}' has unexpected designator '{unit}'"))?;
        let (_, factor) = units[next_unit + position];
        next_unit += position + 1;

        let value: f64 = number
            .parse()
            .map_err(|_| format!("'{whole}' has an invalid number '{number}'"))?;
        total += value * factor;
        rest = chars.as_str();
    }
    Ok(total)
}

fn check_duration(value: &str) -> Result<(), String> {
    parse_iso8601_duration(value).map(|_| ())
}

fn check_non_empty_list(value: &str) -> Result<(), String> {
    if split_list(value).next().is_none() {
        Err("expected a comma-separated list with at least one entry".to_string())
    } else {
        Ok(())
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Sleeps for `duration`, or until its context token is cancelled.
pub struct WaitHandler;

#[async_trait]
impl ActionHandler for WaitHandler {
    async fn execute(&self, ctx: ActionContext) -> Result<(), ActionFailure> {
        let raw = ctx
            .parameter("duration")
            .ok_or_else(|| ActionFailure::new("missing parameter 'duration'"))?;
        let duration = parse_iso8601_duration(raw).map_err(ActionFailure)?;

        debug!(action = %ctx.action_name, ?duration, "Waiting");
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = ctx.cancel.cancelled() => Err(ActionFailure::new("wait interrupted")),
        }
    }
}

/// Fails unless every listed alarm is in one of the allowed states.
pub struct AssertAlarmStateHandler {
    alarms: Arc<dyn AlarmSource>,
}

impl AssertAlarmStateHandler {
    pub fn new(alarms: Arc<dyn AlarmSource>) -> Self {
        Self { alarms }
    }
}

#[async_trait]
impl ActionHandler for AssertAlarmStateHandler {
    async fn execute(&self, ctx: ActionContext) -> Result<(), ActionFailure> {
        let arns = ctx
            .parameter("alarmArns")
            .ok_or_else(|| ActionFailure::new("missing parameter 'alarmArns'"))?;
        let allowed: Vec<AlarmState> = parse_alarm_states(
            ctx.parameter("alarmStates")
                .ok_or_else(|| ActionFailure::new("missing parameter 'alarmStates'"))?,
        );

        for alarm in split_list(arns) {
            let state = self
                .alarms
                .get_state(alarm)
                .await
                .map_err(|e| ActionFailure(format!("could not read alarm '{alarm}': {e}")))?;
            if !allowed.contains(&state) {
                let allowed: Vec<String> = allowed.iter().map(ToString::to_string).collect();
                return Err(ActionFailure(format!(
                    "alarm '{alarm}' is {state}, expected one of {}",
                    allowed.join(", ")
                )));
            }
            debug!(action = %ctx.action_name, %alarm, %state, "Alarm state as expected");
        }

        info!(action = %ctx.action_name, "Alarm states asserted");
        Ok(())
    }
}

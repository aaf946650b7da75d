//! Stop-condition monitor.
//!
//! Watches every stop condition of a run against its alarm source. Each
//! condition moves `Normal → Triggering` at most once; the first condition to
//! trigger raises a single abort signal that never resets. An alarm source
//! that cannot be reached is logged and treated as not triggering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alarm::{AlarmSource, AlarmState};
use crate::error::ExperimentError;
use crate::run::StopTrigger;
use crate::template::{STOP_CONDITION_NONE, StopCondition};

/// Shortest background poll period.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Alarm providers keyed by stop-condition source id.
pub type AlarmSources = HashMap<String, Arc<dyn AlarmSource>>;

/// Per-condition monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    Normal,
    Triggering,
}

struct WatchedCondition {
    index: usize,
    source: String,
    alarm: String,
    provider: Option<Arc<dyn AlarmSource>>,
}

/// Polls stop conditions and raises the run's abort signal.
pub struct StopConditionMonitor {
    conditions: Vec<WatchedCondition>,
    triggering_states: Vec<AlarmState>,
    status: Mutex<Vec<ConditionStatus>>,
    signal: watch::Sender<Option<StopTrigger>>,
}

impl StopConditionMonitor {
    /// Build a monitor for `conditions`. `none` conditions are ignored.
    pub fn new(
        conditions: &[StopCondition],
        sources: &AlarmSources,
        triggering_states: Vec<AlarmState>,
    ) -> Self {
        let conditions: Vec<WatchedCondition> = conditions
            .iter()
            .enumerate()
            .filter(|(_, c)| c.source != STOP_CONDITION_NONE)
            .map(|(index, c)| WatchedCondition {
                index,
                source: c.source.clone(),
                alarm: c.value.clone().unwrap_or_default(),
                provider: sources.get(&c.source).cloned(),
            })
            .collect();
        let status = Mutex::new(vec![ConditionStatus::Normal; conditions.len()]);
        let (signal, _) = watch::channel(None);

        Self {
            conditions,
            triggering_states,
            status,
            signal,
        }
    }

    /// Number of conditions actually watched.
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// The abort signal, if raised.
    pub fn tripped(&self) -> Option<StopTrigger> {
        self.signal.borrow().clone()
    }

    /// Receiver that changes once, when the abort signal is raised.
    pub fn subscribe(&self) -> watch::Receiver<Option<StopTrigger>> {
        self.signal.subscribe()
    }

    /// Status of each watched condition, in template order.
    pub fn statuses(&self) -> Vec<ConditionStatus> {
        self.status.lock().clone()
    }

    /// Query every condition once. Returns the abort trigger if one is (or
    /// already was) raised.
    pub async fn poll_once(&self) -> Option<StopTrigger> {
        if let Some(trigger) = self.tripped() {
            return Some(trigger);
        }

        for (slot, condition) in self.conditions.iter().enumerate() {
            let Some(provider) = &condition.provider else {
                let err = ExperimentError::MonitorUnavailable {
                    source_id: condition.source.clone(),
                    alarm: condition.alarm.clone(),
                    reason: "no alarm source registered".to_string(),
                };
                warn!("{err}; treating as not triggering");
                continue;
            };

            match provider.get_state(&condition.alarm).await {
                Ok(state) if self.triggering_states.contains(&state) => {
                    self.status.lock()[slot] = ConditionStatus::Triggering;
                    let trigger = StopTrigger::StopCondition {
                        index: condition.index,
                        source: condition.source.clone(),
                        alarm: condition.alarm.clone(),
                        state,
                    };
                    info!(
                        source = %condition.source,
                        alarm = %condition.alarm,
                        "Stop condition triggered"
                    );
                    return Some(self.raise(trigger));
                }
                Ok(state) => {
                    debug!(alarm = %condition.alarm, %state, "Stop condition normal");
                }
                Err(e) => {
                    let err = ExperimentError::MonitorUnavailable {
                        source_id: condition.source.clone(),
                        alarm: condition.alarm.clone(),
                        reason: e.to_string(),
                    };
                    warn!("{err}; treating as not triggering");
                }
            }
        }

        None
    }

    /// Poll on `interval` until the signal is raised or `shutdown` fires.
    ///
    /// A zero interval is raised to [`MIN_POLL_INTERVAL`].
    pub fn spawn(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            if monitor.is_empty() {
                return;
            }
            let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if monitor.poll_once().await.is_some() {
                            break;
                        }
                    }
                }
            }
            debug!("Stop-condition monitor stopped");
        })
    }

    /// Set the signal unless already set; returns whichever trigger won.
    fn raise(&self, trigger: StopTrigger) -> StopTrigger {
        let mut winner = trigger.clone();
        self.signal.send_if_modified(|current| match current {
            Some(existing) => {
                winner = existing.clone();
                false
            }
            None => {
                *current = Some(trigger);
                true
            }
        });
        winner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{AlarmError, InMemoryAlarms};
    use async_trait::async_trait;

    const FIRE: &str = "arn:aws:cloudwatch:eu-west-1:123456789012:alarm:Everythings on fire";

    struct Unreachable;

    #[async_trait]
    impl AlarmSource for Unreachable {
        async fn get_state(&self, _alarm: &str) -> Result<AlarmState, AlarmError> {
            Err(AlarmError("connection refused".into()))
        }
    }

    fn condition(source: &str, value: Option<&str>) -> StopCondition {
        StopCondition {
            source: source.into(),
            value: value.map(String::from),
        }
    }

    fn sources(alarms: Arc<InMemoryAlarms>) -> AlarmSources {
        let mut map: AlarmSources = HashMap::new();
        map.insert("aws:cloudwatch:alarm".into(), alarms);
        map
    }

    #[tokio::test]
    async fn test_ok_alarm_does_not_trip() {
        let alarms = Arc::new(InMemoryAlarms::new());
        alarms.set(FIRE, AlarmState::Ok);
        let monitor = StopConditionMonitor::new(
            &[condition("aws:cloudwatch:alarm", Some(FIRE))],
            &sources(alarms),
            vec![AlarmState::Alarm],
        );
        assert!(monitor.poll_once().await.is_none());
        assert_eq!(monitor.statuses(), vec![ConditionStatus::Normal]);
    }

    #[tokio::test]
    async fn test_alarm_trips_and_never_resets() {
        let alarms = Arc::new(InMemoryAlarms::new());
        alarms.set(FIRE, AlarmState::Alarm);
        let monitor = StopConditionMonitor::new(
            &[condition("aws:cloudwatch:alarm", Some(FIRE))],
            &sources(alarms.clone()),
            vec![AlarmState::Alarm],
        );

        let trigger = monitor.poll_once().await.unwrap();
        match &trigger {
            StopTrigger::StopCondition { index, alarm, state, .. } => {
                assert_eq!(*index, 0);
                assert_eq!(alarm, FIRE);
                assert_eq!(*state, AlarmState::Alarm);
            }
            other => panic!("Expected StopCondition, got: {other:?}"),
        }

        alarms.set(FIRE, AlarmState::Ok);
        assert_eq!(monitor.poll_once().await, Some(trigger.clone()));
        assert_eq!(monitor.tripped(), Some(trigger));
        assert_eq!(monitor.statuses(), vec![ConditionStatus::Triggering]);
    }

    #[tokio::test]
    async fn test_any_condition_triggers() {
        let alarms = Arc::new(InMemoryAlarms::new());
        alarms.set("first", AlarmState::Ok);
        alarms.set("second", AlarmState::Alarm);
        let monitor = StopConditionMonitor::new(
            &[
                condition("aws:cloudwatch:alarm", Some("first")),
                condition("aws:cloudwatch:alarm", Some("second")),
            ],
            &sources(alarms),
            vec![AlarmState::Alarm],
        );
        match monitor.poll_once().await {
            Some(StopTrigger::StopCondition { index, .. }) => assert_eq!(index, 1),
            other => panic!("Expected trigger on second condition, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_source_is_not_a_trigger() {
        let mut map: AlarmSources = HashMap::new();
        map.insert("aws:cloudwatch:alarm".into(), Arc::new(Unreachable));
        let monitor = StopConditionMonitor::new(
            &[
                condition("aws:cloudwatch:alarm", Some(FIRE)),
                condition("custom:unregistered", Some("x")),
            ],
            &map,
            vec![AlarmState::Alarm],
        );
        assert!(monitor.poll_once().await.is_none());
        assert!(monitor.tripped().is_none());
    }

    #[tokio::test]
    async fn test_none_source_is_ignored() {
        let monitor = StopConditionMonitor::new(
            &[condition(STOP_CONDITION_NONE, None)],
            &HashMap::new(),
            vec![AlarmState::Alarm],
        );
        assert!(monitor.is_empty());
        assert!(monitor.poll_once().await.is_none());
    }

    #[tokio::test]
    async fn test_custom_triggering_states() {
        let alarms = Arc::new(InMemoryAlarms::new());
        let monitor = StopConditionMonitor::new(
            &[condition("aws:cloudwatch:alarm", Some("unknown-alarm"))],
            &sources(alarms),
            vec![AlarmState::Alarm, AlarmState::InsufficientData],
        );
        assert!(monitor.poll_once().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_poll_raises_signal() {
        let alarms = Arc::new(InMemoryAlarms::new());
        alarms.set(FIRE, AlarmState::Ok);
        let monitor = Arc::new(StopConditionMonitor::new(
            &[condition("aws:cloudwatch:alarm", Some(FIRE))],
            &sources(alarms.clone()),
            vec![AlarmState::Alarm],
        ));
        let mut rx = monitor.subscribe();
        let shutdown = CancellationToken::new();
        let handle = monitor.spawn(Duration::from_secs(1), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(monitor.tripped().is_none());

        alarms.set(FIRE, AlarmState::Alarm);
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_some());
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let alarms = Arc::new(InMemoryAlarms::new());
        alarms.set(FIRE, AlarmState::Ok);
        let monitor = Arc::new(StopConditionMonitor::new(
            &[condition("aws:cloudwatch:alarm", Some(FIRE))],
            &sources(alarms.clone()),
            vec![AlarmState::Alarm],
        ));
        let handle = monitor.spawn(Duration::ZERO, CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(10)).await;
        alarms.set(FIRE, AlarmState::Alarm);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(monitor.tripped().is_some());
        // Task ended on the trigger rather than panicking
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_polling() {
        let alarms = Arc::new(InMemoryAlarms::new());
        let monitor = Arc::new(StopConditionMonitor::new(
            &[condition("aws:cloudwatch:alarm", Some(FIRE))],
            &sources(alarms),
            vec![AlarmState::Alarm],
        ));
        let shutdown = CancellationToken::new();
        let handle = monitor.spawn(Duration::from_secs(1), shutdown.clone());
        shutdown.cancel();
        handle.await.unwrap();
        assert!(monitor.tripped().is_none());
    }
}

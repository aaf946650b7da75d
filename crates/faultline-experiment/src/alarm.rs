//! Alarm states and the alarm-source seam.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// State reported by an alarm provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum AlarmState {
    Ok,
    Alarm,
    InsufficientData,
    /// Provider-specific state with no fixed meaning here.
    Other(String),
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmState::Ok => write!(f, "OK"),
            AlarmState::Alarm => write!(f, "ALARM"),
            AlarmState::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
            AlarmState::Other(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for AlarmState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "OK" => AlarmState::Ok,
            "ALARM" => AlarmState::Alarm,
            "INSUFFICIENT_DATA" => AlarmState::InsufficientData,
            other => AlarmState::Other(other.to_string()),
        })
    }
}

impl From<String> for AlarmState {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(state) => state,
            Err(never) => match never {},
        }
    }
}

impl From<AlarmState> for String {
    fn from(state: AlarmState) -> Self {
        state.to_string()
    }
}

/// Parse a comma-separated list such as `OK,INSUFFICIENT_DATA`.
pub fn parse_alarm_states(list: &str) -> Vec<AlarmState> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| AlarmState::from(s.to_string()))
        .collect()
}

/// The alarm provider could not answer.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct AlarmError(pub String);

/// External alarm/metric backend.
#[async_trait]
pub trait AlarmSource: Send + Sync {
    /// Current state of the alarm identified by `alarm`.
    async fn get_state(&self, alarm: &str) -> Result<AlarmState, AlarmError>;
}

/// Alarm source backed by a settable in-memory map.
///
/// Unknown alarms report `INSUFFICIENT_DATA`.
#[derive(Debug, Default)]
pub struct InMemoryAlarms {
    states: RwLock<HashMap<String, AlarmState>>,
}

impl InMemoryAlarms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, alarm: impl Into<String>, state: AlarmState) {
        self.states.write().insert(alarm.into(), state);
    }
}

#[async_trait]
impl AlarmSource for InMemoryAlarms {
    async fn get_state(&self, alarm: &str) -> Result<AlarmState, AlarmError> {
        Ok(self
            .states
            .read()
            .get(alarm)
            .cloned()
            .unwrap_or(AlarmState::InsufficientData))
    }
}

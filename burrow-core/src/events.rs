//! Namespace lifecycle events with structured tracing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::{ChildStatus, NamespaceHandle, ProcessId, SetupStep};

/// Events emitted while namespaces and links are created and destroyed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A child was spawned into new namespaces
    ChildSpawned {
        /// Child PID in the parent's namespace
        pid: ProcessId,
        /// Namespaces the child was created in
        namespaces: Vec<NamespaceHandle>,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// A child was reaped
    ChildReaped {
        /// Collected status
        status: ChildStatus,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// A network setup step completed
    StepCompleted {
        /// Namespace being provisioned
        namespace: String,
        /// Completed step
        step: SetupStep,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// A network setup step failed and rollback was triggered
    StepFailed {
        /// Namespace being provisioned
        namespace: String,
        /// Failed step
        step: SetupStep,
        /// Error message
        message: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// A network namespace and its links were removed
    TornDown {
        /// Namespace removed
        namespace: String,
        /// Number of objects actually deleted (0 on a repeated teardown)
        removed: usize,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },
}

impl LifecycleEvent {
    /// A `ChildSpawned` event stamped now
    #[must_use]
    pub fn child_spawned(pid: ProcessId, namespaces: Vec<NamespaceHandle>) -> Self {
        Self::ChildSpawned {
            pid,
            namespaces,
            timestamp: SystemTime::now(),
        }
    }

    /// A `ChildReaped` event stamped now
    #[must_use]
    pub fn child_reaped(status: ChildStatus) -> Self {
        Self::ChildReaped {
            status,
            timestamp: SystemTime::now(),
        }
    }

    /// A `StepCompleted` event stamped now
    #[must_use]
    pub fn step_completed(namespace: impl Into<String>, step: SetupStep) -> Self {
        Self::StepCompleted {
            namespace: namespace.into(),
            step,
            timestamp: SystemTime::now(),
        }
    }

    /// A `StepFailed` event stamped now
    #[must_use]
    pub fn step_failed(
        namespace: impl Into<String>,
        step: SetupStep,
        message: impl Into<String>,
    ) -> Self {
        Self::StepFailed {
            namespace: namespace.into(),
            step,
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }

    /// A `TornDown` event stamped now
    #[must_use]
    pub fn torn_down(namespace: impl Into<String>, removed: usize) -> Self {
        Self::TornDown {
            namespace: namespace.into(),
            removed,
            timestamp: SystemTime::now(),
        }
    }

    /// Get the timestamp from any event
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        match self {
            Self::ChildSpawned { timestamp, .. }
            | Self::ChildReaped { timestamp, .. }
            | Self::StepCompleted { timestamp, .. }
            | Self::StepFailed { timestamp, .. }
            | Self::TornDown { timestamp, .. } => *timestamp,
        }
    }

    /// Check if this is a critical event
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::StepFailed { .. })
    }

    /// Emit structured tracing event
    pub fn emit_trace(&self) {
        match self {
            Self::ChildSpawned {
                pid, namespaces, ..
            } => {
                tracing::info!(
                    pid = pid.as_raw(),
                    namespaces = ?namespaces.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    event = "child_spawned",
                    "Child spawned"
                );
            }
            Self::ChildReaped { status, .. } => {
                tracing::info!(
                    pid = status.pid.as_raw(),
                    reason = %status.reason,
                    class = ?status.classification(),
                    event = "child_reaped",
                    "Child reaped"
                );
            }
            Self::StepCompleted {
                namespace, step, ..
            } => {
                tracing::debug!(
                    namespace = %namespace,
                    step = %step,
                    event = "step_completed",
                    "Setup step completed"
                );
            }
            Self::StepFailed {
                namespace,
                step,
                message,
                ..
            } => {
                tracing::error!(
                    namespace = %namespace,
                    step = %step,
                    message = %message,
                    event = "step_failed",
                    "Setup step failed"
                );
            }
            Self::TornDown {
                namespace, removed, ..
            } => {
                tracing::info!(
                    namespace = %namespace,
                    removed,
                    event = "torn_down",
                    "Network namespace torn down"
                );
            }
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChildSpawned { pid, .. } => write!(f, "Child {pid} spawned"),
            Self::ChildReaped { status, .. } => write!(f, "{status}"),
            Self::StepCompleted {
                namespace, step, ..
            } => write!(f, "Namespace {namespace}: {step} done"),
            Self::StepFailed {
                namespace,
                step,
                message,
                ..
            } => write!(f, "Namespace {namespace}: {step} failed: {message}"),
            Self::TornDown {
                namespace, removed, ..
            } => write!(f, "Namespace {namespace} torn down ({removed} removed)"),
        }
    }
}

// Custom SystemTime serialization
mod systemtime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(since_epoch.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_critical() {
        let event = LifecycleEvent::step_failed("blue", SetupStep::MoveToNamespace, "gone");
        assert!(event.is_critical());

        let event = LifecycleEvent::torn_down("blue", 2);
        assert!(!event.is_critical());
    }

    #[test]
    fn test_event_display() {
        let event = LifecycleEvent::step_completed("blue", SetupStep::CreateNamespace);
        assert_eq!(event.to_string(), "Namespace blue: step 1 (create namespace) done");
    }

    #[test]
    fn test_event_serde() {
        let status = ChildStatus::exited(ProcessId::from_raw(7), 0);
        let event = LifecycleEvent::child_reaped(status);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"child_reaped\""));

        let deserialized: LifecycleEvent = serde_json::from_str(&json).unwrap();
        match deserialized {
            LifecycleEvent::ChildReaped { status: back, .. } => assert_eq!(back, status),
            other => panic!("unexpected event {other:?}"),
        }
    }
}

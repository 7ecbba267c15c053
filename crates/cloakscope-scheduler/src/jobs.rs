//! Job type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors for values outside a closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    /// Which enum was being parsed
    pub kind: &'static str,
    /// The rejected input
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Storage and wire representation.
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Work a worker invocation performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Re-test targets for cloaking
    DivergenceTest,
    /// HEAD-check landing pages and deactivate dead targets
    StatusCheck,
    /// Run recurring security audits that are due
    ScheduledAudits,
}

string_enum!(TaskType, "task type", {
    DivergenceTest => "divergence_test",
    StatusCheck => "status_check",
    ScheduledAudits => "scheduled_audits",
});

/// How a job run was triggered.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Direct user request
    #[default]
    Manual,
    /// Once-a-day sweep over all active targets
    Daily,
    /// Frequent pass over high-suspicion targets
    Intraday,
}

string_enum!(ScheduleType, "schedule type", {
    Manual => "manual",
    Daily => "daily",
    Intraday => "intraday",
});

/// Lifecycle of a job run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not started
    Pending,
    /// Work in progress
    Running,
    /// Finished, possibly with partial errors
    Completed,
    /// Every item failed
    Failed,
}

string_enum!(JobStatus, "job status", {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

impl JobStatus {
    /// Terminal states are never overwritten.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Recurrence of a scheduled audit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
}

string_enum!(Recurrence, "recurrence", {
    Daily => "daily",
    Weekly => "weekly",
    Monthly => "monthly",
});

/// Maximum number of error messages kept in a run's error summary.
pub const ERROR_SUMMARY_LIMIT: usize = 5;

/// Counters accumulated over one job run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTally {
    /// Items handled without error
    pub processed: u32,
    /// Targets newly found cloaking
    pub divergences: u32,
    /// One message per failed item
    pub errors: Vec<String>,
}

impl RunTally {
    /// Count one successful item.
    pub fn record_success(&mut self) {
        self.processed += 1;
    }

    /// Count one divergence.
    pub fn record_divergence(&mut self) {
        self.divergences += 1;
    }

    /// Count one failed item.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Number of failed items.
    #[must_use]
    pub fn error_count(&self) -> u32 {
        u32::try_from(self.errors.len()).unwrap_or(u32::MAX)
    }

    /// `Failed` only if something went wrong and nothing succeeded.
    #[must_use]
    pub fn final_status(&self) -> JobStatus {
        if !self.errors.is_empty() && self.processed == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }

    /// First few error messages joined, or `None` when there were none.
    #[must_use]
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .take(ERROR_SUMMARY_LIMIT)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

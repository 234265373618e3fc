use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Terminal status of a run, ordered by severity.
///
/// `Success < Unstable < Failure < Aborted < NotBuilt`, so combining two
/// statuses is just `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunStatus {
    Success,
    Unstable,
    Failure,
    Aborted,
    NotBuilt,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Unstable => "UNSTABLE",
            RunStatus::Failure => "FAILURE",
            RunStatus::Aborted => "ABORTED",
            RunStatus::NotBuilt => "NOT_BUILT",
        }
    }

    pub fn is_worse_than(self, other: RunStatus) -> bool {
        self > other
    }

    /// Worst of the two statuses.
    pub fn combine(self, other: RunStatus) -> RunStatus {
        self.max(other)
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        RunStatus::Success
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "SUCCESS" => Ok(RunStatus::Success),
            "UNSTABLE" => Ok(RunStatus::Unstable),
            "FAILURE" => Ok(RunStatus::Failure),
            "ABORTED" => Ok(RunStatus::Aborted),
            "NOT_BUILT" => Ok(RunStatus::NotBuilt),
            other => Err(format!(
                "invalid run status: {other} (expected SUCCESS, UNSTABLE, FAILURE, ABORTED or NOT_BUILT)"
            )),
        }
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Identity of a run: the job's full name plus its per-job run number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId {
    pub job: String,
    pub number: u64,
}

impl RunId {
    pub fn new(job: impl Into<String>, number: u64) -> Self {
        Self {
            job: job.into(),
            number,
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.job, self.number)
    }
}

impl Serialize for RunId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Stable identifier of a step node inside one run's execution graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an item waiting in the admission queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueItemId(pub u64);

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item-{}", self.0)
    }
}

/// Effective identity a trigger runs as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    /// Internal identity that holds every permission.
    System,
    Anonymous,
    User(String),
}

impl Principal {
    pub fn name(&self) -> &str {
        match self {
            Principal::System => "SYSTEM",
            Principal::Anonymous => "anonymous",
            Principal::User(name) => name,
        }
    }
}

impl Default for Principal {
    fn default() -> Self {
        Principal::System
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Principal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("empty principal name".to_string()),
            "SYSTEM" => Ok(Principal::System),
            "anonymous" => Ok(Principal::Anonymous),
            other => Ok(Principal::User(other.to_string())),
        }
    }
}

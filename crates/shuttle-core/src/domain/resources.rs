//! Resources - タスクの資源要求と既定値
//!
//! 既知の資源は cpu / gpu / memory / disk / time の 5 種類です。
//! それ以外に `os`（文字列リスト）や `site`（文字列）のような自由キーも要求に書けます。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const OS_KEY: &str = "os";
pub const SITE_KEY: &str = "site";

/// Resource requirements of a task (or the resources offered by a worker).
pub type Requirements = BTreeMap<String, RequirementValue>;

/// One requirement value.
///
/// JSON の形をそのまま受けるため untagged。整数は `Int`、小数は `Float` になります。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequirementValue {
    Int(i64),
    Float(f64),
    List(Vec<String>),
    Text(String),
}

impl RequirementValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RequirementValue::Int(v) => Some(*v as f64),
            RequirementValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Equality as seen by the queue filter.
    ///
    /// A stored list also matches an offered text that it contains
    /// (e.g. a task accepting several OS images).
    pub fn accepts(&self, offered: &RequirementValue) -> bool {
        match (self, offered) {
            (RequirementValue::List(items), RequirementValue::Text(t)) => items.contains(t),
            (stored, offered) => match (stored.as_f64(), offered.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => stored == offered,
            },
        }
    }
}

impl fmt::Display for RequirementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequirementValue::Int(v) => write!(f, "{v}"),
            RequirementValue::Float(v) => write!(f, "{v}"),
            RequirementValue::List(v) => write!(f, "[{}]", v.join(",")),
            RequirementValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for RequirementValue {
    fn from(v: i64) -> Self {
        RequirementValue::Int(v)
    }
}

impl From<f64> for RequirementValue {
    fn from(v: f64) -> Self {
        RequirementValue::Float(v)
    }
}

impl From<&str> for RequirementValue {
    fn from(v: &str) -> Self {
        RequirementValue::Text(v.to_string())
    }
}

/// Known resources with a defined default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Cpu,
    Gpu,
    Memory,
    Disk,
    Time,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Gpu,
        Resource::Memory,
        Resource::Disk,
        Resource::Time,
        Resource::Cpu,
    ];

    /// Resources the failure tuner may raise.
    pub const TUNABLE: [Resource; 4] = [
        Resource::Cpu,
        Resource::Memory,
        Resource::Disk,
        Resource::Time,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Gpu => "gpu",
            Resource::Memory => "memory",
            Resource::Disk => "disk",
            Resource::Time => "time",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.key() == key)
    }

    /// Counted resources are whole units (cpu cores, gpu devices).
    pub fn is_count(self) -> bool {
        matches!(self, Resource::Cpu | Resource::Gpu)
    }

    /// Default amount: cpu 1, gpu 0, memory 1.0 GB, disk 10.0 GB, time 1.0 hour.
    pub fn default_value(self) -> RequirementValue {
        match self {
            Resource::Cpu => RequirementValue::Int(1),
            Resource::Gpu => RequirementValue::Int(0),
            Resource::Memory => RequirementValue::Float(1.0),
            Resource::Disk => RequirementValue::Float(10.0),
            Resource::Time => RequirementValue::Float(1.0),
        }
    }

    pub fn default_amount(self) -> f64 {
        self.default_value().as_f64().unwrap_or(0.0)
    }

    /// Wrap an amount in the value type this resource is stored as.
    pub fn value_of(self, amount: f64) -> RequirementValue {
        if self.is_count() {
            RequirementValue::Int(amount.ceil() as i64)
        } else {
            RequirementValue::Float(amount)
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Amount of `resource` a task asks for, falling back to the default.
///
/// Returns `None` when the stored value is not numeric.
pub fn requested_amount(requirements: &Requirements, resource: Resource) -> Option<f64> {
    match requirements.get(resource.key()) {
        Some(value) => value.as_f64(),
        None => Some(resource.default_amount()),
    }
}

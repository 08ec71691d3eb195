//! Operation model for workload execution.
//!
//! Defines the closed set of request kinds the engine can issue against a
//! key-value store, and the cyclic sequence that decides their mix.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// The kind of request to issue against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Insert a new key; fails if it already exists.
    Create,
    /// Read an existing key.
    Get,
    /// Overwrite an existing key.
    Update,
    /// Insert or overwrite a key.
    Set,
    /// Remove a key.
    Destroy,
}

impl OperationKind {
    /// Number of kinds.
    pub const COUNT: usize = 5;

    /// All kinds in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Create,
        Self::Get,
        Self::Update,
        Self::Set,
        Self::Destroy,
    ];

    /// Returns a stable index for per-kind tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Create => 0,
            Self::Get => 1,
            Self::Update => 2,
            Self::Set => 3,
            Self::Destroy => 4,
        }
    }

    /// Returns the display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Get => "Get",
            Self::Update => "Update",
            Self::Set => "Set",
            Self::Destroy => "Destroy",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperationKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "get" => Ok(Self::Get),
            "update" => Ok(Self::Update),
            "set" => Ok(Self::Set),
            "destroy" | "delete" => Ok(Self::Destroy),
            other => Err(ConfigError::UnknownOperation {
                name: other.to_string(),
            }),
        }
    }
}

/// One step of the cyclic sequence: issue `repeat` operations of `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadItem {
    /// Operation kind.
    pub kind: OperationKind,
    /// Number of consecutive operations of this kind.
    pub repeat: u32,
}

impl WorkloadItem {
    /// Creates a new item.
    #[must_use]
    pub const fn new(kind: OperationKind, repeat: u32) -> Self {
        Self { kind, repeat }
    }
}

impl fmt::Display for WorkloadItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.name().to_ascii_lowercase(), self.repeat)
    }
}

impl FromStr for WorkloadItem {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, repeat) = match s.split_once(':') {
            Some((kind, repeat)) => {
                let repeat = repeat
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| ConfigError::InvalidSequence {
                        message: format!("bad repeat count in '{s}': {e}"),
                    })?;
                (kind, repeat)
            }
            None => (s, 1),
        };
        Ok(Self::new(kind.parse()?, repeat))
    }
}

/// Ordered list of items walked cyclically by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence {
    items: Vec<WorkloadItem>,
}

impl Sequence {
    /// Creates a sequence from items.
    #[must_use]
    pub const fn new(items: Vec<WorkloadItem>) -> Self {
        Self { items }
    }

    /// Returns the items.
    #[must_use]
    pub fn items(&self) -> &[WorkloadItem] {
        &self.items
    }

    /// Returns true if there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true if at least one item would issue requests.
    ///
    /// Creates are never issued against a preloaded key range.
    #[must_use]
    pub fn has_runnable(&self, preloaded: bool) -> bool {
        self.items
            .iter()
            .any(|item| item.repeat > 0 && !(preloaded && item.kind == OperationKind::Create))
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}

impl FromStr for Sequence {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let items = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<WorkloadItem>, _>>()?;
        if items.is_empty() {
            return Err(ConfigError::InvalidSequence {
                message: format!("no operations in '{s}'"),
            });
        }
        Ok(Self { items })
    }
}

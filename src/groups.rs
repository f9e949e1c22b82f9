/// Turbine group registry.
///
/// A batch always belongs to one named turbine group (`data_group_<N>`),
/// and the group number determines which turbine IDs the batch may carry.
/// The default registry mirrors the fleet layout: five turbines per group.
/// Deployments can override the ranges in `turbine_config.toml`.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix every group name starts with.
pub const GROUP_NAME_PREFIX: &str = "data_group_";

// ---------------------------------------------------------------------------
// Group metadata
// ---------------------------------------------------------------------------

/// Inclusive turbine-ID range for a single group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurbineGroup {
    /// Numeric suffix of `data_group_<N>`.
    pub id: u32,
    pub min_id: i64,
    pub max_id: i64,
}

impl TurbineGroup {
    pub fn contains(&self, turbine_id: i64) -> bool {
        (self.min_id..=self.max_id).contains(&turbine_id)
    }

    /// Every turbine ID expected in a batch for this group.
    pub fn expected_ids(&self) -> std::ops::RangeInclusive<i64> {
        self.min_id..=self.max_id
    }
}

/// The built-in group layout: group 1 ⇒ 1–5, 2 ⇒ 6–10, 3 ⇒ 11–15.
pub static DEFAULT_GROUP_REGISTRY: &[TurbineGroup] = &[
    TurbineGroup { id: 1, min_id: 1, max_id: 5 },
    TurbineGroup { id: 2, min_id: 6, max_id: 10 },
    TurbineGroup { id: 3, min_id: 11, max_id: 15 },
];

/// Lookup table from group number to turbine range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurbineGroups(Vec<TurbineGroup>);

impl Default for TurbineGroups {
    fn default() -> Self {
        TurbineGroups(DEFAULT_GROUP_REGISTRY.to_vec())
    }
}

impl TurbineGroups {
    pub fn new(groups: Vec<TurbineGroup>) -> Self {
        TurbineGroups(groups)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TurbineGroup> {
        self.0.iter()
    }

    /// Looks up a group by number. Returns `None` if not configured.
    pub fn find(&self, id: u32) -> Option<&TurbineGroup> {
        self.0.iter().find(|g| g.id == id)
    }

    /// Resolves a group name such as `data_group_2` to its range.
    pub fn range_for(&self, group_name: &str) -> Result<TurbineGroup> {
        let id = parse_group_number(group_name)?;
        self.find(id).copied().ok_or(IngestError::UnknownGroup(id))
    }

    /// Checks ranges are non-inverted, ids unique and ranges disjoint.
    pub fn validate(&self) -> Result<()> {
        for (i, g) in self.0.iter().enumerate() {
            if g.min_id > g.max_id {
                return Err(IngestError::Config(format!(
                    "group {} has inverted range [{}, {}]",
                    g.id, g.min_id, g.max_id
                )));
            }
            for other in &self.0[i + 1..] {
                if other.id == g.id {
                    return Err(IngestError::Config(format!("group {} defined twice", g.id)));
                }
                if other.min_id <= g.max_id && g.min_id <= other.max_id {
                    return Err(IngestError::Config(format!(
                        "groups {} and {} have overlapping turbine ranges",
                        g.id, other.id
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Group names
// ---------------------------------------------------------------------------

/// Extracts `N` from a name that starts with `data_group_<N>`.
///
/// Trailing text after the digits is ignored, so a file stem or a file
/// name (`data_group_1.csv`) both work.
pub fn parse_group_number(group_name: &str) -> Result<u32> {
    let invalid = || IngestError::InvalidGroupName(group_name.to_string());

    let rest = group_name.strip_prefix(GROUP_NAME_PREFIX).ok_or_else(invalid)?;
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());

    rest[..digits_end].parse().map_err(|_| invalid())
}

/// Derives a group name from a batch's location on disk.
///
/// Single-file batches are named after the file (`data_group_1.csv`);
/// folder batches hold dated files inside a folder named after the group
/// (`data_group_1/2022-03-30.csv`).
pub fn group_name_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with(GROUP_NAME_PREFIX) {
        return Some(stem.to_string());
    }
    path.parent()?
        .file_name()?
        .to_str()
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

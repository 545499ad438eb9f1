//! Common parameters shared by every step of a task.
//!
//! The bag stays string-keyed on the wire (it is persisted with the task), but
//! code only touches it through [`CommonKey`], the closed set of recognized keys.
//!
//! | key | written by | read by |
//! |---|---|---|
//! | `operationType`, `operator`, `clusterID`, `nodeGroupID`, `projectID`, `cloudID` | builder | all steps |
//! | `scaleCount`, `poolID` | builder | apply-instances |
//! | `applyOrderID` | apply-instances | apply-instances (resume) |
//! | `deviceIDs`, `instanceIDs`, `nodeIPs` | apply-instances, builder (scale-down) | cluster steps, destroy-instances |
//! | `destroyOrderID` | destroy-instances | destroy-instances (resume) |
//! | `preScript`, `postScript` | builder | run-pre-script, run-post-script |

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommonKey {
    OperationType,
    Operator,
    ClusterId,
    NodeGroupId,
    ProjectId,
    CloudId,
    ScaleCount,
    PoolId,
    ApplyOrderId,
    DestroyOrderId,
    DeviceIds,
    InstanceIds,
    NodeIps,
    PreScript,
    PostScript,
}

impl CommonKey {
    pub fn as_str(self) -> &'static str {
        match self {
            CommonKey::OperationType => "operationType",
            CommonKey::Operator => "operator",
            CommonKey::ClusterId => "clusterID",
            CommonKey::NodeGroupId => "nodeGroupID",
            CommonKey::ProjectId => "projectID",
            CommonKey::CloudId => "cloudID",
            CommonKey::ScaleCount => "scaleCount",
            CommonKey::PoolId => "poolID",
            CommonKey::ApplyOrderId => "applyOrderID",
            CommonKey::DestroyOrderId => "destroyOrderID",
            CommonKey::DeviceIds => "deviceIDs",
            CommonKey::InstanceIds => "instanceIDs",
            CommonKey::NodeIps => "nodeIPs",
            CommonKey::PreScript => "preScript",
            CommonKey::PostScript => "postScript",
        }
    }
}

impl fmt::Display for CommonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const LIST_SEPARATOR: char = ',';

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommonParams(BTreeMap<String, String>);

impl CommonParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty values are treated as absent.
    pub fn get(&self, key: CommonKey) -> Option<&str> {
        self.0
            .get(key.as_str())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: CommonKey, value: impl Into<String>) {
        self.0.insert(key.as_str().to_string(), value.into());
    }

    pub fn remove(&mut self, key: CommonKey) -> Option<String> {
        self.0.remove(key.as_str())
    }

    pub fn get_list(&self, key: CommonKey) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(LIST_SEPARATOR)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_list<S: AsRef<str>>(&mut self, key: CommonKey, values: &[S]) {
        let joined = values
            .iter()
            .map(|v| v.as_ref())
            .collect::<Vec<_>>()
            .join(&LIST_SEPARATOR.to_string());
        self.set(key, joined);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

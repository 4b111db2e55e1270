//! Instance records and their column encoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use nodewarden_store::Row;

use crate::error::{RegistryError, RegistryResult};

pub(crate) const COL_CLUSTER: &str = "cluster";
pub(crate) const COL_LOCATION: &str = "location";
pub(crate) const COL_INSTANCE_ID: &str = "instanceId";
pub(crate) const COL_HOSTNAME: &str = "hostname";
pub(crate) const COL_IP: &str = "ip";
pub(crate) const COL_ZONE: &str = "availabilityZone";
pub(crate) const COL_ASG: &str = "asgName";
pub(crate) const COL_VOLUMES: &str = "volumes";
/// Lock claimant that created the row.
pub(crate) const COL_HOLDER: &str = "holder";

/// One live (or formerly live) member of a search cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub cluster_name: String,
    /// Cloud region.
    pub datacenter: String,
    /// Cloud instance id, unique within the datacenter.
    pub instance_id: String,
    pub hostname: String,
    pub public_ip: String,
    pub availability_zone: String,
    pub asg_name: String,
    /// Store write time in epoch millis. `None` until read back.
    pub update_time: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attached_volumes: BTreeMap<String, String>,
}

impl InstanceRecord {
    /// Externally visible node id: `{datacenter}.{instance_id}`.
    pub fn logical_id(&self) -> String {
        logical_id(&self.datacenter, &self.instance_id)
    }

    /// Composite registry row key.
    pub fn row_key(&self) -> String {
        row_key(&self.cluster_name, &self.datacenter, &self.instance_id)
    }

    /// Columns written for this record, excluding the holder.
    pub(crate) fn columns(&self) -> RegistryResult<Vec<(&'static str, String)>> {
        let mut columns = vec![
            (COL_CLUSTER, self.cluster_name.clone()),
            (COL_LOCATION, self.datacenter.clone()),
            (COL_INSTANCE_ID, self.instance_id.clone()),
            (COL_HOSTNAME, self.hostname.clone()),
            (COL_IP, self.public_ip.clone()),
            (COL_ZONE, self.availability_zone.clone()),
            (COL_ASG, self.asg_name.clone()),
        ];
        if !self.attached_volumes.is_empty() {
            let volumes = serde_json::to_string(&self.attached_volumes).map_err(|e| {
                RegistryError::CorruptRow {
                    key: self.row_key(),
                    reason: format!("volumes: {e}"),
                }
            })?;
            columns.push((COL_VOLUMES, volumes));
        }
        Ok(columns)
    }

    /// Decode a registry row.
    pub(crate) fn from_row(row: &Row) -> RegistryResult<Self> {
        let required = |column: &str| {
            row.value(column)
                .map(str::to_string)
                .ok_or_else(|| RegistryError::CorruptRow {
                    key: row.key.clone(),
                    reason: format!("missing column {column}"),
                })
        };
        let attached_volumes = match row.value(COL_VOLUMES) {
            Some(raw) => serde_json::from_str(raw).map_err(|e| RegistryError::CorruptRow {
                key: row.key.clone(),
                reason: format!("volumes: {e}"),
            })?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            cluster_name: required(COL_CLUSTER)?,
            datacenter: required(COL_LOCATION)?,
            instance_id: required(COL_INSTANCE_ID)?,
            hostname: row.value(COL_HOSTNAME).unwrap_or_default().to_string(),
            public_ip: row.value(COL_IP).unwrap_or_default().to_string(),
            availability_zone: row.value(COL_ZONE).unwrap_or_default().to_string(),
            asg_name: row.value(COL_ASG).unwrap_or_default().to_string(),
            update_time: Some(row.written_at()),
            attached_volumes,
        })
    }
}

pub fn logical_id(datacenter: &str, instance_id: &str) -> String {
    format!("{datacenter}.{instance_id}")
}

pub fn row_key(cluster: &str, datacenter: &str, instance_id: &str) -> String {
    format!("{cluster}_{datacenter}_{instance_id}")
}

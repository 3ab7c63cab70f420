//! Row mapping between `lease_*` tables and core records.

use chrono::{DateTime, Utc};
use seatlease_core::{
    Allocation, AllocationId, AllocationMark, AllocationStatus, CollectionId, HoldInfo, HolderId,
    Resource, ResourceId, ResourceKey, ResourceState, StoreError, Version,
};
use uuid::Uuid;

/// One `lease_resources` row
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ResourceRow {
    collection_id: String,
    resource_id: String,
    status: String,
    holder_id: Option<String>,
    granted_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    allocation_id: Option<Uuid>,
    allocated_by: Option<String>,
    allocated_at: Option<DateTime<Utc>>,
    last_holder: Option<String>,
    version: i64,
}

fn required<T>(value: Option<T>, key: &ResourceKey, column: &str) -> Result<T, StoreError> {
    value.ok_or_else(|| StoreError::Corrupt(format!("{key}: {column} is null")))
}

impl TryFrom<ResourceRow> for Resource {
    type Error = StoreError;

    fn try_from(row: ResourceRow) -> Result<Self, Self::Error> {
        let key = ResourceKey::new(row.collection_id, row.resource_id);

        let state = match row.status.as_str() {
            "available" => ResourceState::Available,
            "held" => ResourceState::Held(HoldInfo {
                holder: HolderId::new(required(row.holder_id, &key, "holder_id")?),
                granted_at: required(row.granted_at, &key, "granted_at")?,
                expires_at: required(row.expires_at, &key, "expires_at")?,
            }),
            "allocated" => ResourceState::Allocated(AllocationMark {
                allocation_id: AllocationId::from_uuid(required(
                    row.allocation_id,
                    &key,
                    "allocation_id",
                )?),
                allocated_by: HolderId::new(required(row.allocated_by, &key, "allocated_by")?),
                allocated_at: required(row.allocated_at, &key, "allocated_at")?,
            }),
            other => {
                return Err(StoreError::Corrupt(format!("{key}: unknown status {other:?}")));
            }
        };

        Ok(Self {
            version: version_from_db(row.version)?,
            last_holder: row.last_holder.map(HolderId::new),
            state,
            key,
        })
    }
}

/// The state-dependent columns of a resource row, ready to bind
pub(crate) struct StateColumns<'a> {
    pub status: &'static str,
    pub holder_id: Option<&'a str>,
    pub granted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub allocation_id: Option<Uuid>,
    pub allocated_by: Option<&'a str>,
    pub allocated_at: Option<DateTime<Utc>>,
}

impl<'a> From<&'a ResourceState> for StateColumns<'a> {
    fn from(state: &'a ResourceState) -> Self {
        let empty = Self {
            status: state.status().as_str(),
            holder_id: None,
            granted_at: None,
            expires_at: None,
            allocation_id: None,
            allocated_by: None,
            allocated_at: None,
        };

        match state {
            ResourceState::Available => empty,
            ResourceState::Held(hold) => Self {
                holder_id: Some(hold.holder.as_str()),
                granted_at: Some(hold.granted_at),
                expires_at: Some(hold.expires_at),
                ..empty
            },
            ResourceState::Allocated(mark) => Self {
                allocation_id: Some(*mark.allocation_id.as_uuid()),
                allocated_by: Some(mark.allocated_by.as_str()),
                allocated_at: Some(mark.allocated_at),
                ..empty
            },
        }
    }
}

/// One `lease_allocations` row
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AllocationRow {
    allocation_id: Uuid,
    owner_id: String,
    collection_id: String,
    resource_ids: Vec<String>,
    status: String,
    created_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<AllocationRow> for Allocation {
    type Error = StoreError;

    fn try_from(row: AllocationRow) -> Result<Self, Self::Error> {
        let status = match row.status.as_str() {
            "active" => AllocationStatus::Active,
            "cancelled" => AllocationStatus::Cancelled,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "allocation {}: unknown status {other:?}",
                    row.allocation_id
                )));
            }
        };
        if row.resource_ids.is_empty() {
            return Err(StoreError::Corrupt(format!(
                "allocation {} has no resources",
                row.allocation_id
            )));
        }

        Ok(Self {
            id: AllocationId::from_uuid(row.allocation_id),
            owner: HolderId::new(row.owner_id),
            collection: CollectionId::new(row.collection_id),
            resources: row.resource_ids.into_iter().map(ResourceId::new).collect(),
            status,
            created_at: row.created_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

pub(crate) fn version_to_db(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value())
        .map_err(|_| StoreError::Corrupt(format!("version {version} exceeds BIGINT")))
}

fn version_from_db(version: i64) -> Result<Version, StoreError> {
    u64::try_from(version)
        .map(Version::new)
        .map_err(|_| StoreError::Corrupt(format!("negative version {version}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    fn held_row() -> ResourceRow {
        let now = Utc::now();
        ResourceRow {
            collection_id: "C1".to_string(),
            resource_id: "S1".to_string(),
            status: "held".to_string(),
            holder_id: Some("alice".to_string()),
            granted_at: Some(now),
            expires_at: Some(now + chrono::Duration::seconds(300)),
            allocation_id: None,
            allocated_by: None,
            allocated_at: None,
            last_holder: Some("alice".to_string()),
            version: 3,
        }
    }

    #[test]
    fn held_row_decodes_with_hold_metadata() {
        let resource = Resource::try_from(held_row()).unwrap();
        assert_eq!(resource.key, ResourceKey::new("C1", "S1"));
        assert_eq!(resource.version, Version::new(3));
        assert_eq!(
            resource.state.hold().map(|h| h.holder.as_str()),
            Some("alice")
        );

        let columns = StateColumns::from(&resource.state);
        assert_eq!(columns.status, "held");
        assert_eq!(columns.holder_id, Some("alice"));
        assert!(columns.allocation_id.is_none());
    }

    #[test]
    fn held_row_without_expiry_is_corrupt() {
        let row = ResourceRow {
            expires_at: None,
            ..held_row()
        };
        assert!(matches!(
            Resource::try_from(row),
            Err(StoreError::Corrupt(message)) if message.contains("expires_at")
        ));
    }

    #[test]
    fn unknown_status_and_negative_version_are_corrupt() {
        let row = ResourceRow {
            status: "reserved".to_string(),
            ..held_row()
        };
        assert!(Resource::try_from(row).is_err());

        let row = ResourceRow {
            version: -1,
            ..held_row()
        };
        assert!(Resource::try_from(row).is_err());
    }

    #[test]
    fn allocation_row_decodes() {
        let id = Uuid::new_v4();
        let allocation = Allocation::try_from(AllocationRow {
            allocation_id: id,
            owner_id: "alice".to_string(),
            collection_id: "C1".to_string(),
            resource_ids: vec!["S2".to_string(), "S1".to_string()],
            status: "cancelled".to_string(),
            created_at: Utc::now(),
            cancelled_at: Some(Utc::now()),
        })
        .unwrap();

        assert_eq!(allocation.id, AllocationId::from_uuid(id));
        assert_eq!(allocation.status, AllocationStatus::Cancelled);
        assert_eq!(
            allocation.resources.iter().next().map(ResourceId::as_str),
            Some("S1")
        );
    }
}

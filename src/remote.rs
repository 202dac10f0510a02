use crate::error::RemoteError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Data categories the backend exposes, one endpoint each.
///
/// Cache and sync keys are `"<category>_<owner>"`, e.g. `motors_u1`, or just
/// `"<category>"` for data shared by every user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataCategory {
    Motors,
    Reports,
    GasStations,
    Trips,
    Destinations,
    FuelLogs,
    Maintenance,
}

impl DataCategory {
    pub const ALL: [DataCategory; 7] = [
        DataCategory::Motors,
        DataCategory::Reports,
        DataCategory::GasStations,
        DataCategory::Trips,
        DataCategory::Destinations,
        DataCategory::FuelLogs,
        DataCategory::Maintenance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataCategory::Motors => "motors",
            DataCategory::Reports => "reports",
            DataCategory::GasStations => "gasStations",
            DataCategory::Trips => "trips",
            DataCategory::Destinations => "destinations",
            DataCategory::FuelLogs => "fuelLogs",
            DataCategory::Maintenance => "maintenance",
        }
    }

    /// REST path of the collection
    pub fn endpoint(self) -> &'static str {
        match self {
            DataCategory::Motors => "/api/motors",
            DataCategory::Reports => "/api/reports",
            DataCategory::GasStations => "/api/gas-stations",
            DataCategory::Trips => "/api/trips",
            DataCategory::Destinations => "/api/destinations",
            DataCategory::FuelLogs => "/api/fuel-logs",
            DataCategory::Maintenance => "/api/maintenance",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.as_str() == name)
    }

    /// Split a cache key into its category and optional owner.
    pub fn from_key(key: &str) -> Option<(Self, Option<&str>)> {
        match key.split_once('_') {
            Some((category, owner)) if !owner.is_empty() => {
                Self::parse(category).map(|category| (category, Some(owner)))
            }
            Some(_) => None,
            None => Self::parse(key).map(|category| (category, None)),
        }
    }

    /// Cache key for this category, scoped to an owner.
    pub fn key_for(self, owner_id: &str) -> String {
        format!("{}_{}", self.as_str(), owner_id)
    }
}

impl std::fmt::Display for DataCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative remote store.
///
/// Implementations must give up promptly once `cancel` fires; callers also
/// race every call against the token and a deadline.
#[async_trait::async_trait]
pub trait RemoteBackend: Send + Sync + 'static {
    /// Fetch the whole collection of a category for an owner
    async fn fetch_collection(
        &self,
        category: DataCategory,
        owner_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, RemoteError>;

    /// Create or replace a single item
    async fn upsert(
        &self,
        category: DataCategory,
        owner_id: &str,
        key: &str,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError>;
}

/// Run a remote call, giving up on cancellation or after `timeout`.
pub async fn with_deadline<T, F>(
    call: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RemoteError::Cancelled),
        outcome = tokio::time::timeout(timeout, call) => match outcome {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        },
    }
}

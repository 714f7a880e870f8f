use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use openeo_raster_datatypes::{TileAssignment, TileStage};
use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{self, Error};

type TileKey = (String, u32, u32, u32);

/// Transactional claim/release/submit/force-release over a shared tile
/// inventory. `claim` must pick its random candidate inside the same
/// transaction that checks availability, so that the uniqueness constraint
/// on `(service_id, x, y, z)` is what actually prevents double-assignment
/// under concurrent claimants, not a check-then-act race in the caller.
#[async_trait]
pub trait TileAssignmentStore: Send + Sync {
    async fn claim(
        &self,
        service_id: &str,
        user_id: &str,
        zoom: u32,
        x_range: (u32, u32),
        y_range: (u32, u32),
    ) -> Result<TileAssignment, Error>;

    async fn release(&self, service_id: &str, user_id: &str) -> Result<TileAssignment, Error>;

    async fn submit(&self, service_id: &str, user_id: &str) -> Result<TileAssignment, Error>;

    async fn force_release(&self, service_id: &str, x: u32, y: u32, z: u32) -> Result<(), Error>;

    async fn update(
        &self,
        service_id: &str,
        user_id: &str,
        data: Value,
    ) -> Result<TileAssignment, Error>;
}

/// In-process reference implementation, backed by a single mutex-guarded
/// map. A real deployment would back this with a SQL table carrying a
/// `UNIQUE(service_id, x, y, z)` constraint; this store enforces the same
/// invariant by construction (one map entry per key) under one lock instead.
#[derive(Default)]
pub struct InMemoryTileStore {
    rows: Mutex<HashMap<TileKey, TileAssignment>>,
}

impl InMemoryTileStore {
    pub fn new() -> Self {
        InMemoryTileStore {
            rows: Mutex::new(HashMap::new()),
        }
    }

    fn active_for_user<'a>(
        rows: &'a HashMap<TileKey, TileAssignment>,
        service_id: &str,
        user_id: &str,
    ) -> Option<&'a TileAssignment> {
        rows.values()
            .find(|row| row.service_id == service_id && row.user_id == user_id)
    }
}

#[async_trait]
impl TileAssignmentStore for InMemoryTileStore {
    async fn claim(
        &self,
        service_id: &str,
        user_id: &str,
        zoom: u32,
        x_range: (u32, u32),
        y_range: (u32, u32),
    ) -> Result<TileAssignment, Error> {
        let mut rows = self.rows.lock().await;

        if let Some(existing) = Self::active_for_user(&rows, service_id, user_id) {
            return Ok(existing.clone());
        }

        let assigned: std::collections::HashSet<(u32, u32)> = rows
            .values()
            .filter(|row| row.service_id == service_id && row.z == zoom)
            .map(|row| (row.x, row.y))
            .collect();

        let candidates: Vec<(u32, u32)> = (x_range.0..=x_range.1)
            .flat_map(|x| (y_range.0..=y_range.1).map(move |y| (x, y)))
            .filter(|coord| !assigned.contains(coord))
            .collect();

        let Some(&(x, y)) = candidates.choose(&mut rand::thread_rng()) else {
            return error::NoTileAvailable.fail();
        };

        let assignment = TileAssignment::new(service_id, user_id, x, y, zoom, Utc::now());
        rows.insert(assignment.key(), assignment.clone());
        Ok(assignment)
    }

    async fn release(&self, service_id: &str, user_id: &str) -> Result<TileAssignment, Error> {
        let mut rows = self.rows.lock().await;
        let Some(existing) = Self::active_for_user(&rows, service_id, user_id).cloned() else {
            return error::TileNotAssigned {
                service_id,
                user_id,
            }
            .fail();
        };
        if existing.stage == TileStage::Submitted {
            return error::TileAlreadyLocked {
                x: existing.x,
                y: existing.y,
                z: existing.z,
            }
            .fail();
        }
        rows.remove(&existing.key());
        Ok(TileAssignment {
            stage: TileStage::Released,
            ..existing
        })
    }

    async fn submit(&self, service_id: &str, user_id: &str) -> Result<TileAssignment, Error> {
        let mut rows = self.rows.lock().await;
        let Some(existing) = Self::active_for_user(&rows, service_id, user_id).cloned() else {
            return error::TileNotAssigned {
                service_id,
                user_id,
            }
            .fail();
        };
        let mut updated = existing.clone();
        updated.stage = TileStage::Submitted;
        rows.insert(updated.key(), updated.clone());
        Ok(updated)
    }

    async fn force_release(&self, service_id: &str, x: u32, y: u32, z: u32) -> Result<(), Error> {
        let mut rows = self.rows.lock().await;
        rows.retain(|_, row| !(row.service_id == service_id && row.x == x && row.y == y && row.z == z));
        Ok(())
    }

    async fn update(
        &self,
        service_id: &str,
        user_id: &str,
        data: Value,
    ) -> Result<TileAssignment, Error> {
        let mut rows = self.rows.lock().await;
        let Some(existing) = Self::active_for_user(&rows, service_id, user_id).cloned() else {
            return error::TileNotAssigned {
                service_id,
                user_id,
            }
            .fail();
        };
        let mut updated = existing.clone();
        updated.data = Some(data);
        rows.insert(updated.key(), updated.clone());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_is_idempotent_for_same_user() {
        let store = InMemoryTileStore::new();
        let first = store
            .claim("svc", "alice", 7, (0, 1), (0, 1))
            .await
            .unwrap();
        let second = store
            .claim("svc", "alice", 7, (0, 1), (0, 1))
            .await
            .unwrap();
        assert_eq!(first.key(), second.key());
    }

    #[tokio::test]
    async fn claim_exhausts_the_range() {
        let store = InMemoryTileStore::new();
        let users = ["a", "b", "c", "d", "e"];
        let mut successes = 0;
        let mut failures = 0;
        for user in users {
            match store.claim("svc", user, 7, (0, 1), (0, 1)).await {
                Ok(_) => successes += 1,
                Err(Error::NoTileAvailable) => failures += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 4);
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn submit_then_release_is_locked() {
        let store = InMemoryTileStore::new();
        store.claim("svc", "alice", 1, (0, 0), (0, 0)).await.unwrap();
        store.submit("svc", "alice").await.unwrap();
        let result = store.release("svc", "alice").await;
        assert!(matches!(result, Err(Error::TileAlreadyLocked { .. })));
    }

    #[tokio::test]
    async fn release_without_claim_fails() {
        let store = InMemoryTileStore::new();
        let result = store.release("svc", "nobody").await;
        assert!(matches!(result, Err(Error::TileNotAssigned { .. })));
    }

    #[tokio::test]
    async fn force_release_always_succeeds() {
        let store = InMemoryTileStore::new();
        store.claim("svc", "alice", 1, (0, 0), (0, 0)).await.unwrap();
        assert!(store.force_release("svc", 0, 0, 1).await.is_ok());
        assert!(store.force_release("svc", 9, 9, 9).await.is_ok());
    }
}

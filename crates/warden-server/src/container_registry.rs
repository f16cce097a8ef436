// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container Registry
//!
//! Maps handles to live containers. A container is inserted once its create
//! sequence succeeds and removed at the start of its destroy sequence, so
//! lookups only ever see Active or Stopped containers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::container::Container;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct ContainerRegistry {
    containers: Mutex<HashMap<String, Arc<Container>>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a container under its handle.
    pub async fn register(&self, container: Arc<Container>) -> Result<()> {
        let mut containers = self.containers.lock().await;
        let handle = container.handle().to_string();
        if containers.contains_key(&handle) {
            return Err(Error::HandleTaken(handle));
        }
        containers.insert(handle, container);
        Ok(())
    }

    /// Remove this container. A different container registered under the
    /// same handle is left alone.
    pub async fn unregister(&self, container: &Arc<Container>) -> bool {
        let mut containers = self.containers.lock().await;
        match containers.get(container.handle()) {
            Some(registered) if Arc::ptr_eq(registered, container) => {
                containers.remove(container.handle());
                true
            }
            _ => false,
        }
    }

    pub async fn find(&self, handle: &str) -> Result<Arc<Container>> {
        self.containers
            .lock()
            .await
            .get(handle)
            .cloned()
            .ok_or_else(|| Error::UnknownHandle(handle.to_string()))
    }

    pub async fn contains(&self, handle: &str) -> bool {
        self.containers.lock().await.contains_key(handle)
    }

    /// Sorted handles of every registered container.
    pub async fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.containers.lock().await.keys().cloned().collect();
        handles.sort();
        handles
    }

    /// Snapshot of every registered container.
    pub async fn all(&self) -> Vec<Arc<Container>> {
        self.containers.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.containers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.containers.lock().await.is_empty()
    }
}

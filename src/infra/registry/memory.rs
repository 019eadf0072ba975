//! In-memory registry used for development and tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{ExternalRegistry, RemoteReservation, RemoteResource, SchedulerError};

/// Registry double whose health can be toggled.
///
/// While unhealthy every call fails with [`SchedulerError::RegistryUnavailable`]
/// and the health check reports false. Successful creates and deletes are
/// counted.
#[derive(Debug)]
pub struct InMemoryRegistry {
    endpoint: String,
    resources: Mutex<Vec<RemoteResource>>,
    healthy: AtomicBool,
    latency: Mutex<Option<Duration>>,
    delete_latency: Mutex<Option<Duration>>,
    creates: AtomicUsize,
    deletes: AtomicUsize,
}

impl InMemoryRegistry {
    /// Create an empty, healthy registry.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            resources: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
            latency: Mutex::new(None),
            delete_latency: Mutex::new(None),
            creates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Add or replace a remote resource with no reservation.
    pub fn add(&self, self_link: &str, name: &str, labels: &[&str]) {
        let mut resources = self.resources.lock();
        resources.retain(|r| r.self_link != self_link);
        resources.push(RemoteResource {
            self_link: self_link.to_string(),
            name: name.to_string(),
            description: String::new(),
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
            active_reservation: None,
        });
    }

    /// Remove a remote resource.
    pub fn remove(&self, self_link: &str) {
        self.resources.lock().retain(|r| r.self_link != self_link);
    }

    /// Set the reservation on a remote resource directly.
    pub fn set_reservation(&self, self_link: &str, reservation: Option<RemoteReservation>) {
        if let Some(r) = self.resources.lock().iter_mut().find(|r| r.self_link == self_link) {
            r.active_reservation = reservation;
        }
    }

    /// Current reservation on a remote resource.
    pub fn reservation(&self, self_link: &str) -> Option<RemoteReservation> {
        self.resources
            .lock()
            .iter()
            .find(|r| r.self_link == self_link)
            .and_then(|r| r.active_reservation.clone())
    }

    /// Toggle health.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Delay reservation deletes by `latency`, on top of any call latency.
    pub fn set_delete_latency(&self, latency: Option<Duration>) {
        *self.delete_latency.lock() = latency;
    }

    /// Successful reservation creates.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Successful reservation deletes.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), SchedulerError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SchedulerError::RegistryUnavailable(format!(
                "{} is not reachable",
                self.endpoint
            )))
        }
    }

    fn unknown(self_link: &str) -> SchedulerError {
        SchedulerError::RegistryUnavailable(format!("no remote resource at {self_link}"))
    }
}

#[async_trait]
impl ExternalRegistry for InMemoryRegistry {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn list_resources(&self) -> Result<Vec<RemoteResource>, SchedulerError> {
        self.enter().await?;
        Ok(self.resources.lock().clone())
    }

    async fn create_reservation(
        &self,
        resource_ref: &str,
        owner: &str,
        build_ref: Option<&str>,
        _indefinite: bool,
    ) -> Result<(), SchedulerError> {
        self.enter().await?;
        let mut resources = self.resources.lock();
        let remote = resources
            .iter_mut()
            .find(|r| r.self_link == resource_ref)
            .ok_or_else(|| Self::unknown(resource_ref))?;
        remote.active_reservation = Some(RemoteReservation {
            owner: Some(owner.to_string()),
            build_ref: build_ref.map(str::to_string),
        });
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_reservation(&self, resource_ref: &str) -> Result<(), SchedulerError> {
        let slow = *self.delete_latency.lock();
        if let Some(slow) = slow {
            tokio::time::sleep(slow).await;
        }
        self.enter().await?;
        let mut resources = self.resources.lock();
        let remote = resources
            .iter_mut()
            .find(|r| r.self_link == resource_ref)
            .ok_or_else(|| Self::unknown(resource_ref))?;
        remote.active_reservation = None;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.enter().await.is_ok()
    }
}

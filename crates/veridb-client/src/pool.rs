// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process-wide connection pool with random assignment and an idle reaper.
//!
//! Channels are created lazily per address. A fresh connection enters its
//! list with `ref_count = 0`; only shared handouts of an already-full list
//! increment the count. The reaper retires connections that stayed at zero
//! references past the idle timeout.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_connections_per_server: usize,
    pub idle_check_interval: Duration,
    pub terminate_idle_timeout: Duration,
    pub connection_shutdown_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections_per_server: 4,
            idle_check_interval: Duration::from_secs(10),
            terminate_idle_timeout: Duration::from_secs(60),
            connection_shutdown_timeout: Duration::from_secs(2),
        }
    }
}

/// One lazily-connected gRPC channel to a server address.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    address: String,
    channel: Channel,
}

impl Connection {
    fn open(id: u64, address: String) -> Result<Self> {
        let endpoint = Endpoint::from_shared(address.clone())
            .map_err(|err| Error::invalid_operation(format!("invalid server address: {err}")))?;
        Ok(Self {
            id,
            address,
            channel: endpoint.connect_lazy(),
        })
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

struct PoolItem {
    connection: Arc<Connection>,
    ref_count: i32,
    last_change: Instant,
}

pub struct ConnectionPool {
    options: PoolOptions,
    table: Mutex<HashMap<String, Vec<PoolItem>>>,
    next_id: AtomicU64,
    reaper: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

static GLOBAL_POOL: OnceLock<Arc<ConnectionPool>> = OnceLock::new();

impl ConnectionPool {
    #[must_use]
    pub fn new(options: PoolOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            table: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            reaper: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// Lazily constructed default pool shared by clients that do not inject
    /// their own.
    #[must_use]
    pub fn global() -> Arc<Self> {
        GLOBAL_POOL
            .get_or_init(|| Self::new(PoolOptions::default()))
            .clone()
    }

    pub async fn acquire(self: &Arc<Self>, address: &str) -> Result<Arc<Connection>> {
        self.ensure_reaper();

        let mut table = self.table.lock();
        let list = table.entry(address.to_string()).or_default();

        if list.len() < self.options.max_connections_per_server.max(1) {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let connection = Arc::new(Connection::open(id, address.to_string())?);
            list.push(PoolItem {
                connection: connection.clone(),
                ref_count: 0,
                last_change: Instant::now(),
            });
            tracing::debug!(id, %address, pool_size = list.len(), "created pooled connection");
            return Ok(connection);
        }

        let index = rand::thread_rng().gen_range(0..list.len());
        let item = &mut list[index];
        item.ref_count += 1;
        item.last_change = Instant::now();
        tracing::debug!(
            id = item.connection.id,
            %address,
            ref_count = item.ref_count,
            "assigned shared connection"
        );
        Ok(item.connection.clone())
    }

    pub fn release(&self, connection: &Arc<Connection>) {
        let mut table = self.table.lock();
        if let Some(list) = table.get_mut(connection.address()) {
            if let Some(item) = list
                .iter_mut()
                .find(|item| Arc::ptr_eq(&item.connection, connection) && item.ref_count > 0)
            {
                item.ref_count -= 1;
                item.last_change = Instant::now();
            }
        }
    }

    /// Number of pooled channels for an address.
    #[must_use]
    pub fn live_connections(&self, address: &str) -> usize {
        self.table.lock().get(address).map_or(0, Vec::len)
    }

    fn ensure_reaper(self: &Arc<Self>) {
        let mut guard = self.reaper.lock();
        if guard.is_some() || self.shutdown.is_cancelled() {
            return;
        }
        let weak = Arc::downgrade(self);
        let token = self.shutdown.clone();
        let interval = self.options.idle_check_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(pool) = weak.upgrade() else { break };
                        pool.reap_idle();
                    }
                }
            }
            tracing::debug!("connection reaper stopped");
        }));
    }

    fn reap_idle(&self) {
        let timeout = self.options.terminate_idle_timeout;
        let now = Instant::now();
        let mut retired = Vec::new();
        {
            let mut table = self.table.lock();
            for list in table.values_mut() {
                let mut kept = Vec::with_capacity(list.len());
                for item in list.drain(..) {
                    if item.ref_count == 0 && now.duration_since(item.last_change) >= timeout {
                        retired.push(item.connection);
                    } else {
                        kept.push(item);
                    }
                }
                *list = kept;
            }
            table.retain(|_, list| !list.is_empty());
        }
        // Channel teardown happens outside the table lock.
        for connection in retired {
            tracing::debug!(
                id = connection.id,
                address = %connection.address,
                "retiring idle connection"
            );
        }
    }

    /// Stops the reaper, waits for it to exit, then drops every pooled
    /// channel and clears the table.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.reaper.lock().take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(self.options.connection_shutdown_timeout, handle).await;
        }
        let drained: Vec<Arc<Connection>> = {
            let mut table = self.table.lock();
            table
                .drain()
                .flat_map(|(_, list)| list.into_iter().map(|item| item.connection))
                .collect()
        };
        tracing::debug!(count = drained.len(), "pool shut down");
    }

    /// Non-suspending shutdown: cancels the reaper without joining it and
    /// clears the table.
    pub fn shutdown_now(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }
        self.table.lock().clear();
    }
}

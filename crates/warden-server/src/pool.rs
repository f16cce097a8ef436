// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded resource pools for networks, uids and host ports.
//!
//! A pool hands out values from the head of an ordered queue and takes them
//! back at the tail. Released values carry a timestamp and are not handed out
//! again until the pool's release delay has passed.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Ring-buffer allocator over a fixed set of values.
#[derive(Debug)]
pub struct Pool<T> {
    name: &'static str,
    available: VecDeque<(T, Option<Instant>)>,
    in_use: HashSet<T>,
    release_delay: Duration,
}

impl<T: Clone + Eq + Hash + fmt::Debug> Pool<T> {
    pub fn new(name: &'static str, values: impl IntoIterator<Item = T>, release_delay: Duration) -> Self {
        Self {
            name,
            available: values.into_iter().map(|v| (v, None)).collect(),
            in_use: HashSet::new(),
            release_delay,
        }
    }

    fn cooled_down(&self, released_at: Option<Instant>) -> bool {
        released_at.is_none_or(|at| at.elapsed() >= self.release_delay)
    }

    /// Take the value at the head of the queue.
    pub fn acquire(&mut self) -> Result<T> {
        match self.available.front() {
            Some((_, released_at)) if self.cooled_down(*released_at) => {}
            _ => return Err(Error::ResourceExhausted(self.name)),
        }
        let (value, _) = self
            .available
            .pop_front()
            .ok_or(Error::ResourceExhausted(self.name))?;
        self.in_use.insert(value.clone());
        debug!(pool = self.name, value = ?value, "acquired");
        Ok(value)
    }

    /// Take a particular value out of the queue.
    pub fn acquire_specific(&mut self, value: &T) -> Result<T> {
        let position = self
            .available
            .iter()
            .position(|(v, released_at)| v == value && self.cooled_down(*released_at))
            .ok_or(Error::ResourceExhausted(self.name))?;
        let (value, _) = self
            .available
            .remove(position)
            .ok_or(Error::ResourceExhausted(self.name))?;
        self.in_use.insert(value.clone());
        debug!(pool = self.name, value = ?value, "acquired");
        Ok(value)
    }

    /// Return a value to the tail of the queue.
    ///
    /// Returns false (and does nothing) for a value that is not checked out.
    pub fn release(&mut self, value: T) -> bool {
        if !self.in_use.remove(&value) {
            warn!(pool = self.name, value = ?value, "release of value not in use");
            return false;
        }
        debug!(pool = self.name, value = ?value, "released");
        self.available.push_back((value, Some(Instant::now())));
        true
    }

    pub fn capacity(&self) -> usize {
        self.available.len() + self.in_use.len()
    }

    pub fn available(&self) -> usize {
        self.available.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }
}

/// A /30 subnet: network address, host side, container side, broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Network(Ipv4Addr);

impl Network {
    pub fn new(base: Ipv4Addr) -> Self {
        Self(Ipv4Addr::from(u32::from(base) & !3))
    }

    pub fn base(&self) -> Ipv4Addr {
        self.0
    }

    pub fn host_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.0) + 1)
    }

    pub fn container_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.0) + 2)
    }

    /// Container handle derived from the network address.
    pub fn handle(&self) -> String {
        format!("{:08x}", u32::from(self.0))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/30", self.0)
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let addr = s.strip_suffix("/30").unwrap_or(s);
        addr.parse::<Ipv4Addr>()
            .map(Network::new)
            .map_err(|_| Error::InvalidRequest(format!("invalid network: {s}")))
    }
}

/// The daemon's pools.
#[derive(Debug)]
pub struct Pools {
    pub network: Pool<Network>,
    pub uid: Pool<u32>,
    pub port: Pool<u16>,
}

impl Pools {
    pub fn from_config(config: &Config) -> Self {
        let start = u32::from(config.network_pool_start);
        let networks = (0..config.network_pool_size)
            .map(|i| Network::new(Ipv4Addr::from(start + 4 * i)));
        let uids = config.uid_pool_start..config.uid_pool_start + config.uid_pool_size;
        let ports = (0..config.port_pool_size)
            .filter_map(|i| config.port_pool_start.checked_add(i));

        Self {
            network: Pool::new("network", networks, config.network_release_delay),
            uid: Pool::new("uid", uids, Duration::ZERO),
            port: Pool::new("port", ports, Duration::ZERO),
        }
    }
}

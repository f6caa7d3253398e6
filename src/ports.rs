//! Free TCP port discovery.
//!
//! A port is considered available when a listener can be bound to it on the
//! loopback interface. The listener is dropped immediately, so there is a short
//! window in which another process could take the port before the child binds
//! it; startup retries once on a different port to cover that.

use crate::error::PortError;
use std::collections::BTreeSet;
use std::io;
use std::net::{Ipv4Addr, TcpListener};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
    excluded: BTreeSet<u16>,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, PortError> {
        if start > end {
            return Err(PortError::InvalidRange { start, end });
        }
        Ok(Self {
            start,
            end,
            excluded: BTreeSet::new(),
        })
    }

    pub fn excluding(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.excluded.extend(ports);
        self
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn is_excluded(&self, port: u16) -> bool {
        self.excluded.contains(&port)
    }

    /// Ports in ascending order, excluded ones removed.
    pub fn candidates(&self) -> impl Iterator<Item = u16> + '_ {
        (self.start..=self.end).filter(|p| !self.excluded.contains(p))
    }
}

/// Checks whether a single port can be bound right now.
pub trait PortProbe: Send + Sync {
    fn try_bind(&self, port: u16) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpPortProbe;

impl PortProbe for TcpPortProbe {
    fn try_bind(&self, port: u16) -> io::Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        drop(listener);
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct PortAllocator<P = TcpPortProbe> {
    probe: P,
}

impl PortAllocator<TcpPortProbe> {
    pub fn new() -> Self {
        Self {
            probe: TcpPortProbe,
        }
    }
}

impl<P: PortProbe> PortAllocator<P> {
    pub fn with_probe(probe: P) -> Self {
        Self { probe }
    }

    /// Lowest port in `range` that is neither excluded nor in use.
    pub fn scan(&self, range: &PortRange) -> Result<u16, PortError> {
        for port in range.candidates() {
            match self.probe.try_bind(port) {
                Ok(()) => {
                    trace!("port {port} is available");
                    return Ok(port);
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    debug!("port {port} is in use");
                }
                Err(e) => {
                    warn!("could not probe port {port}: {e}");
                }
            }
        }
        Err(PortError::Exhausted {
            start: range.start,
            end: range.end,
        })
    }
}

impl<P: PortProbe + Clone + 'static> PortAllocator<P> {
    pub async fn find_available_port(&self, range: &PortRange) -> Result<u16, PortError> {
        let this = self.clone();
        let owned = range.clone();
        match tokio::task::spawn_blocking(move || this.scan(&owned)).await {
            Ok(result) => result,
            Err(e) => {
                warn!("port scan task failed, scanning inline: {e}");
                self.scan(range)
            }
        }
    }
}

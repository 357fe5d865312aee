// ABOUTME: Endpoint allocation for newly registered providers.
// ABOUTME: Bounded-retry random port selection, or random socket identifiers.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of candidate ports drawn before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Number of ports handed out above the broker's own port.
pub const DEFAULT_RANGE_LEN: u16 = 1000;

/// Transport address assigned to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    /// TCP port on the broker host.
    Port(u16),
    /// Opaque identifier naming a per-provider local socket.
    Socket(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Port(port) => write!(f, "port {}", port),
            Endpoint::Socket(id) => write!(f, "socket {}", id),
        }
    }
}

/// Errors from endpoint allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Every candidate drawn collided with a port in use.
    #[error("failed to find open port for provider gRPC server after {attempts} attempts")]
    Exhausted { attempts: usize },

    /// The configured port range is empty or runs past 65535.
    #[error("invalid port range: {len} ports starting at {start}")]
    InvalidRange { start: u16, len: u32 },
}

/// Contiguous range of ports `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    len: u32,
}

impl PortRange {
    /// Range of `len` ports starting at `start`.
    pub fn new(start: u16, len: u32) -> Result<Self, AllocationError> {
        if len == 0 || u32::from(start) + len > u32::from(u16::MAX) + 1 {
            return Err(AllocationError::InvalidRange { start, len });
        }
        Ok(Self { start, len })
    }

    /// The default range: 1000 ports starting just above `listen_port`,
    /// truncated at 65535.
    pub fn above(listen_port: u16) -> Result<Self, AllocationError> {
        Self::after(listen_port, u32::from(DEFAULT_RANGE_LEN))
    }

    /// Up to `len` ports starting just above `listen_port`, truncated at 65535.
    pub fn after(listen_port: u16, len: u32) -> Result<Self, AllocationError> {
        let start = listen_port
            .checked_add(1)
            .ok_or(AllocationError::InvalidRange {
                start: listen_port,
                len,
            })?;
        let room = u32::from(u16::MAX) - u32::from(start) + 1;
        Self::new(start, room.min(len))
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && u32::from(port) < u32::from(self.start) + self.len
    }

    fn sample(&self, rng: &mut StdRng) -> u16 {
        let offset = rng.gen_range(0..self.len);
        // start + offset < 65536 by construction
        (u32::from(self.start) + offset) as u16
    }
}

/// Which kind of endpoint a deployment hands out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationKind {
    #[default]
    Port,
    Socket,
}

#[derive(Debug, Clone)]
enum Strategy {
    PortRange {
        range: PortRange,
        max_attempts: usize,
    },
    Identifier,
}

/// Produces endpoints for new registrations.
///
/// Not synchronized: the registry owns it and calls it inside its own
/// critical section, together with the conflict scan.
#[derive(Debug, Clone)]
pub struct EndpointAllocator {
    strategy: Strategy,
    rng: StdRng,
}

impl EndpointAllocator {
    /// Random ports from `range`, seeded from OS entropy.
    pub fn port_range(range: PortRange) -> Self {
        Self {
            strategy: Strategy::PortRange {
                range,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            },
            rng: StdRng::from_entropy(),
        }
    }

    /// Random socket identifiers, seeded from OS entropy.
    pub fn identifier() -> Self {
        Self {
            strategy: Strategy::Identifier,
            rng: StdRng::from_entropy(),
        }
    }

    /// Replace the random source with a deterministic one.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Change the attempt cap of the port strategy. No effect on identifiers.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        if let Strategy::PortRange { max_attempts, .. } = &mut self.strategy {
            *max_attempts = attempts;
        }
        self
    }

    /// Which kind of endpoint this allocator produces.
    pub fn kind(&self) -> AllocationKind {
        match self.strategy {
            Strategy::PortRange { .. } => AllocationKind::Port,
            Strategy::Identifier => AllocationKind::Socket,
        }
    }

    /// Produce a new endpoint.
    ///
    /// `port_in_use` is consulted for every candidate port; identifiers are
    /// never checked for collisions.
    pub fn allocate<F>(&mut self, port_in_use: F) -> Result<Endpoint, AllocationError>
    where
        F: Fn(u16) -> bool,
    {
        match &self.strategy {
            Strategy::PortRange {
                range,
                max_attempts,
            } => {
                for attempt in 1..=*max_attempts {
                    let candidate = range.sample(&mut self.rng);
                    if !port_in_use(candidate) {
                        return Ok(Endpoint::Port(candidate));
                    }
                    tracing::debug!(port = candidate, attempt, "Port already assigned, redrawing");
                }
                Err(AllocationError::Exhausted {
                    attempts: *max_attempts,
                })
            }
            Strategy::Identifier => {
                let bytes: [u8; 16] = self.rng.gen();
                let id = uuid::Builder::from_random_bytes(bytes).into_uuid();
                Ok(Endpoint::Socket(id.hyphenated().to_string()))
            }
        }
    }
}

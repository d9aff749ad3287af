//! Centralized configuration for the connection layer
//!
//! Per-concern configuration structs with validated defaults, consolidated
//! into a master [`ClientConfig`].

use core::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Registry Configuration
// ----------------------------------------------------------------------------

/// Capacities of the two connection lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum connections to configured servers
    pub server_capacity: usize,
    /// Maximum connections to/from other peers
    pub peer_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            server_capacity: 4,
            peer_capacity: 8,
        }
    }
}

impl RegistryConfig {
    /// Configuration for constrained targets
    pub fn constrained() -> Self {
        Self {
            server_capacity: 2,
            peer_capacity: 2,
        }
    }
}

// ----------------------------------------------------------------------------
// Step Timer Configuration
// ----------------------------------------------------------------------------

/// Bounds on the protocol-engine step interval.
///
/// The engine requests its own next wakeup; the dispatcher clamps it into
/// `[min_interval, max_interval]` so device-management traffic cannot stall
/// indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
        }
    }
}

impl StepConfig {
    /// Fast intervals for tests
    pub fn testing() -> Self {
        Self {
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(100),
        }
    }
}

// ----------------------------------------------------------------------------
// Security Configuration
// ----------------------------------------------------------------------------

/// Limits and defaults for security instances and derived contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Maximum security instances across both tables
    pub max_instances: usize,
    /// Size of the derived-context pool
    pub max_contexts: usize,
    /// Maximum length of any key-material field
    pub max_key_len: usize,
    /// Port assumed when an instance URI carries none
    pub default_port: u16,
    /// Port assumed for bootstrap instances whose URI carries none
    pub bootstrap_port: u16,
    /// Bound on the handshake wait during outbound connect
    pub handshake_timeout: Duration,
    /// First credential tag handed out by the lifecycle manager
    pub credential_tag_base: u16,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_instances: 8,
            max_contexts: 4,
            max_key_len: 32,
            default_port: 5683,
            bootstrap_port: 5783,
            handshake_timeout: Duration::from_secs(1),
            credential_tag_base: 10,
        }
    }
}

// ----------------------------------------------------------------------------
// Queue and Request Configuration
// ----------------------------------------------------------------------------

/// Event queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Buffer size of the dispatcher event queue
    pub event_buffer: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { event_buffer: 32 }
    }
}

/// Argument-size caps for peer requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Maximum accepted host URI length in bytes
    pub max_uri_len: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { max_uri_len: 256 }
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Master configuration for the connection layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    pub registry: RegistryConfig,
    pub step: StepConfig,
    pub security: SecurityConfig,
    pub queue: QueueConfig,
    pub requests: RequestConfig,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration tuned for tests: tiny pools, fast timers.
    pub fn testing() -> Self {
        Self {
            registry: RegistryConfig {
                server_capacity: 2,
                peer_capacity: 2,
            },
            step: StepConfig::testing(),
            security: SecurityConfig {
                max_instances: 4,
                max_contexts: 2,
                handshake_timeout: Duration::from_millis(50),
                ..SecurityConfig::default()
            },
            queue: QueueConfig { event_buffer: 8 },
            requests: RequestConfig::default(),
        }
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> core::result::Result<(), String> {
        if self.registry.server_capacity == 0 {
            return Err("server connection capacity cannot be zero".into());
        }
        if self.registry.peer_capacity == 0 {
            return Err("peer connection capacity cannot be zero".into());
        }
        if self.step.min_interval.is_zero() {
            return Err("minimum step interval cannot be zero".into());
        }
        if self.step.min_interval > self.step.max_interval {
            return Err("minimum step interval cannot exceed maximum".into());
        }
        if self.security.max_instances == 0 {
            return Err("instance pool capacity cannot be zero".into());
        }
        if self.security.max_contexts == 0 {
            return Err("context pool capacity cannot be zero".into());
        }
        if self.queue.event_buffer == 0 {
            return Err("event buffer cannot be zero".into());
        }
        Ok(())
    }
}

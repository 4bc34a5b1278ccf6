//! CAPABILITIES parsing (RFC 3977 Section 5.2)
//!
//! The outbound handshake reads the peer's capability list to decide which
//! submode to negotiate. `POSTIHAVESTREAMING` marks a same-family overlay
//! node; such peers stream but are never scraped in reader mode.

use std::collections::HashMap;

/// Capability token advertised by same-family overlay nodes
pub const SAME_FAMILY_TOKEN: &str = "POSTIHAVESTREAMING";

/// Capabilities supported by a remote peer
#[must_use]
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Map of capability name to its arguments
    capabilities: HashMap<String, Vec<String>>,
}

impl Capabilities {
    /// Create an empty Capabilities instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse capabilities from the dotted multiline reply
    ///
    /// Each line is `CAPABILITY [arg1 arg2 ...]`.
    pub fn parse(lines: &[String]) -> Self {
        let mut capabilities = HashMap::new();

        for line in lines {
            let mut parts = line.split_whitespace();
            let Some(capability) = parts.next() else {
                continue;
            };
            let args: Vec<String> = parts.map(|s| s.to_string()).collect();
            capabilities.insert(capability.to_uppercase(), args);
        }

        Self { capabilities }
    }

    /// Check if a capability is supported
    #[must_use]
    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.contains_key(&capability.to_uppercase())
    }

    /// True if the peer accepts CHECK/TAKETHIS streaming
    pub fn supports_streaming(&self) -> bool {
        self.has("STREAMING") || self.has(SAME_FAMILY_TOKEN)
    }

    /// True if the peer offers reader commands
    ///
    /// A same-family peer forces this off: those nodes advertise reader
    /// commands but expect backfill to flow over streaming instead.
    pub fn supports_reader(&self) -> bool {
        if self.is_same_family() {
            return false;
        }
        self.has("MODE-READER") || self.has("READER")
    }

    /// True if the peer is a same-family overlay node
    pub fn is_same_family(&self) -> bool {
        self.has(SAME_FAMILY_TOKEN)
    }
}

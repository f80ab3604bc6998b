//! Domain primitives: Chain, Address, BlockNumber.

use serde::{Deserialize, Serialize};

/// Block height on a single chain.
pub type BlockNumber = u64;

/// Chain slug (e.g., "ethereum", "arbitrum").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Chain(pub String);

impl Chain {
    /// Create a Chain from a slug.
    pub fn new(slug: impl Into<String>) -> Self {
        Chain(slug.into())
    }

    /// Get the slug as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract or wallet address, stored lowercase with a `0x` prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Create an Address, normalizing to lowercase.
    pub fn new(addr: impl Into<String>) -> Self {
        Address(addr.into().to_ascii_lowercase())
    }

    /// Build an address from the 20 raw bytes.
    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        Address(format!("0x{}", hex::encode(bytes)))
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a `0x`-prefixed (or bare) hex quantity into a u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_lowercased() {
        let addr = Address::new("0xC36442b4a4522E871399CD717aBDD847Ab11FE88");
        assert_eq!(addr.as_str(), "0xc36442b4a4522e871399cd717abdd847ab11fe88");
    }

    #[test]
    fn test_address_from_bytes() {
        let mut bytes = [0u8; 20];
        bytes[19] = 0xab;
        let addr = Address::from_bytes(&bytes);
        assert_eq!(addr.as_str(), "0x00000000000000000000000000000000000000ab");
    }

    #[test]
    fn test_chain_display() {
        assert_eq!(Chain::new("arbitrum").to_string(), "arbitrum");
    }

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x1"), Some(1));
        assert_eq!(parse_hex_u64("0xff"), Some(255));
        assert_eq!(parse_hex_u64("1234"), Some(0x1234));
        assert_eq!(parse_hex_u64("0x"), Some(0));
        assert_eq!(parse_hex_u64("0xzz"), None);
    }
}

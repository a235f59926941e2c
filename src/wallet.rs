//! Wallet identifier checks applied to the worklist.

use regex::Regex;
use std::sync::LazyLock;

/// Identifiers become artifact file stems, so only path-safe characters pass
static SAFE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid regex pattern"));

/// Bech32 wallet address on a MultiversX-style chain
static BECH32_WALLET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^erd1[qpzry9x8gf2tvdw0s3jn54khce6mua7l]{58}$").expect("Invalid regex pattern")
});

/// Whether `id` can safely name an artifact file
pub fn is_safe_identifier(id: &str) -> bool {
    SAFE_IDENTIFIER.is_match(id)
}

pub fn is_bech32_wallet(id: &str) -> bool {
    BECH32_WALLET.is_match(id)
}

/// System and smart contract addresses share a long run of zero bits,
/// rendered as a `qqq...` run right after the human-readable part.
pub fn is_reserved(id: &str, reserved_prefix: &str) -> bool {
    !reserved_prefix.is_empty() && id.starts_with(reserved_prefix)
}

//! Strict address parsing used wherever untrusted strings may or may not be addresses.

use alloy::primitives::Address;

use super::constants::NULL_ADDRESS;

/// Parses `value` as a 20-byte hex address with a `0x` prefix.
///
/// Case is ignored (no checksum enforcement) since explorer APIs and users hand out
/// lowercase addresses. Anything else, including empty strings, is `None`.
pub fn parse_address(value: &str) -> Option<Address> {
    let value = value.trim();
    let hex_part = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    value.parse::<Address>().ok()
}

/// Like [`parse_address`], but also rejects the null address.
pub fn parse_non_null_address(value: &str) -> Option<Address> {
    parse_address(value).filter(|address| *address != NULL_ADDRESS)
}

/// Lowercase `0x` form, used for cache keys and identicon seeds.
pub fn lowercase_hex(address: &Address) -> String {
    format!("{address:#x}")
}

//! Remote Serial Protocol framing: `$payload#xx` packets with a two-digit
//! modular checksum, `+`/`-` acknowledgements, and the hex encodings the
//! commands traffic in.

/// Modular 8-bit sum of the payload bytes.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Wrap a payload in RSP framing.
pub fn encode_packet(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + 4);
    packet.push(b'$');
    packet.extend_from_slice(payload);
    packet.push(b'#');
    packet.extend_from_slice(format!("{:02x}", checksum(payload)).as_bytes());
    packet
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

/// Two ASCII hex digits to one byte.
pub fn parse_hex_byte(hi: u8, lo: u8) -> Option<u8> {
    Some(hex_value(hi)? << 4 | hex_value(lo)?)
}

/// Lowercase hex encoding of a byte string.
pub fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decode a full hex string; fails on odd length or non-hex characters.
pub fn hex_decode(text: &str) -> Option<Vec<u8>> {
    let bytes = text.as_bytes();
    if bytes.len() % 2 != 0 {
        return None;
    }
    bytes
        .chunks_exact(2)
        .map(|pair| parse_hex_byte(pair[0], pair[1]))
        .collect()
}

/// Register values travel as eight hex digits in little-endian byte order.
pub fn u32_to_le_hex(value: u32) -> String {
    hex_encode(&value.to_le_bytes())
}

pub fn u32_from_le_hex(text: &str) -> Option<u32> {
    let bytes = hex_decode(text)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Plain big-endian hex number, as used for addresses and lengths.
pub fn parse_hex_u32(text: &str) -> Option<u32> {
    if text.is_empty() || text.len() > 8 {
        return None;
    }
    let mut value = 0u32;
    for digit in text.bytes() {
        value = value << 4 | u32::from(hex_value(digit)?);
    }
    Some(value)
}

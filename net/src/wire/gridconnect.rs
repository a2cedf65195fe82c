use crate::error::{WireError, WireResult};
use crate::wire::can::CanFrame;
use openlcb_core::net_trace;

/// Parse a GridConnect-framed ASCII buffer into its constituent CAN frames.
///
/// A frame is `:X` + 8 hex digits (header) + `N` + `2*len` hex digits
/// (payload) + `;`. Multiple frames may be concatenated with no separator,
/// and whitespace between frames is tolerated. Hex is case-insensitive on
/// input. A malformed frame discards the whole input -- the caller gets an
/// empty list and a logged diagnostic rather than a partial parse.
pub fn parse(input: &str) -> Vec<CanFrame> {
    match try_parse(input) {
        Ok(frames) => frames,
        Err(err) => {
            net_trace!("discarding malformed GridConnect input: {err}");
            Vec::new()
        }
    }
}

/// As [`parse`], but surfaces the parse error instead of discarding it.
pub fn try_parse(input: &str) -> WireResult<Vec<CanFrame>> {
    let mut frames = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let (frame, tail) = parse_one(rest)?;
        frames.push(frame);
        rest = tail;
    }

    Ok(frames)
}

fn parse_one(input: &str) -> WireResult<(CanFrame, &str)> {
    let bytes = input.as_bytes();
    if bytes.first() != Some(&b':') || bytes.get(1).map(|b| b.to_ascii_uppercase()) != Some(b'X') {
        return Err(WireError::MalformedGridConnect);
    }

    let header_start = 2;
    let header_end = header_start + 8;
    let header_hex = bytes
        .get(header_start..header_end)
        .ok_or(WireError::MalformedGridConnect)?;
    let header = parse_hex_u32(header_hex)?;

    if bytes.get(header_end).map(|b| b.to_ascii_uppercase()) != Some(b'N') {
        return Err(WireError::MalformedGridConnect);
    }
    let len_digits_start = header_end + 1;

    let semicolon_offset = bytes[len_digits_start..]
        .iter()
        .position(|&b| b == b';')
        .ok_or(WireError::MalformedGridConnect)?;
    let payload_hex = &bytes[len_digits_start..len_digits_start + semicolon_offset];
    if payload_hex.len() % 2 != 0 {
        return Err(WireError::MalformedGridConnect);
    }
    if payload_hex.len() / 2 > 8 {
        return Err(WireError::PayloadTooLong);
    }

    let mut payload = [0u8; 8];
    for (i, chunk) in payload_hex.chunks(2).enumerate() {
        payload[i] = parse_hex_u8(chunk)?;
    }
    let payload_len = payload_hex.len() / 2;

    let frame = CanFrame::new(header, &payload[..payload_len]);
    let tail_start = len_digits_start + semicolon_offset + 1;
    // SAFETY-free: the input is valid UTF-8 `str` and every byte consumed
    // so far is ASCII, so slicing at `tail_start` always lands on a char
    // boundary.
    Ok((frame, &input[tail_start..]))
}

/// Format a single frame in GridConnect ASCII, upper-case.
pub fn format(frame: &CanFrame) -> String {
    let mut out = String::with_capacity(2 + 8 + 1 + frame.len() * 2 + 1);
    out.push_str(":X");
    out.push_str(&format!("{:08X}", frame.header()));
    out.push('N');
    for byte in frame.payload() {
        out.push_str(&format!("{byte:02X}"));
    }
    out.push(';');
    out
}

/// Format a sequence of frames, concatenated with no separator.
pub fn format_all(frames: &[CanFrame]) -> String {
    frames.iter().map(format).collect()
}

fn parse_hex_u32(digits: &[u8]) -> WireResult<u32> {
    let s = core::str::from_utf8(digits).map_err(|_| WireError::MalformedGridConnect)?;
    u32::from_str_radix(s, 16).map_err(|_| WireError::MalformedGridConnect)
}

fn parse_hex_u8(digits: &[u8]) -> WireResult<u8> {
    let s = core::str::from_utf8(digits).map_err(|_| WireError::MalformedGridConnect)?;
    u8::from_str_radix(s, 16).map_err(|_| WireError::MalformedGridConnect)
}

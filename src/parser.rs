use heapless::{consts::*, Vec};
use nom::{
    bytes::complete::take_while_m_n,
    character::complete::digit1,
    character::is_hex_digit,
    combinator::{all_consuming, map_res},
    IResult,
};

/// Arguments beyond this count are dropped.
pub const MAX_ARGS: usize = 8;

pub type Args<'a> = Vec<&'a [u8], U8>;

/// Splits a request in place. Spaces, CR and LF are overwritten with NUL;
/// NUL separates arguments too and empty arguments are skipped.
///
/// A token counts only once a delimiter follows it, so trailing bytes with
/// no terminator are ignored.
pub fn tokenize(buf: &mut [u8]) -> Args<'_> {
    for byte in buf.iter_mut() {
        if matches!(*byte, b' ' | b'\r' | b'\n') {
            *byte = 0;
        }
    }
    let buf = &*buf;
    let terminated = match buf.iter().rposition(|byte| *byte == 0) {
        Some(end) => &buf[..end],
        None => &[][..],
    };
    let mut args = Args::new();
    for token in terminated
        .split(|byte| *byte == 0)
        .filter(|token| !token.is_empty())
    {
        if args.push(token).is_err() {
            break;
        }
    }
    args
}

fn decimal(input: &[u8]) -> IResult<&[u8], u32> {
    map_res(digit1, |digits: &[u8]| {
        core::str::from_utf8(digits)
            .map_err(|_| ())
            .and_then(|digits| digits.parse::<u32>().map_err(|_| ()))
    })(input)
}

fn hex_byte(input: &[u8]) -> IResult<&[u8], u8> {
    map_res(take_while_m_n(2, 2, is_hex_digit), |digits: &[u8]| {
        core::str::from_utf8(digits)
            .map_err(|_| ())
            .and_then(|digits| u8::from_str_radix(digits, 16).map_err(|_| ()))
    })(input)
}

/// Unsigned decimal, nothing else allowed around it.
pub fn parse_decimal(arg: &[u8]) -> Option<u32> {
    all_consuming(decimal)(arg).ok().map(|(_, value)| value)
}

/// Decodes an even-length hex string (either case) into `out`. Returns the
/// number of bytes written, or `None` on a bad digit or if `out` is too
/// small.
pub fn decode_hex(arg: &[u8], out: &mut [u8]) -> Option<usize> {
    let mut rest = arg;
    let mut len = 0;
    while !rest.is_empty() {
        let (next, byte) = hex_byte(rest).ok()?;
        *out.get_mut(len)? = byte;
        len += 1;
        rest = next;
    }
    Some(len)
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Lowercase hex rendering of one cipher block.
pub fn encode_hex(bytes: &[u8; 16]) -> [u8; 32] {
    let mut hex = [0u8; 32];
    for (i, byte) in bytes.iter().enumerate() {
        hex[2 * i] = HEX_DIGITS[usize::from(byte >> 4)];
        hex[2 * i + 1] = HEX_DIGITS[usize::from(byte & 0x0f)];
    }
    hex
}

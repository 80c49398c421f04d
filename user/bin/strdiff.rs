#![no_std]
#![no_main]

use user::*;

/// Per-position 0/1 comparison of two decimal-digit strings: '0' if
/// `first`'s digit at that position is >= `second`'s, '1' otherwise.
/// Positions past the shorter string compare against the longer string's
/// own leftover digits.
fn diff(first: &str, second: &str, out: &mut [u8]) -> usize {
    let fb = first.as_bytes();
    let sb = second.as_bytes();
    let shorter_len = fb.len().min(sb.len());
    let total = fb.len().max(sb.len()).min(out.len());

    let mut i = 0;
    while i < shorter_len.min(total) {
        out[i] = if fb[i] >= sb[i] { b'0' } else { b'1' };
        i += 1;
    }

    let first_is_shorter = fb.len() <= sb.len();
    while i < total {
        out[i] = if first_is_shorter { b'1' } else { b'0' };
        i += 1;
    }

    total
}

#[unsafe(no_mangle)]
fn main(args: Args) {
    let (Some(first), Some(second)) = (args.get_str(1), args.get_str(2)) else {
        exit_with_msg("usage: strdiff first second");
    };

    let mut out = [0u8; 128];
    let n = diff(first, second, &mut out);

    let Ok(fd) = open(
        "strdiff_result.txt",
        OpenFlag::WRITE_ONLY | OpenFlag::CREATE,
    ) else {
        exit_with_msg("strdiff: cannot create strdiff_result.txt");
    };

    if write(fd, &out[..n]).is_err() {
        exit_with_msg("strdiff: write failed");
    }
    let _ = close(fd);
}

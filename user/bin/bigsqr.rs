#![no_std]
#![no_main]

use user::*;

/// Largest integer whose square does not exceed `n`, via Newton's method.
fn isqrt(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }

    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

#[unsafe(no_mangle)]
fn main(args: Args) {
    let Some(number) = args.get_str(1).and_then(|s| s.parse::<u64>().ok()) else {
        exit_with_msg("usage: bigsqr number");
    };

    let root = isqrt(number);
    println!("The number is {}", number);
    println!("The biggest perfect square is: {}", root * root);
}

#![no_std]
#![no_main]

use user::*;

/// Prints the whole descendant forest rooted at `pid` (children,
/// grandchildren, ...), as enumerated by the kernel's `get_descendants`.
fn print_descendants(pid: usize) {
    let mut buf = [0usize; 64];
    match get_descendants(pid, &mut buf) {
        Ok(n) => {
            println!("descendants of pid {}:", pid);
            for &child in &buf[..n] {
                println!("  {}", child);
            }
        }
        Err(e) => eprintln!("getdescendant: {}", e),
    }
}

#[unsafe(no_mangle)]
fn main(_args: Args) {
    match fork() {
        Err(_) => exit_with_msg("getdescendant: fork failed"),
        Ok(0) => {
            print_descendants(1);
            exit(0);
        }
        Ok(_) => {
            let _ = wait(&mut 0);
        }
    }
}

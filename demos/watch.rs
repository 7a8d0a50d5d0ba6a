//! Guards a 10-byte buffer and prints every foreign access to it.
//!
//! Run with `RUST_LOG=info cargo run --example watch`, then read the
//! buffer's page from another process (a debugger or memory viewer) before
//! pressing enter.

use std::io::{self, BufRead};

use paged_mem::{Monitor, PagedBox};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let monitor = Monitor::global()?;
    let mut buffer = PagedBox::new([0u8; 10])?;
    println!("guarding {:p}, press enter to write to it", buffer.as_ptr());

    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;

    if let Some(mut bytes) = buffer.lock_mut() {
        bytes[0] = 0xff;
        bytes[2] = 0xff;
    }

    println!("written, press enter to exit");
    stdin.lock().read_line(&mut line)?;

    monitor.stop()?;
    monitor.health()?;
    Ok(())
}

//! Per-connection traffic report.

use crate::runtime::ClientStats;
use std::io::{self, Write};

const UNITS: [&str; 9] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];

/// Format a byte count with binary prefixes and two decimals.
///
/// The unit steps up whenever the value would print as 1024.00 or more, so
/// counts just below a boundary read `1.00 MiB` rather than `1024.00 KiB`.
pub fn human_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while (value * 100.0).round() >= 102_400.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Write the live client count, then one line per client.
pub fn write_report<W, I>(out: &mut W, clients: I) -> io::Result<()>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = ClientStats>,
{
    let clients: Vec<ClientStats> = clients.into_iter().collect();

    writeln!(out, "{} active client(s)", clients.len())?;
    for client in &clients {
        writeln!(
            out,
            "{}\trx {}\ttx {}",
            client.peer,
            human_size(client.rx),
            human_size(client.tx)
        )?;
    }
    out.flush()
}

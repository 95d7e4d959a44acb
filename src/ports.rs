use anyhow::{bail, Context, Result};
use std::collections::HashSet;

/// Every TCP port, which is what a cycle scans unless told otherwise.
pub const FULL_RANGE: &str = "1-65535";

/// Parse a port-list spec into a deduplicated list of ports (1..=65535).
///
/// Items are separated by commas or newlines and may be a single port
/// (`4000`) or an inclusive range (`8000-8010`). Everything after `#` on a
/// line is ignored, as are blank items. First-seen order is kept.
pub fn parse_port_list(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().unwrap_or("");

        for item in line.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some((a, b)) = item.split_once('-') {
                let start = parse_port(a.trim())
                    .with_context(|| format!("line {line_no}: invalid range start: {a}"))?;
                let end = parse_port(b.trim())
                    .with_context(|| format!("line {line_no}: invalid range end: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                out.extend((start..=end).filter(|p| seen.insert(*p)));
                continue;
            }

            let p = parse_port(item)
                .with_context(|| format!("line {line_no}: invalid port value: {item}"))?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(out)
}

/// All ports from 1 to 65535 in ascending order.
pub fn full_range() -> Vec<u16> {
    (1..=u16::MAX).collect()
}

fn parse_port(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().with_context(|| format!("not a number: {s:?}"))?;
    if val == 0 || val > u16::MAX as u32 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

// SPDX-License-Identifier: PMPL-1.0-or-later

//! Small helpers: ids, port lists, durations, shell quoting.

pub mod process;

use anyhow::{anyhow, Context, Result};
use std::net::TcpListener;
use std::time::Duration;

/// Opaque experiment id: 8 random bytes, hex encoded.
pub fn generate_uid() -> Result<String> {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).map_err(|err| anyhow!("generate uid: {}", err))?;
    Ok(hex::encode(bytes))
}

/// Expands `"0-2,4,6-7"` into `["0","1","2","4","6","7"]`.
pub fn parse_port_list(value: &str) -> Result<Vec<String>> {
    parse_number_list(value, u16::MAX as u32)
}

/// Like [`parse_port_list`], for core indices below `cores`.
pub fn parse_cpu_list(value: &str, cores: usize) -> Result<Vec<String>> {
    let cores = u32::try_from(cores).unwrap_or(u32::MAX);
    if cores == 0 {
        return Err(anyhow!("no cores available"));
    }
    parse_number_list(value, cores - 1)
}

/// Expands a list of values and ranges, each within `0..=max`.
fn parse_number_list(value: &str, max: u32) -> Result<Vec<String>> {
    let bounded = |raw: &str, part: &str| -> Result<u32> {
        let number: u32 = raw
            .trim()
            .parse()
            .with_context(|| format!("illegal value in {:?}", part))?;
        if number > max {
            return Err(anyhow!("{} in {:?} is out of range 0-{}", number, part, max));
        }
        Ok(number)
    };
    let mut values = Vec::new();
    for part in value.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start = bounded(start, part)?;
                let end = bounded(end, part)?;
                if start > end {
                    return Err(anyhow!("illegal range {:?}: start is after end", part));
                }
                values.extend((start..=end).map(|number| number.to_string()));
            }
            None => values.push(bounded(part, part)?.to_string()),
        }
    }
    Ok(values)
}

/// Accepts `500ms`, `20s`, `2m`, `1h`, or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let split = value
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: u64 = number
        .parse()
        .with_context(|| format!("illegal duration {:?}", value))?;
    let seconds = |factor: u64| {
        number
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| anyhow!("duration {:?} is too large", value))
    };
    match unit {
        "" | "s" => seconds(1),
        "ms" => Ok(Duration::from_millis(number)),
        "m" => seconds(60),
        "h" => seconds(3600),
        other => Err(anyhow!("unknown duration unit {:?} in {:?}", other, value)),
    }
}

/// Wraps a value in single quotes for `/bin/sh -c`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Lets the kernel pick a free loopback port.
pub fn unused_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("binding an ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

pub fn port_in_use(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_ranges_expand() {
        let ports = parse_port_list("0-2,4,6-7").expect("ports should parse");
        assert_eq!(ports, vec!["0", "1", "2", "4", "6", "7"]);
        let plain = parse_port_list("1,3,5").expect("ports should parse");
        assert_eq!(plain, vec!["1", "3", "5"]);
    }

    #[test]
    fn bad_port_lists_fail() {
        assert!(parse_port_list("80-a").is_err());
        assert!(parse_port_list("9-3").is_err());
        assert!(parse_port_list("http").is_err());
        assert!(parse_port_list("").expect("empty is fine").is_empty());
    }

    #[test]
    fn ports_stay_in_range() {
        assert!(parse_port_list("65535-65537").is_err());
        assert!(parse_port_list("70000").is_err());
        assert!(parse_port_list("1-4000000000").is_err());
        let top = parse_port_list("65534-65535").expect("ports should parse");
        assert_eq!(top, vec!["65534", "65535"]);
    }

    #[test]
    fn cpu_lists_stay_below_core_count() {
        assert_eq!(parse_cpu_list("0-1,3", 4).expect("cores should parse"), vec!["0", "1", "3"]);
        assert!(parse_cpu_list("4", 4).is_err());
        assert!(parse_cpu_list("0-100000", 8).is_err());
        assert!(parse_cpu_list("0", 0).is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("20s").ok(), Some(Duration::from_secs(20)));
        assert_eq!(parse_duration("250ms").ok(), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2m").ok(), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("7").ok(), Some(Duration::from_secs(7)));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("3d").is_err());
    }

    #[test]
    fn oversized_durations_fail() {
        assert!(parse_duration("6000000000000000h").is_err());
        assert!(parse_duration("400000000000000000m").is_err());
        assert!(parse_duration("99999999999999999999").is_err());
    }

    #[test]
    fn uids_are_hex() {
        let uid = generate_uid().expect("uid should be generated");
        assert_eq!(uid.len(), 16);
        assert!(uid.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn quoting_survives_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}

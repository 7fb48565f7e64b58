//
// IP Filter (§4.7, stage 2 of the C9 enforcement pipeline)
//
// Deny-then-allow over config-supplied CIDR/host lists: the denylist
// always wins; an empty allowlist means "allow anything not denied", a
// non-empty one narrows to just those networks.
//
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;

use crate::error::Error;
use crate::CONFIG;

fn parse_networks(raw: &[String]) -> Vec<IpNetwork> {
    raw.iter()
        .filter_map(|s| IpNetwork::from_str(s).ok().or_else(|| IpAddr::from_str(s).ok().map(IpNetwork::from)))
        .collect()
}

/// `remote_ip` is `None` when the caller couldn't determine a peer
/// address at all (a transport-level gap, not a filtering decision) —
/// `ip_filter_fail_open` governs whether that's let through.
pub fn check(remote_ip: Option<&str>) -> Result<(), Error> {
    let ip = match remote_ip.and_then(|s| IpAddr::from_str(s).ok()) {
        Some(ip) => ip,
        None if CONFIG.ip_filter_fail_open() => return Ok(()),
        None => return Err(Error::forbidden("unable to determine client address")),
    };

    let denylist = parse_networks(&CONFIG.ip_denylist_entries());
    let allowlist = parse_networks(&CONFIG.ip_allowlist_entries());
    evaluate(ip, &denylist, &allowlist)
}

fn evaluate(ip: IpAddr, denylist: &[IpNetwork], allowlist: &[IpNetwork]) -> Result<(), Error> {
    if denylist.iter().any(|net| net.contains(ip)) {
        return Err(Error::forbidden("address is denied"));
    }

    if !allowlist.is_empty() && !allowlist.iter().any(|net| net.contains(ip)) {
        return Err(Error::forbidden("address is not allowed"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nets(raw: &[&str]) -> Vec<IpNetwork> {
        parse_networks(&raw.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn empty_allowlist_allows_anything_not_denied() {
        let ip = IpAddr::from_str("203.0.113.5").unwrap();
        assert!(evaluate(ip, &nets(&[]), &nets(&[])).is_ok());
    }

    #[test]
    fn denylist_wins_even_if_allowlisted() {
        let ip = IpAddr::from_str("10.0.0.7").unwrap();
        let denylist = nets(&["10.0.0.0/24"]);
        let allowlist = nets(&["10.0.0.0/24"]);
        assert!(evaluate(ip, &denylist, &allowlist).is_err());
    }

    #[test]
    fn nonempty_allowlist_excludes_everything_else() {
        let ip = IpAddr::from_str("192.168.1.1").unwrap();
        let allowlist = nets(&["10.0.0.0/8"]);
        assert!(evaluate(ip, &[], &allowlist).is_err());
    }

    #[test]
    fn single_address_entries_parse_as_host_networks() {
        let ip = IpAddr::from_str("198.51.100.23").unwrap();
        let allowlist = nets(&["198.51.100.23"]);
        assert!(evaluate(ip, &[], &allowlist).is_ok());
    }
}

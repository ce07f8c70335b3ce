//! Decoders for `vos` output.
//!
//! The database tool speaks line-oriented text; the field labels and line
//! shapes matched here are its wire contract and must be kept verbatim.
//! Everything above this module works with typed structs only.

use common::types::{FileServer, Site, SiteKind, VolumeEntry};
use lazy_static::lazy_static;
use regex::Regex;

pub const PARTITION_HEADER: &str = "The partitions on the server are:";

lazy_static! {
    static ref UUID_LINE: Regex = Regex::new(r"^UUID: (\S+)").unwrap();
    static ref BARE_WORD: Regex = Regex::new(r"^(\S+)").unwrap();
    static ref RW_ID: Regex = Regex::new(r"RWrite: (\d+)").unwrap();
    static ref RO_ID: Regex = Regex::new(r"ROnly: (\d+)").unwrap();
    static ref BK_ID: Regex = Regex::new(r"Backup: (\d+)").unwrap();
    static ref RC_ID: Regex = Regex::new(r"RClone: (\d+)").unwrap();
    static ref SITE_LINE: Regex =
        Regex::new(r"server (\S+) partition (\S+) (RO|RW) Site(.*)").unwrap();
    static ref PARTITION: Regex = Regex::new(r"/vicep([a-z]+)").unwrap();
}

/// Parse `vos listaddrs -noresolve -printuuid` output: a UUID line, one
/// address per line, and a blank-line record terminator. An unterminated
/// trailing record is kept.
pub fn parse_listaddrs(out: &str) -> Vec<FileServer> {
    let mut servers = Vec::new();
    let mut uuid: Option<String> = None;
    let mut addrs: Vec<String> = Vec::new();
    for line in out.lines() {
        if let Some(c) = UUID_LINE.captures(line) {
            uuid = Some(c[1].to_string());
            addrs.clear();
            continue;
        }
        if line.is_empty() {
            if let Some(u) = uuid.take() {
                servers.push(FileServer {
                    uuid: u,
                    addrs: std::mem::take(&mut addrs),
                });
            }
            continue;
        }
        if uuid.is_some() {
            if let Some(c) = BARE_WORD.captures(line) {
                addrs.push(c[1].to_string());
            }
        }
    }
    if let Some(u) = uuid.take() {
        servers.push(FileServer { uuid: u, addrs });
    }
    servers
}

/// Parse `vos listvldb -name <x> -noresolve -nosort` output. The volume
/// name is the unindented line; id fields and site lines are matched
/// anywhere in the indented remainder. Site partitions are reduced to the
/// partition letter and flags are normalized to lowercase without the
/// leading dashes.
pub fn parse_listvldb(out: &str) -> VolumeEntry {
    let mut entry = VolumeEntry::default();
    for line in out.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some(c) = BARE_WORD.captures(line) {
            entry.name = c[1].to_string();
            continue;
        }
        if let Some(c) = RW_ID.captures(line) {
            entry.rw = c[1].parse().ok();
        }
        if let Some(c) = RO_ID.captures(line) {
            entry.ro = c[1].parse().ok();
        }
        if let Some(c) = BK_ID.captures(line) {
            entry.bk = c[1].parse().ok();
        }
        if let Some(c) = RC_ID.captures(line) {
            entry.rc = c[1].parse().ok();
        }
        if let Some(c) = SITE_LINE.captures(line) {
            entry.sites.push(Site {
                server: c[1].to_string(),
                partition: c[2].replace("/vicep", ""),
                kind: if &c[3] == "RW" {
                    SiteKind::Rw
                } else {
                    SiteKind::Ro
                },
                flags: c[4].replace("--", "").to_lowercase().trim().to_string(),
            });
        }
    }
    entry
}

/// Extract partition letters from `vos listpart` output.
pub fn parse_partitions(out: &str) -> Vec<String> {
    PARTITION
        .captures_iter(out)
        .map(|c| c[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTADDRS: &str = "\
UUID: 007f0479-1c34-1c08-98-d4-b2aeaa53aa77
192.168.122.214

UUID: 00334f27-b684-1d20-8c-fb-f1a9a1cbaa77
192.168.122.215
192.168.122.216

";

    #[test]
    fn listaddrs_records() {
        let servers = parse_listaddrs(LISTADDRS);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].uuid, "007f0479-1c34-1c08-98-d4-b2aeaa53aa77");
        assert_eq!(servers[0].addrs, vec!["192.168.122.214"]);
        assert_eq!(servers[1].addrs.len(), 2);
    }

    #[test]
    fn listaddrs_unterminated_record_is_kept() {
        let out = "UUID: 007f0479-1c34-1c08-98-d4-b2aeaa53aa77\n192.168.122.214\n";
        let servers = parse_listaddrs(out);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].addrs, vec!["192.168.122.214"]);
    }

    #[test]
    fn listaddrs_empty_output() {
        assert!(parse_listaddrs("").is_empty());
    }

    const LISTVLDB: &str = "\
test
    RWrite: 536870915    ROnly: 536870916    Backup: 536870917
    number of sites -> 3
       server 192.168.122.214 partition /vicepa RW Site
       server 192.168.122.214 partition /vicepa RO Site
       server 192.168.122.215 partition /vicepb RO Site  -- Not released
";

    #[test]
    fn listvldb_entry() {
        let entry = parse_listvldb(LISTVLDB);
        assert_eq!(entry.name, "test");
        assert_eq!(entry.rw, Some(536870915));
        assert_eq!(entry.ro, Some(536870916));
        assert_eq!(entry.bk, Some(536870917));
        assert_eq!(entry.rc, None);
        assert_eq!(entry.sites.len(), 3);
        assert_eq!(entry.sites[0].kind, SiteKind::Rw);
        assert_eq!(entry.sites[0].partition, "a");
        assert_eq!(entry.sites[0].flags, "");
        assert_eq!(entry.sites[2].kind, SiteKind::Ro);
        assert_eq!(entry.sites[2].partition, "b");
        assert_eq!(entry.sites[2].flags, "not released");
    }

    #[test]
    fn listvldb_empty_output_is_absent() {
        let entry = parse_listvldb("");
        assert!(!entry.exists());
    }

    #[test]
    fn partitions_in_response_order() {
        let out = "\
The partitions on the server are:
    /vicepa     /vicepb     /vicepc
Total: 3
";
        assert_eq!(parse_partitions(out), vec!["a", "b", "c"]);
    }
}

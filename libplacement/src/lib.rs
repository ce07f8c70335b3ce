//! Read-only replica placement.
//!
//! Given the fileservers registered in the VLDB and a volume's current
//! site list, compute the minimal set of sites to add to reach the desired
//! replica count. Existing replicas are never moved or removed. The
//! same-server clone of the read-write volume is the cheapest replica (no
//! cross-host copy), so it always comes first; further replicas
//! round-robin across the remaining fileservers in database response
//! order. Running out of fileservers is not an error: under-replication is
//! accepted.

use anyhow::{Result, bail};
use common::types::{FileServer, Site, SiteKind};
use log::{debug, warn};

use libvldb::VosClient;

/// Where partition lists come from. The planner only ever needs the first
/// partition of a server it has not placed anything on yet.
pub trait PartitionSource {
    fn partitions(&self, server: &str) -> Result<Vec<String>>;
}

impl PartitionSource for VosClient {
    fn partitions(&self, server: &str) -> Result<Vec<String>> {
        Ok(self.list_partitions(server)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub server: String,
    pub partition: String,
}

/// Compute the sites to add, in application order. The clone comes first
/// because remote replicas are only meaningful once it exists.
pub fn plan_sites(
    fileservers: &[FileServer],
    sites: &[Site],
    replicas: usize,
    parts: &dyn PartitionSource,
) -> Result<Vec<Placement>> {
    // Index the fileservers by position in the database response; servers
    // with no registered addresses cannot host a site.
    let mut servers: Vec<(usize, &FileServer)> = Vec::new();
    for (i, fs) in fileservers.iter().enumerate() {
        if fs.addrs.is_empty() {
            warn!("no addresses found for fileserver {i}; ignoring");
            continue;
        }
        servers.push((i, fs));
    }

    let lookup_index = |addr: &str| -> Option<usize> {
        servers
            .iter()
            .find(|(_, fs)| fs.addrs.iter().any(|a| a == addr))
            .map(|(i, _)| *i)
    };

    // Map the existing sites onto server indexes by address match.
    let mut rw: Option<(Option<usize>, String)> = None;
    let mut ro: Vec<(Option<usize>, String)> = Vec::new();
    for site in sites {
        let index = lookup_index(&site.server);
        match site.kind {
            SiteKind::Rw => rw = Some((index, site.partition.clone())),
            SiteKind::Ro => ro.push((index, site.partition.clone())),
        }
    }
    debug!("plan_sites: rw={rw:?}, ro={ro:?}");

    // Seed the goal with the existing read-only sites, then the clone,
    // then remote servers in ascending index order.
    let mut goal: Vec<(Option<usize>, Option<String>)> = ro
        .iter()
        .map(|(i, p)| (*i, Some(p.clone())))
        .collect();
    if goal.len() < replicas {
        if let Some((index, partition)) = &rw {
            if !goal.iter().any(|(i, _)| i == index) {
                goal.push((*index, Some(partition.clone())));
            }
        }
    }
    if goal.len() < replicas {
        let mut remaining: Vec<usize> = servers
            .iter()
            .map(|(i, _)| *i)
            .filter(|i| !goal.iter().any(|(g, _)| *g == Some(*i)))
            .collect();
        while goal.len() < replicas && !remaining.is_empty() {
            goal.push((Some(remaining.remove(0)), None));
        }
    }
    debug!("plan_sites: goal={goal:?}");

    // Emit only the new additions, preserving the clone-first ordering.
    let mut additions = Vec::new();
    for (index, partition) in goal {
        if ro.iter().any(|(i, _)| *i == index) {
            continue;
        }
        let Some(index) = index else {
            warn!("skipping site on a server the VLDB did not list");
            continue;
        };
        let Some((_, fs)) = servers.iter().find(|(i, _)| *i == index) else {
            continue;
        };
        let Some(addr) = fs.addrs.first() else {
            continue;
        };
        let partition = match partition {
            Some(p) => p,
            None => {
                let available = parts.partitions(addr)?;
                match available.into_iter().next() {
                    Some(p) => p,
                    None => bail!("no partitions found on server {addr}"),
                }
            }
        };
        additions.push(Placement {
            server: addr.clone(),
            partition,
        });
    }
    debug!("plan_sites: additions={additions:?}");
    Ok(additions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedParts(HashMap<String, Vec<String>>);

    impl FixedParts {
        fn new(entries: &[(&str, &[&str])]) -> FixedParts {
            FixedParts(
                entries
                    .iter()
                    .map(|(server, parts)| {
                        (
                            server.to_string(),
                            parts.iter().map(|p| p.to_string()).collect(),
                        )
                    })
                    .collect(),
            )
        }
    }

    impl PartitionSource for FixedParts {
        fn partitions(&self, server: &str) -> Result<Vec<String>> {
            Ok(self.0.get(server).cloned().unwrap_or_default())
        }
    }

    fn fileservers(addrs: &[&str]) -> Vec<FileServer> {
        addrs
            .iter()
            .enumerate()
            .map(|(i, addr)| FileServer {
                uuid: format!("uuid-{i}"),
                addrs: vec![addr.to_string()],
            })
            .collect()
    }

    fn rw_site(server: &str, partition: &str) -> Site {
        Site {
            server: server.to_string(),
            partition: partition.to_string(),
            kind: SiteKind::Rw,
            flags: String::new(),
        }
    }

    fn ro_site(server: &str, partition: &str) -> Site {
        Site {
            server: server.to_string(),
            partition: partition.to_string(),
            kind: SiteKind::Ro,
            flags: String::new(),
        }
    }

    #[test]
    fn clone_first_then_round_robin() {
        let servers = fileservers(&["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]);
        let parts = FixedParts::new(&[
            ("10.0.0.2", &["b", "c"]),
            ("10.0.0.3", &["d"]),
        ]);
        let sites = vec![rw_site("10.0.0.1", "a")];
        let plan = plan_sites(&servers, &sites, 3, &parts).unwrap();
        assert_eq!(
            plan,
            vec![
                Placement {
                    server: "10.0.0.1".to_string(),
                    partition: "a".to_string()
                },
                Placement {
                    server: "10.0.0.2".to_string(),
                    partition: "b".to_string()
                },
                Placement {
                    server: "10.0.0.3".to_string(),
                    partition: "d".to_string()
                },
            ]
        );
    }

    #[test]
    fn existing_replicas_are_never_reissued() {
        let servers = fileservers(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        let parts = FixedParts::new(&[("10.0.0.3", &["a"])]);
        let sites = vec![
            rw_site("10.0.0.1", "a"),
            ro_site("10.0.0.1", "a"),
            ro_site("10.0.0.2", "b"),
        ];
        let plan = plan_sites(&servers, &sites, 3, &parts).unwrap();
        assert_eq!(
            plan,
            vec![Placement {
                server: "10.0.0.3".to_string(),
                partition: "a".to_string()
            }]
        );
    }

    #[test]
    fn satisfied_goal_adds_nothing() {
        let servers = fileservers(&["10.0.0.1", "10.0.0.2"]);
        let parts = FixedParts::new(&[]);
        let sites = vec![
            rw_site("10.0.0.1", "a"),
            ro_site("10.0.0.1", "a"),
            ro_site("10.0.0.2", "b"),
        ];
        let plan = plan_sites(&servers, &sites, 2, &parts).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn under_replication_is_tolerated() {
        let servers = fileservers(&["10.0.0.1", "10.0.0.2"]);
        let parts = FixedParts::new(&[("10.0.0.2", &["a"])]);
        let sites = vec![rw_site("10.0.0.1", "a")];
        let plan = plan_sites(&servers, &sites, 5, &parts).unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn no_fileservers_is_an_empty_plan() {
        let parts = FixedParts::new(&[]);
        let plan = plan_sites(&[], &[rw_site("10.0.0.1", "a")], 3, &parts).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn addressless_servers_are_skipped() {
        let mut servers = fileservers(&["10.0.0.1", "10.0.0.2"]);
        servers.insert(
            1,
            FileServer {
                uuid: "uuid-dead".to_string(),
                addrs: Vec::new(),
            },
        );
        let parts = FixedParts::new(&[("10.0.0.2", &["b"])]);
        let sites = vec![rw_site("10.0.0.1", "a")];
        let plan = plan_sites(&servers, &sites, 2, &parts).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].server, "10.0.0.2");
    }
}

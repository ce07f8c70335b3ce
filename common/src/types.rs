use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A fileserver registered in the VLDB. Rebuilt from `vos listaddrs` on
/// every run; the first address is the server's canonical identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileServer {
    pub uuid: String,
    pub addrs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
    Rw,
    Ro,
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteKind::Rw => write!(f, "rw"),
            SiteKind::Ro => write!(f, "ro"),
        }
    }
}

/// One physical location of a volume. The flags field records pending
/// release markers exactly as reported by the database, lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub server: String,
    pub partition: String,
    #[serde(rename = "type")]
    pub kind: SiteKind,
    pub flags: String,
}

/// A VLDB volume entry. Numeric ids are assigned by the database; identity
/// is the read-write name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rw: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ro: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bk: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<u64>,
    pub sites: Vec<Site>,
}

impl VolumeEntry {
    /// A volume with no id and no sites is absent from the database.
    pub fn exists(&self) -> bool {
        self.rw.is_some() || !self.sites.is_empty()
    }

    /// True when any site carries a pending-release marker.
    pub fn needs_release(&self) -> bool {
        self.sites.iter().any(|s| !s.flags.is_empty())
    }

    pub fn ro_sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter().filter(|s| s.kind == SiteKind::Ro)
    }
}

pub type RightsSet = BTreeSet<char>;
pub type AclMap = BTreeMap<String, RightsSet>;

/// The normal and negative access lists of a directory. Equality of the
/// full maps is the change-detection signal after a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirAcl {
    pub normal: AclMap,
    pub negative: AclMap,
}

/// One requested ACL term: a principal and its rights string, as accepted
/// by `fs setacl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub principal: String,
    pub rights: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid acl term '{0}'")]
pub struct InvalidAclTerm(pub String);

impl FromStr for AclEntry {
    type Err = InvalidAclTerm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some(principal), Some(rights), None) => Ok(AclEntry {
                principal: principal.to_string(),
                rights: rights.to_string(),
            }),
            _ => Err(InvalidAclTerm(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acl_entry_from_str() {
        let entry: AclEntry = "system:anyuser read".parse().unwrap();
        assert_eq!(entry.principal, "system:anyuser");
        assert_eq!(entry.rights, "read");

        let entry: AclEntry = "  bob   all  ".parse().unwrap();
        assert_eq!(entry.principal, "bob");

        assert!("justoneword".parse::<AclEntry>().is_err());
        assert!("one two three".parse::<AclEntry>().is_err());
    }

    #[test]
    fn entry_release_markers() {
        let mut entry = VolumeEntry {
            name: "test".to_string(),
            rw: Some(536870915),
            ..Default::default()
        };
        entry.sites.push(Site {
            server: "192.168.122.214".to_string(),
            partition: "a".to_string(),
            kind: SiteKind::Rw,
            flags: String::new(),
        });
        assert!(entry.exists());
        assert!(!entry.needs_release());

        entry.sites.push(Site {
            server: "192.168.122.214".to_string(),
            partition: "a".to_string(),
            kind: SiteKind::Ro,
            flags: "not released".to_string(),
        });
        assert!(entry.needs_release());
        assert_eq!(entry.ro_sites().count(), 1);
    }
}

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the record holding the address a domain is published at.
const WWW: &str = "www";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
    A,
    AAAA,
    CAA,
    CDS,
    CNAME,
    DNAME,
    DS,
    LOC,
    MX,
    NS,
    PTR,
    SPF,
    SRV,
    SSHFP,
    TLSA,
    TXT,
    WKS,
}

impl RecordType {
    pub const ALL: [RecordType; 17] = [
        RecordType::A,
        RecordType::AAAA,
        RecordType::CAA,
        RecordType::CDS,
        RecordType::CNAME,
        RecordType::DNAME,
        RecordType::DS,
        RecordType::LOC,
        RecordType::MX,
        RecordType::NS,
        RecordType::PTR,
        RecordType::SPF,
        RecordType::SRV,
        RecordType::SSHFP,
        RecordType::TLSA,
        RecordType::TXT,
        RecordType::WKS,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CAA => "CAA",
            RecordType::CDS => "CDS",
            RecordType::CNAME => "CNAME",
            RecordType::DNAME => "DNAME",
            RecordType::DS => "DS",
            RecordType::LOC => "LOC",
            RecordType::MX => "MX",
            RecordType::NS => "NS",
            RecordType::PTR => "PTR",
            RecordType::SPF => "SPF",
            RecordType::SRV => "SRV",
            RecordType::SSHFP => "SSHFP",
            RecordType::TLSA => "TLSA",
            RecordType::TXT => "TXT",
            RecordType::WKS => "WKS",
        }
    }

    /// The address record type holding addresses of the same family as `ip`.
    pub fn address_of(ip: &IpAddr) -> RecordType {
        match ip {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::AAAA,
        }
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RecordError::UnknownType(s.to_owned()))
    }
}

/// The type of a record set. Types the registrar supports but [`RecordType`]
/// does not name are kept verbatim so they are written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RrsetType {
    Known(RecordType),
    Other(String),
}

impl RrsetType {
    pub fn known(&self) -> Option<RecordType> {
        match self {
            RrsetType::Known(t) => Some(*t),
            RrsetType::Other(_) => None,
        }
    }
}

impl From<RecordType> for RrsetType {
    fn from(t: RecordType) -> Self {
        RrsetType::Known(t)
    }
}

impl PartialEq<RecordType> for RrsetType {
    fn eq(&self, other: &RecordType) -> bool {
        self.known() == Some(*other)
    }
}

impl Display for RrsetType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RrsetType::Known(t) => Display::fmt(t, f),
            RrsetType::Other(s) => f.write_str(s),
        }
    }
}

/// A resource record set as the registrar represents it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "rrset_name")]
    pub name: String,
    #[serde(rename = "rrset_type")]
    pub r#type: RrsetType,
    #[serde(rename = "rrset_values")]
    pub values: Vec<String>,
    #[serde(rename = "rrset_ttl", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

/// Returns the address the domain is currently published at: the first value
/// of the first `www` record of the same family as `wan_ip`, i.e. the first
/// `www` A record for an IPv4 WAN address.
pub fn published_ip<'a>(records: &'a [Record], wan_ip: &IpAddr) -> Result<&'a str, RecordError> {
    let wanted = RecordType::address_of(wan_ip);

    records.iter()
        .filter(|r| r.name == WWW && r.r#type == wanted)
        .find_map(|r| r.values.first())
        .map(String::as_str)
        .ok_or(RecordError::NoWwwRecord(wanted))
}

/// Replaces every value equal to `old_ip` with `new_ip` in the records whose
/// type is allowed. `None` allows every type, including the ones
/// [`RecordType`] does not name.
pub fn replace_ip(
    records: &[Record],
    old_ip: &str,
    new_ip: &str,
    types: Option<&HashSet<RecordType>>,
) -> Vec<Record> {
    records.iter()
        .map(|record| {
            let allowed = match types {
                None => true,
                Some(types) => record.r#type.known().map_or(false, |t| types.contains(&t)),
            };
            if allowed {
                Record {
                    values: record.values.iter()
                        .map(|v| if v == old_ip { new_ip.to_owned() } else { v.clone() })
                        .collect(),
                    ..record.clone()
                }
            } else {
                record.clone()
            }
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("no IP configured in the www {0} record")]
    NoWwwRecord(RecordType),
    #[error("unknown record type: {0}")]
    UnknownType(String),
}

use serde::{Deserialize, Serialize};

pub type ServiceId = i64;
pub type AddressId = i64;
pub type CallId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRow {
    pub id: ServiceId,
    pub port: u16,
    pub proto: String,
    pub name: Option<String>,
    pub first_seen: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRow {
    pub id: AddressId,
    pub ip_address: String,
    pub first_seen: String,
    pub last_seen: String,
    pub whois_record: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRow {
    pub id: CallId,
    pub address_id: AddressId,
    pub service_id: ServiceId,
    pub count: i64,
}

/// Identifiers touched by one recorded event and the call count afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    pub service_id: ServiceId,
    pub address_id: AddressId,
    pub count: i64,
}

/// One line of the inventory report: a call joined with both ends.
///
/// Calls carry no timestamps of their own; the seen times are the address's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallReport {
    pub ip_address: String,
    pub port: u16,
    pub proto: String,
    pub service_name: Option<String>,
    pub count: i64,
    pub address_first_seen: String,
    pub address_last_seen: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub services: i64,
    pub addresses: i64,
    pub calls: i64,
    pub events: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CallFilter {
    pub proto: Option<String>,
    pub port: Option<u16>,
    pub limit: Option<usize>,
}

/// Tables that can be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Services,
    Addresses,
    Calls,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Services => "services",
            Table::Addresses => "addresses",
            Table::Calls => "calls",
        }
    }
}

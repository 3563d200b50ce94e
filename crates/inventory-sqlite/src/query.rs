use crate::{AddressRow, CallFilter, CallReport, CallRow, Db, ServiceRow, Summary};
use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};
use unmatched_core::Protocol;

fn service_row(r: &Row<'_>) -> rusqlite::Result<ServiceRow> {
    Ok(ServiceRow {
        id: r.get(0)?,
        port: r.get(1)?,
        proto: r.get(2)?,
        name: r.get(3)?,
        first_seen: r.get(4)?,
        last_seen: r.get(5)?,
    })
}

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    pub fn summary(&self) -> Result<Summary> {
        let s = self.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM services),
                    (SELECT COUNT(*) FROM addresses),
                    (SELECT COUNT(*) FROM calls),
                    (SELECT COALESCE(SUM(count), 0) FROM calls)",
            [],
            |r| Ok(Summary { services: r.get(0)?, addresses: r.get(1)?, calls: r.get(2)?, events: r.get(3)? }),
        )?;
        Ok(s)
    }

    pub fn service(&self, port: u16, proto: Protocol) -> Result<Option<ServiceRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, port, proto, name, first_seen, last_seen FROM services WHERE port = ? AND proto = ?",
                params![port, proto.as_str()],
                service_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn services(&self) -> Result<Vec<ServiceRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, port, proto, name, first_seen, last_seen FROM services ORDER BY port, proto")?;
        let rows = stmt.query_map([], service_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn addresses(&self) -> Result<Vec<AddressRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, ip_address, first_seen, last_seen, whois_record FROM addresses ORDER BY id")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(AddressRow {
                    id: r.get(0)?,
                    ip_address: r.get(1)?,
                    first_seen: r.get(2)?,
                    last_seen: r.get(3)?,
                    whois_record: r.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn calls(&self) -> Result<Vec<CallRow>> {
        let mut stmt = self.conn.prepare("SELECT id, address_id, service_id, count FROM calls ORDER BY id")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(CallRow { id: r.get(0)?, address_id: r.get(1)?, service_id: r.get(2)?, count: r.get(3)? })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Calls joined with their address and service, busiest first.
    pub fn top_calls(&self, filter: &CallFilter) -> Result<Vec<CallReport>> {
        let limit = filter.limit.map(|n| n as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(
            "SELECT a.ip_address, s.port, s.proto, s.name, c.count, a.first_seen, a.last_seen
             FROM calls c
             JOIN addresses a ON a.id = c.address_id
             JOIN services s ON s.id = c.service_id
             WHERE (?1 IS NULL OR s.proto = ?1) AND (?2 IS NULL OR s.port = ?2)
             ORDER BY c.count DESC, a.ip_address, s.port
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![filter.proto, filter.port, limit], |r| {
                Ok(CallReport {
                    ip_address: r.get(0)?,
                    port: r.get(1)?,
                    proto: r.get(2)?,
                    service_name: r.get(3)?,
                    count: r.get(4)?,
                    address_first_seen: r.get(5)?,
                    address_last_seen: r.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

use crate::{AddressId, Db, Recorded, ServiceId};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use unmatched_core::{InboundEvent, Protocol, ServiceNames};

/// Render a timestamp the way SQLite's `datetime()` does, in UTC.
pub fn timestamp(at: OffsetDateTime) -> Result<String> {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    Ok(at.to_offset(UtcOffset::UTC).format(&fmt)?)
}

impl Db {
    /// Apply one inbound event: upsert its service and address, then bump the
    /// call counter between them. All three steps commit together or not at all.
    pub fn record(&mut self, event: &InboundEvent, names: &dyn ServiceNames) -> Result<Recorded> {
        self.record_at(event, names, OffsetDateTime::now_utc())
    }

    pub fn record_at(
        &mut self,
        event: &InboundEvent,
        names: &dyn ServiceNames,
        at: OffsetDateTime,
    ) -> Result<Recorded> {
        let seen_at = timestamp(at)?;
        let tx = self.conn.transaction()?;
        let service_id = upsert_service(&tx, event.dest_port, event.protocol, &seen_at, names)
            .context("upserting service")?;
        let address_id = upsert_address(&tx, &event.src_ip, &seen_at).context("upserting address")?;
        let count = increment_call(&tx, address_id, service_id).context("incrementing call")?;
        tx.commit()?;
        Ok(Recorded { service_id, address_id, count })
    }
}

/// Refresh `last_seen` of the (port, proto) service, creating it on first
/// sight. The name is looked up only when the row is created.
pub fn upsert_service(
    conn: &Connection,
    port: u16,
    proto: Protocol,
    seen_at: &str,
    names: &dyn ServiceNames,
) -> Result<ServiceId> {
    let existing: Option<ServiceId> = conn
        .query_row(
            "SELECT id FROM services WHERE port = ? AND proto = ?",
            params![port, proto.as_str()],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        conn.execute(
            "UPDATE services SET last_seen = max(last_seen, ?) WHERE id = ?",
            params![seen_at, id],
        )?;
        return Ok(id);
    }

    let name = names.lookup(port, proto);
    conn.execute(
        "INSERT INTO services(port, proto, name, first_seen, last_seen) VALUES (?,?,?,?,?)",
        params![port, proto.as_str(), name, seen_at, seen_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn upsert_address(conn: &Connection, ip_address: &str, seen_at: &str) -> Result<AddressId> {
    let existing: Option<AddressId> = conn
        .query_row(
            "SELECT id FROM addresses WHERE ip_address = ?",
            params![ip_address],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        conn.execute(
            "UPDATE addresses SET last_seen = max(last_seen, ?) WHERE id = ?",
            params![seen_at, id],
        )?;
        return Ok(id);
    }

    conn.execute(
        "INSERT INTO addresses(ip_address, first_seen, last_seen) VALUES (?,?,?)",
        params![ip_address, seen_at, seen_at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Add one to the call counter for the pair, starting at 1. Returns the new count.
pub fn increment_call(conn: &Connection, address_id: AddressId, service_id: ServiceId) -> Result<i64> {
    conn.execute(
        "INSERT INTO calls(address_id, service_id, count) VALUES (?, ?, 1)
         ON CONFLICT(address_id, service_id) DO UPDATE SET count = count + 1",
        params![address_id, service_id],
    )?;
    let count = conn.query_row(
        "SELECT count FROM calls WHERE address_id = ? AND service_id = ?",
        params![address_id, service_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Summary;
    use time::Duration;

    fn ssh_only(port: u16, proto: Protocol) -> Option<String> {
        (port == 22 && proto == Protocol::Tcp).then(|| "ssh".to_string())
    }

    fn none(_: u16, _: Protocol) -> Option<String> {
        None
    }

    fn event(ip: &str, port: u16, protocol: Protocol) -> InboundEvent {
        InboundEvent { dest_port: port, protocol, src_ip: ip.to_string() }
    }

    fn epoch(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
    }

    #[test]
    fn timestamp_matches_sqlite_datetime() {
        let at = OffsetDateTime::from_unix_timestamp(0).unwrap();
        assert_eq!(timestamp(at).unwrap(), "1970-01-01 00:00:00");
    }

    #[test]
    fn repeated_events_share_rows_and_count_up() {
        let mut db = Db::open_in_memory().unwrap();
        let ev = event("10.0.0.5", 22, Protocol::Tcp);
        let first = db.record(&ev, &ssh_only).unwrap();
        let second = db.record(&ev, &ssh_only).unwrap();
        assert_eq!(first.service_id, second.service_id);
        assert_eq!(first.address_id, second.address_id);
        assert_eq!((first.count, second.count), (1, 2));

        let s = db.summary().unwrap();
        assert_eq!((s.services, s.addresses, s.calls, s.events), (1, 1, 1, 2));
        let svc = db.service(22, Protocol::Tcp).unwrap().unwrap();
        assert_eq!(svc.name.as_deref(), Some("ssh"));
    }

    #[test]
    fn seen_timestamps_move_forward_only() {
        let mut db = Db::open_in_memory().unwrap();
        let ev = event("192.0.2.1", 443, Protocol::Tcp);
        db.record_at(&ev, &none, epoch(0)).unwrap();
        db.record_at(&ev, &none, epoch(60)).unwrap();
        let svc = db.service(443, Protocol::Tcp).unwrap().unwrap();
        assert_eq!(svc.first_seen, timestamp(epoch(0)).unwrap());
        assert_eq!(svc.last_seen, timestamp(epoch(60)).unwrap());

        // A clock step backwards must not rewind last_seen.
        db.record_at(&ev, &none, epoch(60) - Duration::seconds(30)).unwrap();
        let svc = db.service(443, Protocol::Tcp).unwrap().unwrap();
        assert_eq!(svc.first_seen, timestamp(epoch(0)).unwrap());
        assert_eq!(svc.last_seen, timestamp(epoch(60)).unwrap());

        let addr = &db.addresses().unwrap()[0];
        assert_eq!(addr.first_seen, timestamp(epoch(0)).unwrap());
        assert_eq!(addr.last_seen, timestamp(epoch(60)).unwrap());
        assert_eq!(addr.whois_record, None);
    }

    #[test]
    fn name_is_resolved_once() {
        let mut db = Db::open_in_memory().unwrap();
        let ev = event("10.0.0.5", 22, Protocol::Tcp);
        db.record(&ev, &none).unwrap();
        // A lookup that would now succeed does not rename the existing row.
        db.record(&ev, &ssh_only).unwrap();
        let svc = db.service(22, Protocol::Tcp).unwrap().unwrap();
        assert_eq!(svc.name, None);
    }

    #[test]
    fn protocols_are_distinct_services() {
        let mut db = Db::open_in_memory().unwrap();
        db.record(&event("10.0.0.5", 53, Protocol::Tcp), &none).unwrap();
        db.record(&event("10.0.0.5", 53, Protocol::Udp), &none).unwrap();
        db.record(&event("10.0.0.6", 53, Protocol::Udp), &none).unwrap();
        let s = db.summary().unwrap();
        assert_eq!((s.services, s.addresses, s.calls, s.events), (2, 2, 3, 3));
    }

    #[test]
    fn failed_step_rolls_back_the_event() {
        let mut db = Db::open_in_memory().unwrap();
        db.conn
            .execute_batch(
                "CREATE TRIGGER reject_calls BEFORE INSERT ON calls
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        let err = db.record(&event("10.0.0.5", 22, Protocol::Tcp), &none).unwrap_err();
        assert!(format!("{err:#}").contains("rejected"));
        assert_eq!(db.summary().unwrap(), Summary::default());

        db.conn.execute_batch("DROP TRIGGER reject_calls").unwrap();
        db.record(&event("10.0.0.5", 22, Protocol::Tcp), &none).unwrap();
        assert_eq!(db.summary().unwrap().calls, 1);
    }

    #[test]
    fn deleting_an_address_cascades_to_calls() {
        let mut db = Db::open_in_memory().unwrap();
        db.record(&event("10.0.0.5", 22, Protocol::Tcp), &none).unwrap();
        db.record(&event("10.0.0.6", 22, Protocol::Tcp), &none).unwrap();
        db.conn.execute("DELETE FROM addresses WHERE ip_address = '10.0.0.5'", []).unwrap();
        let calls = db.calls().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(db.summary().unwrap().services, 1);
    }
}

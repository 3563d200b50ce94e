//! Selects inbound TCP/UDP packets from decoded ulogd records.

use serde_json::{Map, Value};
use std::net::IpAddr;
use unmatched_core::{InboundEvent, Protocol, RecordError, DEFAULT_LOG_PREFIX};

pub const FIELD_PREFIX: &str = "oob.prefix";
pub const FIELD_SRC_IP: &str = "src_ip";
pub const FIELD_PROTOCOL: &str = "ip.protocol";
pub const FIELD_DEST_PORT: &str = "dest_port";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept(InboundEvent),
    /// Logged by another rule sharing the socket.
    WrongPrefix,
    UnsupportedProtocol(i64),
}

#[derive(Debug, Clone)]
pub struct EventFilter {
    prefix: String,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_PREFIX)
    }
}

impl EventFilter {
    pub fn new(prefix: impl Into<String>) -> Self {
        EventFilter { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Decide whether `record` is one of ours and, if so, normalize it.
    ///
    /// Fields are checked in log order: the prefix first so foreign records
    /// are skipped whatever their shape, then source address and protocol.
    /// The destination port is only required once the protocol is known to
    /// carry one.
    pub fn evaluate(&self, record: &Value) -> Result<Verdict, RecordError> {
        let obj = record.as_object().ok_or(RecordError::NotAnObject)?;

        if str_field(obj, FIELD_PREFIX)? != self.prefix {
            return Ok(Verdict::WrongPrefix);
        }

        let src = str_field(obj, FIELD_SRC_IP)?;
        let ip: IpAddr = src
            .trim()
            .parse()
            .map_err(|_| RecordError::InvalidAddress(src.to_string()))?;

        let ip_protocol = int_field(obj, FIELD_PROTOCOL)?;
        let Some(protocol) = Protocol::from_ip_number(ip_protocol) else {
            return Ok(Verdict::UnsupportedProtocol(ip_protocol));
        };

        let port = int_field(obj, FIELD_DEST_PORT)?;
        let dest_port = u16::try_from(port).map_err(|_| RecordError::PortOutOfRange(port))?;

        Ok(Verdict::Accept(InboundEvent { dest_port, protocol, src_ip: ip.to_string() }))
    }
}

fn field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, RecordError> {
    match obj.get(name) {
        None | Some(Value::Null) => Err(RecordError::MissingField(name)),
        Some(v) => Ok(v),
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a str, RecordError> {
    field(obj, name)?
        .as_str()
        .ok_or(RecordError::WrongType { field: name, expected: "a string" })
}

fn int_field(obj: &Map<String, Value>, name: &'static str) -> Result<i64, RecordError> {
    field(obj, name)?
        .as_i64()
        .ok_or(RecordError::WrongType { field: name, expected: "an integer" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(proto: i64) -> Value {
        json!({
            "oob.prefix": "nft_in_unmtch",
            "src_ip": "10.0.0.5",
            "ip.protocol": proto,
            "dest_port": 22,
            "oob.in": "eth0",
        })
    }

    #[test]
    fn tcp_and_udp_are_accepted() {
        let f = EventFilter::default();
        assert_eq!(
            f.evaluate(&record(6)).unwrap(),
            Verdict::Accept(InboundEvent { dest_port: 22, protocol: Protocol::Tcp, src_ip: "10.0.0.5".into() })
        );
        match f.evaluate(&record(17)).unwrap() {
            Verdict::Accept(ev) => assert_eq!(ev.protocol, Protocol::Udp),
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn icmp_is_skipped_without_port() {
        let f = EventFilter::default();
        let rec = json!({"oob.prefix": "nft_in_unmtch", "src_ip": "10.0.0.5", "ip.protocol": 1});
        assert_eq!(f.evaluate(&rec).unwrap(), Verdict::UnsupportedProtocol(1));
    }

    #[test]
    fn foreign_prefix_is_skipped_before_shape_checks() {
        let f = EventFilter::default();
        let rec = json!({"oob.prefix": "nft_out_drop"});
        assert_eq!(f.evaluate(&rec).unwrap(), Verdict::WrongPrefix);
    }

    #[test]
    fn custom_prefix() {
        let f = EventFilter::new("lab");
        assert_eq!(f.evaluate(&record(6)).unwrap(), Verdict::WrongPrefix);
    }

    #[test]
    fn missing_port_is_malformed() {
        let f = EventFilter::default();
        let rec = json!({"oob.prefix": "nft_in_unmtch", "src_ip": "10.0.0.5", "ip.protocol": 6});
        assert_eq!(f.evaluate(&rec), Err(RecordError::MissingField(FIELD_DEST_PORT)));
    }

    #[test]
    fn wrong_shapes_are_malformed() {
        let f = EventFilter::default();
        assert_eq!(f.evaluate(&json!([1, 2])), Err(RecordError::NotAnObject));
        assert_eq!(f.evaluate(&json!({"src_ip": "1.2.3.4"})), Err(RecordError::MissingField(FIELD_PREFIX)));

        let mut rec = record(6);
        rec["dest_port"] = json!("22");
        assert!(matches!(f.evaluate(&rec), Err(RecordError::WrongType { field: FIELD_DEST_PORT, .. })));

        let mut rec = record(6);
        rec["dest_port"] = json!(70000);
        assert_eq!(f.evaluate(&rec), Err(RecordError::PortOutOfRange(70000)));

        let mut rec = record(6);
        rec["src_ip"] = json!("not-an-ip");
        assert!(matches!(f.evaluate(&rec), Err(RecordError::InvalidAddress(_))));
    }

    #[test]
    fn ipv6_sources_are_normalized() {
        let f = EventFilter::default();
        let mut rec = record(6);
        rec["src_ip"] = json!("2001:DB8:0:0::1");
        match f.evaluate(&rec).unwrap() {
            Verdict::Accept(ev) => assert_eq!(ev.src_ip, "2001:db8::1"),
            other => panic!("unexpected verdict {other:?}"),
        }
    }
}

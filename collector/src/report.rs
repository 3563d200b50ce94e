use anyhow::Result;
use clap::ValueEnum;
use inventory_sqlite::{CallReport, Summary};
use std::io::Write;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat { Text, Json, Jsonl, Csv }

pub fn write_calls(w: &mut impl Write, rows: &[CallReport], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            writeln!(w, "{:<39} {:>11} {:<16} {:>8}  {:<19}  {:<19}", "ADDRESS", "SERVICE", "NAME", "COUNT", "ADDR FIRST SEEN", "ADDR LAST SEEN")?;
            for r in rows {
                let service = format!("{}/{}", r.port, r.proto);
                writeln!(
                    w,
                    "{:<39} {:>11} {:<16} {:>8}  {:<19}  {:<19}",
                    r.ip_address,
                    service,
                    r.service_name.as_deref().unwrap_or("-"),
                    r.count,
                    r.address_first_seen,
                    r.address_last_seen
                )?;
            }
        }
        OutputFormat::Json => writeln!(w, "{}", serde_json::to_string_pretty(rows)?)?,
        OutputFormat::Jsonl => {
            for r in rows {
                writeln!(w, "{}", serde_json::to_string(r)?)?;
            }
        }
        OutputFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(w);
            for r in rows {
                wtr.serialize(r)?;
            }
            wtr.flush()?;
        }
    }
    Ok(())
}

pub fn write_summary(w: &mut impl Write, s: &Summary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            writeln!(w, "services:  {}", s.services)?;
            writeln!(w, "addresses: {}", s.addresses)?;
            writeln!(w, "calls:     {}", s.calls)?;
            writeln!(w, "events:    {}", s.events)?;
        }
        OutputFormat::Json | OutputFormat::Jsonl => writeln!(w, "{}", serde_json::to_string(s)?)?,
        OutputFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(w);
            wtr.serialize(s)?;
            wtr.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<CallReport> {
        vec![CallReport {
            ip_address: "10.0.0.5".into(),
            port: 22,
            proto: "tcp".into(),
            service_name: Some("ssh".into()),
            count: 7,
            address_first_seen: "2024-01-01 00:00:00".into(),
            address_last_seen: "2024-01-02 00:00:00".into(),
        }]
    }

    fn render(format: OutputFormat) -> String {
        let mut out = Vec::new();
        write_calls(&mut out, &rows(), format).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn text_has_header_and_row() {
        let s = render(OutputFormat::Text);
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("ADDR FIRST SEEN"));
        assert!(lines[1].contains("22/tcp"));
        assert!(lines[1].contains("ssh"));
    }

    #[test]
    fn jsonl_is_one_object_per_line() {
        let s = render(OutputFormat::Jsonl);
        let v: serde_json::Value = serde_json::from_str(s.trim()).unwrap();
        assert_eq!(v["count"], 7);
        assert_eq!(v["service_name"], "ssh");
    }

    #[test]
    fn csv_has_header() {
        let s = render(OutputFormat::Csv);
        let mut lines = s.lines();
        assert_eq!(lines.next().unwrap(), "ip_address,port,proto,service_name,count,address_first_seen,address_last_seen");
        assert!(lines.next().unwrap().starts_with("10.0.0.5,22,tcp,ssh,7,"));
    }

    #[test]
    fn summary_as_json() {
        let mut out = Vec::new();
        let s = Summary { services: 1, addresses: 2, calls: 3, events: 9 };
        write_summary(&mut out, &s, OutputFormat::Json).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["events"], 9);
    }
}

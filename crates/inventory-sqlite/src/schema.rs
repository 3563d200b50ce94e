// Table layout matches databases written by earlier collector releases, so
// existing files open without migration. Unique indexes enforce the upsert keys.
pub const INIT_SCHEMA: &str = r#"
BEGIN;

CREATE TABLE IF NOT EXISTS services (
  id          integer PRIMARY KEY,
  first_seen  text NOT NULL,
  last_seen   text NOT NULL,
  port        integer NOT NULL,
  proto       text NOT NULL,
  name        text
);

CREATE TABLE IF NOT EXISTS addresses (
  id            integer PRIMARY KEY,
  first_seen    text NOT NULL,
  last_seen     text NOT NULL,
  ip_address    text NOT NULL,
  whois_record  text
);

CREATE TABLE IF NOT EXISTS calls (
  id          integer PRIMARY KEY,
  address_id  integer NOT NULL,
  service_id  integer NOT NULL,
  count       integer NOT NULL,
  FOREIGN KEY (address_id) REFERENCES addresses(id) ON UPDATE CASCADE ON DELETE CASCADE,
  FOREIGN KEY (service_id) REFERENCES services(id) ON UPDATE CASCADE ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_services_key ON services(port, proto);
CREATE UNIQUE INDEX IF NOT EXISTS idx_addresses_key ON addresses(ip_address);
CREATE UNIQUE INDEX IF NOT EXISTS idx_calls_key ON calls(address_id, service_id);
CREATE INDEX IF NOT EXISTS idx_calls_service ON calls(service_id);

COMMIT;
"#
;

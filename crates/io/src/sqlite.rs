// Relational store for circuits, telemetry and reconciliation output, using SQLite

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use circuitmap_recon::model::{
    CircuitRecord, CircuitRole, Confidence, EnrichedAssignment, ExclusionReason, GuardReason, GuardedField,
    InterfaceId, MatchReason, OverrideAudit, RecordSource, RegistryOwnership, SiteStatus, WanObservation,
};
use circuitmap_recon::store::{CommitReceipt, ReconStore, SiteCommit, SiteSnapshot};
use circuitmap_recon::StoreError;
use circuitmap_registry::OwnershipCache;

/// Store schema version.
/// Increment when the schema changes in a way older builds can't read.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS circuits (
    id TEXT PRIMARY KEY,
    site TEXT NOT NULL,
    role TEXT NOT NULL,              -- Primary | Secondary
    carrier TEXT NOT NULL,
    speed TEXT NOT NULL DEFAULT '',
    monthly_cost_cents INTEGER NOT NULL DEFAULT 0,
    ip TEXT,
    status TEXT NOT NULL,
    source TEXT NOT NULL,            -- ordering_system | manual | automated
    manual_override INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS circuits_site ON circuits (site);

CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site TEXT NOT NULL,
    interface TEXT NOT NULL,         -- wan1 | wan2
    observed_ip TEXT,
    provisioned_ip TEXT,
    notes TEXT NOT NULL DEFAULT '',
    device_tags TEXT NOT NULL DEFAULT '[]',   -- JSON array
    observed_at TEXT NOT NULL        -- RFC 3339
);
CREATE INDEX IF NOT EXISTS observations_site ON observations (site);

CREATE TABLE IF NOT EXISTS assignments (
    site TEXT NOT NULL,
    interface TEXT NOT NULL,
    circuit_id TEXT,
    role TEXT,
    provider TEXT NOT NULL,
    speed TEXT NOT NULL,
    confidence TEXT NOT NULL,
    match_reason TEXT NOT NULL,
    exclusion TEXT,
    flipped INTEGER NOT NULL DEFAULT 0,
    observed_ip TEXT,
    registry_org TEXT,
    confirmed INTEGER NOT NULL DEFAULT 0,
    reconciled_at TEXT NOT NULL,
    PRIMARY KEY (site, interface)
);

CREATE TABLE IF NOT EXISTS site_status (
    site TEXT PRIMARY KEY,
    confidence TEXT NOT NULL,
    exclusion TEXT,
    reconciled_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS override_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site TEXT NOT NULL,
    interface TEXT,
    circuit_id TEXT,
    field TEXT NOT NULL,             -- provider | speed
    old_value TEXT NOT NULL,
    attempted_value TEXT NOT NULL,
    reason TEXT NOT NULL,            -- manual_override | confirmed
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS registry_cache (
    ip TEXT PRIMARY KEY,
    organization TEXT,
    resolved_at TEXT NOT NULL
);
"#;

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_ts(column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Schema(format!("{column} '{raw}': {e}")))
}

fn parse_enum<T>(column: &str, raw: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T, StoreError> {
    parse(raw).ok_or_else(|| StoreError::Schema(format!("unknown {column} '{raw}'")))
}

fn parse_opt_enum<T>(
    column: &str,
    raw: Option<String>,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, StoreError> {
    raw.map(|r| parse_enum(column, &r, parse)).transpose()
}

// ============================================================================
// Row shapes (raw column values, converted outside the rusqlite closures)
// ============================================================================

struct CircuitRow {
    id: String,
    site: String,
    role: String,
    carrier: String,
    speed: String,
    monthly_cost_cents: i64,
    ip: Option<String>,
    status: String,
    source: String,
    manual_override: bool,
}

impl CircuitRow {
    fn into_record(self) -> Result<CircuitRecord, StoreError> {
        Ok(CircuitRecord {
            role: parse_enum("role", &self.role, CircuitRole::parse)?,
            source: parse_enum("source", &self.source, RecordSource::parse)?,
            id: self.id,
            site: self.site,
            carrier: self.carrier,
            speed: self.speed,
            monthly_cost_cents: self.monthly_cost_cents,
            ip: self.ip,
            status: self.status,
            manual_override: self.manual_override,
        })
    }
}

struct ObservationRow {
    site: String,
    interface: String,
    observed_ip: Option<String>,
    provisioned_ip: Option<String>,
    notes: String,
    device_tags: String,
    observed_at: String,
}

impl ObservationRow {
    fn into_observation(self) -> Result<WanObservation, StoreError> {
        let device_tags: Vec<String> = serde_json::from_str(&self.device_tags)
            .map_err(|e| StoreError::Schema(format!("device_tags '{}': {e}", self.device_tags)))?;
        Ok(WanObservation {
            interface: parse_enum("interface", &self.interface, InterfaceId::parse)?,
            observed_at: parse_ts("observed_at", &self.observed_at)?,
            site: self.site,
            observed_ip: self.observed_ip,
            provisioned_ip: self.provisioned_ip,
            notes: self.notes,
            device_tags,
        })
    }
}

struct AssignmentRow {
    site: String,
    interface: String,
    circuit_id: Option<String>,
    role: Option<String>,
    provider: String,
    speed: String,
    confidence: String,
    match_reason: String,
    exclusion: Option<String>,
    flipped: bool,
    observed_ip: Option<String>,
    registry_org: Option<String>,
    confirmed: bool,
    reconciled_at: String,
}

impl AssignmentRow {
    fn into_assignment(self) -> Result<EnrichedAssignment, StoreError> {
        Ok(EnrichedAssignment {
            interface: parse_enum("interface", &self.interface, InterfaceId::parse)?,
            role: parse_opt_enum("role", self.role, CircuitRole::parse)?,
            confidence: parse_enum("confidence", &self.confidence, Confidence::parse)?,
            match_reason: parse_enum("match_reason", &self.match_reason, MatchReason::parse)?,
            exclusion: parse_opt_enum("exclusion", self.exclusion, ExclusionReason::parse)?,
            reconciled_at: parse_ts("reconciled_at", &self.reconciled_at)?,
            site: self.site,
            circuit_id: self.circuit_id,
            provider: self.provider,
            speed: self.speed,
            flipped: self.flipped,
            observed_ip: self.observed_ip,
            registry_org: self.registry_org,
            confirmed: self.confirmed,
        })
    }
}

struct AuditRow {
    site: String,
    interface: Option<String>,
    circuit_id: Option<String>,
    field: String,
    old_value: String,
    attempted_value: String,
    reason: String,
    recorded_at: String,
}

impl AuditRow {
    fn into_audit(self) -> Result<OverrideAudit, StoreError> {
        Ok(OverrideAudit {
            interface: parse_opt_enum("interface", self.interface, InterfaceId::parse)?,
            field: parse_enum("field", &self.field, GuardedField::parse)?,
            reason: parse_enum("reason", &self.reason, GuardReason::parse)?,
            recorded_at: parse_ts("recorded_at", &self.recorded_at)?,
            site: self.site,
            circuit_id: self.circuit_id,
            old_value: self.old_value,
            attempted_value: self.attempted_value,
        })
    }
}

// ============================================================================
// Store
// ============================================================================

/// SQLite-backed [`ReconStore`] and [`OwnershipCache`].
///
/// One connection behind a mutex; every site commit is a single transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;

        let stored: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
            .optional()
            .map_err(backend)?;
        match stored {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )
                .map_err(backend)?;
            }
            Some(v) => {
                let version: u32 = v
                    .parse()
                    .map_err(|_| StoreError::Schema(format!("bad schema_version '{v}'")))?;
                if version > SCHEMA_VERSION {
                    return Err(StoreError::Schema(format!(
                        "store schema version {version} is newer than supported version {SCHEMA_VERSION}"
                    )));
                }
            }
        }

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn load_circuits(conn: &Connection, site: &str) -> Result<Vec<CircuitRecord>, StoreError> {
        let mut stmt = conn
            .prepare(
                "SELECT id, site, role, carrier, speed, monthly_cost_cents, ip, status, source, manual_override
                 FROM circuits WHERE site = ?1 ORDER BY id",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![site], |row| {
                Ok(CircuitRow {
                    id: row.get(0)?,
                    site: row.get(1)?,
                    role: row.get(2)?,
                    carrier: row.get(3)?,
                    speed: row.get(4)?,
                    monthly_cost_cents: row.get(5)?,
                    ip: row.get(6)?,
                    status: row.get(7)?,
                    source: row.get(8)?,
                    manual_override: row.get(9)?,
                })
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        rows.into_iter().map(CircuitRow::into_record).collect()
    }

    fn load_observations(conn: &Connection, site: &str) -> Result<Vec<WanObservation>, StoreError> {
        let mut stmt = conn
            .prepare(
                "SELECT site, interface, observed_ip, provisioned_ip, notes, device_tags, observed_at
                 FROM observations WHERE site = ?1 ORDER BY id",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![site], |row| {
                Ok(ObservationRow {
                    site: row.get(0)?,
                    interface: row.get(1)?,
                    observed_ip: row.get(2)?,
                    provisioned_ip: row.get(3)?,
                    notes: row.get(4)?,
                    device_tags: row.get(5)?,
                    observed_at: row.get(6)?,
                })
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        rows.into_iter().map(ObservationRow::into_observation).collect()
    }

    fn load_assignments(conn: &Connection, site: &str) -> Result<Vec<EnrichedAssignment>, StoreError> {
        let mut stmt = conn
            .prepare(
                "SELECT site, interface, circuit_id, role, provider, speed, confidence, match_reason,
                        exclusion, flipped, observed_ip, registry_org, confirmed, reconciled_at
                 FROM assignments WHERE site = ?1 ORDER BY interface",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![site], |row| {
                Ok(AssignmentRow {
                    site: row.get(0)?,
                    interface: row.get(1)?,
                    circuit_id: row.get(2)?,
                    role: row.get(3)?,
                    provider: row.get(4)?,
                    speed: row.get(5)?,
                    confidence: row.get(6)?,
                    match_reason: row.get(7)?,
                    exclusion: row.get(8)?,
                    flipped: row.get(9)?,
                    observed_ip: row.get(10)?,
                    registry_org: row.get(11)?,
                    confirmed: row.get(12)?,
                    reconciled_at: row.get(13)?,
                })
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        rows.into_iter().map(AssignmentRow::into_assignment).collect()
    }

    fn write_commit(tx: &Transaction<'_>, commit: &SiteCommit) -> Result<CommitReceipt, rusqlite::Error> {
        let site = commit.status.site.as_str();
        let mut receipt = CommitReceipt::default();

        for update in &commit.circuit_updates {
            receipt.circuits_updated += tx.execute(
                "UPDATE circuits SET carrier = ?1, speed = ?2
                 WHERE id = ?3 AND source != 'ordering_system' AND manual_override = 0",
                params![update.carrier, update.speed, update.circuit_id],
            )?;
        }

        for c in &commit.new_circuits {
            receipt.circuits_created += tx.execute(
                "INSERT OR IGNORE INTO circuits
                 (id, site, role, carrier, speed, monthly_cost_cents, ip, status, source, manual_override)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    c.id,
                    c.site,
                    c.role.as_str(),
                    c.carrier,
                    c.speed,
                    c.monthly_cost_cents,
                    c.ip,
                    c.status,
                    c.source.as_str(),
                    c.manual_override
                ],
            )?;
        }

        tx.execute("DELETE FROM assignments WHERE site = ?1", params![site])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO assignments
                 (site, interface, circuit_id, role, provider, speed, confidence, match_reason,
                  exclusion, flipped, observed_ip, registry_org, confirmed, reconciled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for a in &commit.assignments {
                stmt.execute(params![
                    a.site,
                    a.interface.as_str(),
                    a.circuit_id,
                    a.role.map(|r| r.as_str()),
                    a.provider,
                    a.speed,
                    a.confidence.as_str(),
                    a.match_reason.as_str(),
                    a.exclusion.map(|e| e.as_str()),
                    a.flipped,
                    a.observed_ip,
                    a.registry_org,
                    a.confirmed,
                    ts(&a.reconciled_at)
                ])?;
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO site_status (site, confidence, exclusion, reconciled_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                site,
                commit.status.confidence.as_str(),
                commit.status.exclusion.map(|e| e.as_str()),
                ts(&commit.status.reconciled_at)
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO override_audit
                 (site, interface, circuit_id, field, old_value, attempted_value, reason, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for audit in &commit.audits {
                stmt.execute(params![
                    audit.site,
                    audit.interface.map(|i| i.as_str()),
                    audit.circuit_id,
                    audit.field.as_str(),
                    audit.old_value,
                    audit.attempted_value,
                    audit.reason.as_str(),
                    ts(&audit.recorded_at)
                ])?;
            }
        }

        Ok(receipt)
    }
}

impl ReconStore for SqliteStore {
    fn list_sites(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT site FROM circuits UNION SELECT site FROM observations ORDER BY site")
            .map_err(backend)?;
        let sites = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        Ok(sites)
    }

    fn load_site(&self, site: &str) -> Result<SiteSnapshot, StoreError> {
        let conn = self.conn.lock();
        Ok(SiteSnapshot {
            circuits: Self::load_circuits(&conn, site)?,
            observations: Self::load_observations(&conn, site)?,
            previous: Self::load_assignments(&conn, site)?,
        })
    }

    fn commit_site(&self, commit: &SiteCommit) -> Result<CommitReceipt, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(backend)?;
        // Dropping `tx` on error rolls everything back.
        let receipt = Self::write_commit(&tx, commit)
            .map_err(|e| StoreError::WriteFailed(format!("site {}: {e}", commit.status.site)))?;
        tx.commit()
            .map_err(|e| StoreError::WriteFailed(format!("site {}: {e}", commit.status.site)))?;
        Ok(receipt)
    }

    fn site_status(&self, site: &str) -> Result<Option<SiteStatus>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT site, confidence, exclusion, reconciled_at FROM site_status WHERE site = ?1",
                params![site],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(backend)?;
        row.map(|(site, confidence, exclusion, reconciled_at)| {
            Ok(SiteStatus {
                site,
                confidence: parse_enum("confidence", &confidence, Confidence::parse)?,
                exclusion: parse_opt_enum("exclusion", exclusion, ExclusionReason::parse)?,
                reconciled_at: parse_ts("reconciled_at", &reconciled_at)?,
            })
        })
        .transpose()
    }

    fn audits(&self, site: Option<&str>) -> Result<Vec<OverrideAudit>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT site, interface, circuit_id, field, old_value, attempted_value, reason, recorded_at
                 FROM override_audit WHERE (?1 IS NULL OR site = ?1) ORDER BY id",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![site], |row| {
                Ok(AuditRow {
                    site: row.get(0)?,
                    interface: row.get(1)?,
                    circuit_id: row.get(2)?,
                    field: row.get(3)?,
                    old_value: row.get(4)?,
                    attempted_value: row.get(5)?,
                    reason: row.get(6)?,
                    recorded_at: row.get(7)?,
                })
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        rows.into_iter().map(AuditRow::into_audit).collect()
    }

    fn confirm_assignment(
        &self,
        site: &str,
        interface: InterfaceId,
        provider: Option<&str>,
        speed: Option<&str>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE assignments
                 SET confirmed = 1, provider = COALESCE(?3, provider), speed = COALESCE(?4, speed)
                 WHERE site = ?1 AND interface = ?2",
                params![site, interface.as_str(), provider, speed],
            )
            .map_err(backend)?;
        Ok(changed > 0)
    }

    fn upsert_circuits(&self, circuits: &[CircuitRecord]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(backend)?;
        let mut written = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO circuits
                     (id, site, role, carrier, speed, monthly_cost_cents, ip, status, source, manual_override)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(id) DO UPDATE SET
                        site = excluded.site, role = excluded.role, carrier = excluded.carrier,
                        speed = excluded.speed, monthly_cost_cents = excluded.monthly_cost_cents,
                        ip = excluded.ip, status = excluded.status, source = excluded.source,
                        manual_override = excluded.manual_override
                     WHERE circuits.manual_override = 0",
                )
                .map_err(backend)?;
            for c in circuits {
                written += stmt.execute(params![
                    c.id,
                    c.site,
                    c.role.as_str(),
                    c.carrier,
                    c.speed,
                    c.monthly_cost_cents,
                    c.ip,
                    c.status,
                    c.source.as_str(),
                    c.manual_override
                ])
                .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;
        Ok(written)
    }

    fn replace_observations(&self, observations: &[WanObservation]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(backend)?;
        tx.execute("DELETE FROM observations", []).map_err(backend)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO observations
                     (site, interface, observed_ip, provisioned_ip, notes, device_tags, observed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(backend)?;
            for o in observations {
                let tags = serde_json::to_string(&o.device_tags)
                    .map_err(|e| StoreError::Backend(format!("device_tags: {e}")))?;
                stmt.execute(params![
                    o.site,
                    o.interface.as_str(),
                    o.observed_ip,
                    o.provisioned_ip,
                    o.notes,
                    tags,
                    ts(&o.observed_at)
                ])
                .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;
        Ok(observations.len())
    }
}

impl OwnershipCache for SqliteStore {
    fn get(&self, ip: &str) -> Result<Option<RegistryOwnership>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT ip, organization, resolved_at FROM registry_cache WHERE ip = ?1",
                params![ip],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()
            .map_err(backend)?;
        row.map(|(ip, organization, resolved_at)| {
            Ok(RegistryOwnership { ip, organization, resolved_at: parse_ts("resolved_at", &resolved_at)? })
        })
        .transpose()
    }

    fn put(&self, entry: &RegistryOwnership) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO registry_cache (ip, organization, resolved_at) VALUES (?1, ?2, ?3)",
            params![entry.ip, entry.organization, ts(&entry.resolved_at)],
        )
        .map_err(backend)?;
        Ok(())
    }
}

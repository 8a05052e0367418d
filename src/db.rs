// 🗄️ Venue Record Store - SQLite + WAL
// Venue records, audit events, CSV import, and the store seam the dedup engine runs against

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::merge::MergedPayload;

// ============================================================================
// VENUE RECORD
// ============================================================================

/// One catalog entry describing a physical location.
/// `id` is the only stable reference used during merge and delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: String,
    pub name: String,

    /// Full postal address as free text
    #[serde(default)]
    pub address: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub country: String,
    #[serde(default)]
    pub postal_code: Option<String>,

    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,

    #[serde(default)]
    pub description: Option<String>,

    // Photo references
    #[serde(default)]
    pub exterior_photo: Option<String>,
    #[serde(default)]
    pub interior_photo: Option<String>,
    #[serde(default)]
    pub strip_photos: Vec<String>,
    #[serde(default)]
    pub ai_preview: Option<String>,

    // Machine classification
    #[serde(default)]
    pub machine_type: Option<String>,
    /// Secondary photo-type classification (e.g. "digital", "chemical")
    #[serde(default)]
    pub photo_type: Option<String>,
    #[serde(default)]
    pub machine_model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,

    #[serde(default)]
    pub hours: Option<String>,
    #[serde(default)]
    pub cost: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,

    // Provenance
    #[serde(default)]
    pub source_names: Vec<String>,
    #[serde(default)]
    pub source_urls: Vec<String>,
    #[serde(default)]
    pub primary_source: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub geocoded_at: Option<DateTime<Utc>>,

    pub slug: String,
}

impl Venue {
    /// Minimal record; everything optional left empty
    pub fn new(id: &str, name: &str, city: &str, country: &str, slug: &str) -> Self {
        Venue {
            id: id.to_string(),
            name: name.to_string(),
            address: None,
            city: city.to_string(),
            state: None,
            country: country.to_string(),
            postal_code: None,
            latitude: None,
            longitude: None,
            description: None,
            exterior_photo: None,
            interior_photo: None,
            strip_photos: Vec::new(),
            ai_preview: None,
            machine_type: None,
            photo_type: None,
            machine_model: None,
            manufacturer: None,
            hours: None,
            cost: None,
            features: Vec::new(),
            source_names: Vec::new(),
            source_urls: Vec::new(),
            primary_source: None,
            created_at: None,
            geocoded_at: None,
            slug: slug.to_string(),
        }
    }

    /// Latitude and longitude, only when both are populated
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// Slug ends in `-<digits>`, the shape later-created duplicates get
    pub fn has_numbered_slug(&self) -> bool {
        match self.slug.rsplit_once('-') {
            Some((head, tail)) => {
                !head.is_empty() && !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit())
            }
            None => false,
        }
    }
}

/// Treat blank strings as absent
pub fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// ============================================================================
// STORE SEAM
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("venue {0} not found")]
    NotFound(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Generic record store the engine reads from and mutates.
/// This engine is assumed to be the only writer while a run is in progress.
pub trait VenueStore {
    /// Bulk read of every venue, ordered by creation time then id
    fn fetch_all(&self) -> Result<Vec<Venue>, StoreError>;

    /// Write a merged payload onto the keeper record
    fn update_fields(&self, id: &str, payload: &MergedPayload) -> Result<(), StoreError>;

    /// Remove a record by identifier
    fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Event for the audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; a no-op on in-memory databases
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Venues Table (list-valued fields stored as JSON arrays)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS venues (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT,
            city TEXT NOT NULL,
            state TEXT,
            country TEXT NOT NULL,
            postal_code TEXT,
            latitude REAL,
            longitude REAL,
            description TEXT,
            exterior_photo TEXT,
            interior_photo TEXT,
            strip_photos TEXT NOT NULL DEFAULT '[]',
            ai_preview TEXT,
            machine_type TEXT,
            photo_type TEXT,
            machine_model TEXT,
            manufacturer TEXT,
            hours TEXT,
            cost TEXT,
            features TEXT NOT NULL DEFAULT '[]',
            source_names TEXT NOT NULL DEFAULT '[]',
            source_urls TEXT NOT NULL DEFAULT '[]',
            primary_source TEXT,
            created_at TEXT,
            geocoded_at TEXT,
            slug TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_venues_city ON venues(city)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_venues_created_at ON venues(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// Flat CSV row; list fields are `|`-separated
#[derive(Debug, Deserialize)]
struct CsvVenueRow {
    id: String,
    name: String,
    #[serde(default)]
    address: Option<String>,
    city: String,
    #[serde(default)]
    state: Option<String>,
    country: String,
    #[serde(default)]
    postal_code: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    exterior_photo: Option<String>,
    #[serde(default)]
    interior_photo: Option<String>,
    #[serde(default)]
    strip_photos: Option<String>,
    #[serde(default)]
    ai_preview: Option<String>,
    #[serde(default)]
    machine_type: Option<String>,
    #[serde(default)]
    photo_type: Option<String>,
    #[serde(default)]
    machine_model: Option<String>,
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(default)]
    hours: Option<String>,
    #[serde(default)]
    cost: Option<String>,
    #[serde(default)]
    features: Option<String>,
    #[serde(default)]
    source_names: Option<String>,
    #[serde(default)]
    source_urls: Option<String>,
    #[serde(default)]
    primary_source: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    geocoded_at: Option<String>,
    slug: String,
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|s| {
            s.split('|')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl From<CsvVenueRow> for Venue {
    fn from(row: CsvVenueRow) -> Self {
        Venue {
            id: row.id,
            name: row.name,
            address: blank_to_none(row.address),
            city: row.city,
            state: blank_to_none(row.state),
            country: row.country,
            postal_code: blank_to_none(row.postal_code),
            latitude: row.latitude,
            longitude: row.longitude,
            description: blank_to_none(row.description),
            exterior_photo: blank_to_none(row.exterior_photo),
            interior_photo: blank_to_none(row.interior_photo),
            strip_photos: split_list(row.strip_photos),
            ai_preview: blank_to_none(row.ai_preview),
            machine_type: blank_to_none(row.machine_type),
            photo_type: blank_to_none(row.photo_type),
            machine_model: blank_to_none(row.machine_model),
            manufacturer: blank_to_none(row.manufacturer),
            hours: blank_to_none(row.hours),
            cost: blank_to_none(row.cost),
            features: split_list(row.features),
            source_names: split_list(row.source_names),
            source_urls: split_list(row.source_urls),
            primary_source: blank_to_none(row.primary_source),
            created_at: parse_timestamp(row.created_at),
            geocoded_at: parse_timestamp(row.geocoded_at),
            slug: row.slug,
        }
    }
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<Venue>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;

    let mut venues = Vec::new();

    for (line, result) in rdr.deserialize::<CsvVenueRow>().enumerate() {
        let row = result.with_context(|| format!("Failed to deserialize venue on row {}", line + 1))?;
        let mut venue = Venue::from(row);
        if venue.created_at.is_none() {
            venue.created_at = Some(Utc::now());
        }
        venues.push(venue);
    }

    Ok(venues)
}

// ============================================================================
// READ / WRITE
// ============================================================================

const VENUE_COLUMNS: &str = "id, name, address, city, state, country, postal_code,
    latitude, longitude, description, exterior_photo, interior_photo, strip_photos,
    ai_preview, machine_type, photo_type, machine_model, manufacturer, hours, cost,
    features, source_names, source_urls, primary_source, created_at, geocoded_at, slug";

fn parse_list(json: Option<String>, column: &str, id: &str) -> Vec<String> {
    let Some(raw) = json else {
        return Vec::new();
    };
    match serde_json::from_str(&raw) {
        Ok(list) => list,
        Err(e) => {
            warn!("Unreadable {} list on venue {}, treating as empty: {}", column, id, e);
            Vec::new()
        }
    }
}

fn venue_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Venue> {
    let id: String = row.get(0)?;
    Ok(Venue {
        strip_photos: parse_list(row.get(12)?, "strip_photos", &id),
        features: parse_list(row.get(20)?, "features", &id),
        source_names: parse_list(row.get(21)?, "source_names", &id),
        source_urls: parse_list(row.get(22)?, "source_urls", &id),
        id,
        name: row.get(1)?,
        address: row.get(2)?,
        city: row.get(3)?,
        state: row.get(4)?,
        country: row.get(5)?,
        postal_code: row.get(6)?,
        latitude: row.get(7)?,
        longitude: row.get(8)?,
        description: row.get(9)?,
        exterior_photo: row.get(10)?,
        interior_photo: row.get(11)?,
        ai_preview: row.get(13)?,
        machine_type: row.get(14)?,
        photo_type: row.get(15)?,
        machine_model: row.get(16)?,
        manufacturer: row.get(17)?,
        hours: row.get(18)?,
        cost: row.get(19)?,
        primary_source: row.get(23)?,
        created_at: parse_timestamp(row.get(24)?),
        geocoded_at: parse_timestamp(row.get(25)?),
        slug: row.get(26)?,
    })
}

/// Insert venues, skipping ids (or slugs) already present.
/// Returns how many rows were actually inserted.
pub fn insert_venues(conn: &Connection, venues: &[Venue]) -> Result<usize> {
    let mut inserted = 0;
    let mut duplicates = 0;

    for venue in venues {
        let result = conn.execute(
            &format!(
                "INSERT INTO venues ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                 ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
                VENUE_COLUMNS
            ),
            params![
                venue.id,
                venue.name,
                venue.address,
                venue.city,
                venue.state,
                venue.country,
                venue.postal_code,
                venue.latitude,
                venue.longitude,
                venue.description,
                venue.exterior_photo,
                venue.interior_photo,
                serde_json::to_string(&venue.strip_photos)?,
                venue.ai_preview,
                venue.machine_type,
                venue.photo_type,
                venue.machine_model,
                venue.manufacturer,
                venue.hours,
                venue.cost,
                serde_json::to_string(&venue.features)?,
                serde_json::to_string(&venue.source_names)?,
                serde_json::to_string(&venue.source_urls)?,
                venue.primary_source,
                venue.created_at.map(|dt| dt.to_rfc3339()),
                venue.geocoded_at.map(|dt| dt.to_rfc3339()),
                venue.slug,
            ],
        );

        match result {
            Ok(_) => {
                inserted += 1;

                let event = Event::new(
                    "venue_added",
                    "venue",
                    &venue.id,
                    serde_json::json!({
                        "name": venue.name,
                        "city": venue.city,
                        "sources": venue.source_names,
                    }),
                    "csv_importer",
                );
                if let Err(e) = insert_event(conn, &event) {
                    warn!("Failed to record import event for {}: {}", venue.id, e);
                }
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                duplicates += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("Inserted {} venues, skipped {} existing", inserted, duplicates);

    Ok(inserted)
}

pub fn get_all_venues(conn: &Connection) -> Result<Vec<Venue>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM venues ORDER BY created_at IS NULL, created_at, id",
        VENUE_COLUMNS
    ))?;

    let venues = stmt
        .query_map([], venue_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(venues)
}

pub fn get_venue(conn: &Connection, id: &str) -> Result<Option<Venue>, StoreError> {
    let venue = conn
        .query_row(
            &format!("SELECT {} FROM venues WHERE id = ?1", VENUE_COLUMNS),
            [id],
            venue_from_row,
        )
        .optional()?;

    Ok(venue)
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM venues", [], |row| row.get(0))?;

    Ok(count)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) a store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open venue database: {:?}", path))?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn).context("Failed to initialize venue schema")?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl VenueStore for SqliteStore {
    fn fetch_all(&self) -> Result<Vec<Venue>, StoreError> {
        get_all_venues(&self.conn)
    }

    fn update_fields(&self, id: &str, payload: &MergedPayload) -> Result<(), StoreError> {
        // Row rewrite and its audit event commit together or not at all
        let tx = self.conn.unchecked_transaction()?;

        let mut venue = get_venue(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        payload.apply_to(&mut venue);

        tx.execute(
            "UPDATE venues SET
                state = ?2, postal_code = ?3, latitude = ?4, longitude = ?5,
                description = ?6, exterior_photo = ?7, interior_photo = ?8,
                strip_photos = ?9, ai_preview = ?10, machine_type = ?11, photo_type = ?12,
                machine_model = ?13, manufacturer = ?14, hours = ?15, cost = ?16,
                features = ?17, source_names = ?18, source_urls = ?19, geocoded_at = ?20,
                address = ?21
             WHERE id = ?1",
            params![
                venue.id,
                venue.state,
                venue.postal_code,
                venue.latitude,
                venue.longitude,
                venue.description,
                venue.exterior_photo,
                venue.interior_photo,
                serde_json::to_string(&venue.strip_photos)?,
                venue.ai_preview,
                venue.machine_type,
                venue.photo_type,
                venue.machine_model,
                venue.manufacturer,
                venue.hours,
                venue.cost,
                serde_json::to_string(&venue.features)?,
                serde_json::to_string(&venue.source_names)?,
                serde_json::to_string(&venue.source_urls)?,
                venue.geocoded_at.map(|dt| dt.to_rfc3339()),
                venue.address,
            ],
        )?;

        let event = Event::new(
            "venue_merged",
            "venue",
            id,
            serde_json::to_value(payload)?,
            "dedup_engine",
        );
        insert_event(&tx, &event)?;

        tx.commit()?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;

        let removed = tx.execute("DELETE FROM venues WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let event = Event::new(
            "venue_deleted",
            "venue",
            id,
            serde_json::json!({ "reason": "duplicate" }),
            "dedup_engine",
        );
        insert_event(&tx, &event)?;

        tx.commit()?;
        Ok(())
    }
}

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bincode;
use common::{Source, TrackRecord};
use metadata::MetadataError;
use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub mod scan;

const CATALOG_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
const SETTINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");
const ALBUM_ART_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("album_art");
const GENRE_ART_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("genre_art");

const META_VERSION_KEY: &str = "version";

/// Cached outcome of an album art lookup. Misses are recorded too, so the
/// fetch sweep never re-queries an album that already came back empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtEntry {
    pub found: bool,
    #[serde(default)]
    pub file_name: Option<String>,
    pub checked_at_ms: u64,
}

/// Cached outcome of a genre tile generation, misses included.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenreArtEntry {
    pub generated: bool,
    #[serde(default)]
    pub file_name: Option<String>,
    pub generated_at_ms: u64,
}

#[derive(Clone)]
pub struct Catalog {
    db: Arc<Database>,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let db = open_or_create_db(path)?;
        let catalog = Self { db: Arc::new(db) };

        match catalog.read_version()? {
            Some(version) if version == CATALOG_VERSION => {
                info!("Opened catalog at {:?}", path);
            }
            Some(version) => {
                warn!("Catalog version mismatch ({}); resetting", version);
                catalog.reset()?;
            }
            None => {
                catalog.reset()?;
            }
        }

        Ok(catalog)
    }

    /// Drop all tables and stamp the current version. Track records are
    /// rebuilt by the next scan; settings and art caches start empty.
    fn reset(&self) -> Result<(), CatalogError> {
        let write_txn = self.db.begin_write()?;
        clear_table(&write_txn, META_TABLE)?;
        clear_table(&write_txn, TRACKS_TABLE)?;
        clear_table(&write_txn, SETTINGS_TABLE)?;
        clear_table(&write_txn, ALBUM_ART_TABLE)?;
        clear_table(&write_txn, GENRE_ART_TABLE)?;
        {
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            meta_table.insert(META_VERSION_KEY, encode_value(&CATALOG_VERSION)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn read_version(&self) -> Result<Option<u32>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let version = match table.get(META_VERSION_KEY)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(version)
    }

    pub fn upsert_track(&self, record: &TrackRecord) -> Result<(), CatalogError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TRACKS_TABLE)?;
            table.insert(record.id.as_str(), encode_value(record)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn upsert_tracks(&self, records: &[TrackRecord]) -> Result<(), CatalogError> {
        if records.is_empty() {
            return Ok(());
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TRACKS_TABLE)?;
            for record in records {
                table.insert(record.id.as_str(), encode_value(record)?.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_track(&self, id: &str) -> Result<Option<TrackRecord>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(TRACKS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = match table.get(id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(record)
    }

    pub fn delete_track(&self, id: &str) -> Result<(), CatalogError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TRACKS_TABLE)?;
            table.remove(id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All records for one source, sorted by artist then album then track
    /// number so listings render in a stable order.
    pub fn tracks_by_source(&self, source: Source) -> Result<Vec<TrackRecord>, CatalogError> {
        let mut tracks = self.all_tracks()?;
        tracks.retain(|track| track.source == source);
        tracks.sort_by(|a, b| {
            (a.artist.as_deref(), a.album.as_deref(), a.track_no, a.title.as_deref()).cmp(&(
                b.artist.as_deref(),
                b.album.as_deref(),
                b.track_no,
                b.title.as_deref(),
            ))
        });
        Ok(tracks)
    }

    pub fn all_tracks(&self) -> Result<Vec<TrackRecord>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(TRACKS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut tracks = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let record: TrackRecord = decode_value(entry.1.value())?;
            tracks.push(record);
        }
        Ok(tracks)
    }

    pub fn count_by_source(&self, source: Source) -> Result<usize, CatalogError> {
        let tracks = self.all_tracks()?;
        Ok(tracks.iter().filter(|track| track.source == source).count())
    }

    /// Remove every record of `source` whose id is not in `keep`. Returns how
    /// many records were purged. Records of the other source are untouched.
    pub fn retain_source(
        &self,
        source: Source,
        keep: &HashSet<String>,
    ) -> Result<usize, CatalogError> {
        let stale: Vec<String> = self
            .all_tracks()?
            .into_iter()
            .filter(|track| track.source == source && !keep.contains(&track.id))
            .map(|track| track.id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TRACKS_TABLE)?;
            for id in &stale {
                table.remove(id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(stale.len())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(SETTINGS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value = match table.get(key)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), CatalogError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SETTINGS_TABLE)?;
            table.insert(key, encode_value(&value.to_string())?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_art(&self, album_key: &str) -> Result<Option<ArtEntry>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(ALBUM_ART_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry = match table.get(album_key)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(entry)
    }

    pub fn put_art(&self, album_key: &str, entry: &ArtEntry) -> Result<(), CatalogError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ALBUM_ART_TABLE)?;
            table.insert(album_key, encode_value(entry)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_genre_art(&self, genre_key: &str) -> Result<Option<GenreArtEntry>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(GENRE_ART_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry = match table.get(genre_key)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(entry)
    }

    pub fn put_genre_art(
        &self,
        genre_key: &str,
        entry: &GenreArtEntry,
    ) -> Result<(), CatalogError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(GENRE_ART_TABLE)?;
            table.insert(genre_key, encode_value(entry)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn clear_genre_art(&self) -> Result<(), CatalogError> {
        let write_txn = self.db.begin_write()?;
        clear_table(&write_txn, GENRE_ART_TABLE)?;
        write_txn.commit()?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum CatalogError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Io(err) => write!(f, "io error: {}", err),
            CatalogError::Metadata(err) => write!(f, "metadata error: {}", err),
            CatalogError::Redb(err) => write!(f, "db error: {}", err),
            CatalogError::Bincode(err) => write!(f, "encode error: {}", err),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::Io(err)
    }
}

impl From<MetadataError> for CatalogError {
    fn from(err: MetadataError) -> Self {
        CatalogError::Metadata(err)
    }
}

impl From<redb::Error> for CatalogError {
    fn from(err: redb::Error) -> Self {
        CatalogError::Redb(err)
    }
}

impl From<DatabaseError> for CatalogError {
    fn from(err: DatabaseError) -> Self {
        CatalogError::Redb(err.into())
    }
}

impl From<TableError> for CatalogError {
    fn from(err: TableError) -> Self {
        CatalogError::Redb(err.into())
    }
}

impl From<TransactionError> for CatalogError {
    fn from(err: TransactionError) -> Self {
        CatalogError::Redb(err.into())
    }
}

impl From<StorageError> for CatalogError {
    fn from(err: StorageError) -> Self {
        CatalogError::Redb(err.into())
    }
}

impl From<CommitError> for CatalogError {
    fn from(err: CommitError) -> Self {
        CatalogError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for CatalogError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        CatalogError::Bincode(err)
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn open_or_create_db(path: &Path) -> Result<Database, CatalogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), CatalogError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CatalogError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CatalogError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::{ArtEntry, Catalog, GenreArtEntry};
    use common::{track_id, Source, TrackRecord};
    use std::collections::HashSet;

    fn record(source: Source, relpath: &str) -> TrackRecord {
        TrackRecord {
            id: track_id(source, relpath),
            relpath: relpath.to_string(),
            full_path: format!("/root/{}", relpath),
            size: 1024,
            modified_ms: 1_700_000_000_000,
            source,
            title: Some("Title".to_string()),
            artist: Some("Artist".to_string()),
            album: Some("Album".to_string()),
            genre: None,
            track_no: Some(1),
            year: None,
            duration_secs: None,
            indexed_at_ms: 1,
        }
    }

    #[test]
    fn tracks_round_trip_and_filter_by_source() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();

        let local = record(Source::Local, "Artist/Album/01 - Title.mp3");
        let device = record(Source::Device, "iPod_Control/Music/F00/ABCD.mp3");
        catalog.upsert_tracks(&[local.clone(), device.clone()]).unwrap();

        assert_eq!(catalog.get_track(&local.id).unwrap(), Some(local.clone()));
        assert_eq!(catalog.count_by_source(Source::Local).unwrap(), 1);
        assert_eq!(catalog.count_by_source(Source::Device).unwrap(), 1);

        let device_tracks = catalog.tracks_by_source(Source::Device).unwrap();
        assert_eq!(device_tracks, vec![device]);
    }

    #[test]
    fn retain_source_purges_only_stale_records_of_that_source() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();

        let keep = record(Source::Local, "a.mp3");
        let stale = record(Source::Local, "b.mp3");
        let device = record(Source::Device, "iPod_Control/Music/F00/AAAA.mp3");
        catalog
            .upsert_tracks(&[keep.clone(), stale.clone(), device.clone()])
            .unwrap();

        let mut ids = HashSet::new();
        ids.insert(keep.id.clone());
        let removed = catalog.retain_source(Source::Local, &ids).unwrap();

        assert_eq!(removed, 1);
        assert!(catalog.get_track(&stale.id).unwrap().is_none());
        assert!(catalog.get_track(&keep.id).unwrap().is_some());
        assert!(catalog.get_track(&device.id).unwrap().is_some());
    }

    #[test]
    fn settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();

        assert_eq!(catalog.get_setting("openrouter_api_key").unwrap(), None);
        catalog.set_setting("openrouter_api_key", "sk-test").unwrap();
        assert_eq!(
            catalog.get_setting("openrouter_api_key").unwrap(),
            Some("sk-test".to_string())
        );
    }

    #[test]
    fn art_cache_records_misses() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();

        let miss = ArtEntry {
            found: false,
            file_name: None,
            checked_at_ms: 5,
        };
        catalog.put_art("artist|||album", &miss).unwrap();
        assert_eq!(catalog.get_art("artist|||album").unwrap(), Some(miss));
        assert_eq!(catalog.get_art("other|||album").unwrap(), None);
    }

    #[test]
    fn genre_art_clears_in_one_call() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();

        let entry = GenreArtEntry {
            generated: true,
            file_name: Some("rock.png".to_string()),
            generated_at_ms: 9,
        };
        catalog.put_genre_art("rock", &entry).unwrap();
        assert_eq!(catalog.get_genre_art("rock").unwrap(), Some(entry));

        catalog.clear_genre_art().unwrap();
        assert_eq!(catalog.get_genre_art("rock").unwrap(), None);
    }
}

use std::collections::HashMap;

use serde::Serialize;

use common::TrackRecord;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TrackHit {
    pub id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl TrackHit {
    fn from_record(record: &TrackRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            artist: record.artist.clone(),
        }
    }
}

/// Fingerprint lookup over one side of the collection. Built fresh per
/// request; the catalog is the only durable store.
pub struct FingerprintIndex {
    by_print: HashMap<String, Vec<TrackHit>>,
}

impl FingerprintIndex {
    pub fn build(tracks: &[TrackRecord]) -> Self {
        let mut by_print: HashMap<String, Vec<TrackHit>> = HashMap::new();
        for track in tracks {
            by_print
                .entry(track.fingerprint())
                .or_default()
                .push(TrackHit::from_record(track));
        }
        Self { by_print }
    }

    pub fn lookup(&self, print: &str) -> Option<&[TrackHit]> {
        self.by_print.get(print).map(|hits| hits.as_slice())
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Classification {
    pub duplicates: Vec<String>,
    pub unique: Vec<String>,
    pub matches: HashMap<String, Vec<TrackHit>>,
}

/// Split the requested ids into those whose song already exists on the
/// destination side and those that do not. Ids that name no known source
/// track are dropped silently; a stale selection should not fail the call.
pub fn classify(
    source_tracks: &[TrackRecord],
    ids: &[String],
    destination: &FingerprintIndex,
) -> Classification {
    let by_id: HashMap<&str, &TrackRecord> = source_tracks
        .iter()
        .map(|track| (track.id.as_str(), track))
        .collect();

    let mut duplicates = Vec::new();
    let mut unique = Vec::new();
    let mut matches = HashMap::new();

    for id in ids {
        let record = match by_id.get(id.as_str()) {
            Some(record) => record,
            None => continue,
        };
        match destination.lookup(&record.fingerprint()) {
            Some(hits) => {
                duplicates.push(id.clone());
                matches.insert(id.clone(), hits.to_vec());
            }
            None => unique.push(id.clone()),
        }
    }

    Classification {
        duplicates,
        unique,
        matches,
    }
}

#[derive(Debug, Serialize)]
pub struct DuplicatePair {
    pub local: Vec<TrackHit>,
    pub device: Vec<TrackHit>,
}

/// Every song present on both sides, grouped by fingerprint.
pub fn duplicate_pairs(local: &[TrackRecord], device: &[TrackRecord]) -> Vec<DuplicatePair> {
    let device_index = FingerprintIndex::build(device);
    let mut seen: HashMap<String, Vec<TrackHit>> = HashMap::new();
    for track in local {
        seen.entry(track.fingerprint())
            .or_default()
            .push(TrackHit::from_record(track));
    }

    let mut prints: Vec<&String> = seen.keys().collect();
    prints.sort();

    let mut pairs = Vec::new();
    for print in prints {
        if let Some(hits) = device_index.lookup(print) {
            pairs.push(DuplicatePair {
                local: seen[print].clone(),
                device: hits.to_vec(),
            });
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::{classify, duplicate_pairs, FingerprintIndex};
    use common::{track_id, Source, TrackRecord};

    fn record(source: Source, relpath: &str, title: &str, artist: &str, album: &str) -> TrackRecord {
        TrackRecord {
            id: track_id(source, relpath),
            relpath: relpath.to_string(),
            full_path: format!("/root/{}", relpath),
            size: 10,
            modified_ms: 0,
            source,
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            album: Some(album.to_string()),
            genre: None,
            track_no: None,
            year: None,
            duration_secs: None,
            indexed_at_ms: 0,
        }
    }

    #[test]
    fn classify_splits_duplicates_from_unique() {
        let local = vec![
            record(Source::Local, "a.mp3", "Song A", "X", "Y"),
            record(Source::Local, "b.mp3", "Song B", "X", "Y"),
        ];
        let device = vec![record(
            Source::Device,
            "iPod_Control/Music/F00/AAAA.mp3",
            "song a",
            " x ",
            "y",
        )];
        let index = FingerprintIndex::build(&device);

        let ids = vec![local[0].id.clone(), local[1].id.clone()];
        let result = classify(&local, &ids, &index);

        assert_eq!(result.duplicates, vec![local[0].id.clone()]);
        assert_eq!(result.unique, vec![local[1].id.clone()]);
        assert_eq!(result.matches[&local[0].id][0].id, device[0].id);
    }

    #[test]
    fn unknown_ids_are_dropped_not_errors() {
        let local = vec![record(Source::Local, "a.mp3", "Song A", "X", "Y")];
        let index = FingerprintIndex::build(&[]);

        let ids = vec!["no-such-id".to_string(), local[0].id.clone()];
        let result = classify(&local, &ids, &index);

        assert_eq!(result.duplicates.len(), 0);
        assert_eq!(result.unique, vec![local[0].id.clone()]);
    }

    #[test]
    fn untagged_files_match_each_other() {
        let mut local = record(Source::Local, "a.mp3", "", "", "");
        local.title = None;
        local.artist = None;
        local.album = None;
        let mut device = record(Source::Device, "iPod_Control/Music/F00/AAAA.mp3", "", "", "");
        device.title = None;
        device.artist = None;
        device.album = None;

        let index = FingerprintIndex::build(&[device]);
        let ids = vec![local.id.clone()];
        let result = classify(&[local.clone()], &ids, &index);
        assert_eq!(result.duplicates, vec![local.id]);
    }

    #[test]
    fn duplicate_roles_are_symmetric() {
        let local = vec![record(Source::Local, "a.mp3", "Same Song", "X", "Y")];
        let device = vec![record(
            Source::Device,
            "iPod_Control/Music/F00/AAAA.mp3",
            "same song",
            "x",
            "y",
        )];

        let to_device = classify(&local, &[local[0].id.clone()], &FingerprintIndex::build(&device));
        let to_local = classify(&device, &[device[0].id.clone()], &FingerprintIndex::build(&local));
        assert_eq!(to_device.duplicates.len(), 1);
        assert_eq!(to_local.duplicates.len(), 1);
    }

    #[test]
    fn duplicate_pairs_group_by_song() {
        let local = vec![
            record(Source::Local, "a.mp3", "Shared", "X", "Y"),
            record(Source::Local, "b.mp3", "Local Only", "X", "Y"),
        ];
        let device = vec![
            record(Source::Device, "iPod_Control/Music/F00/AAAA.mp3", "Shared", "X", "Y"),
            record(Source::Device, "iPod_Control/Music/F00/BBBB.mp3", "Device Only", "X", "Y"),
        ];

        let pairs = duplicate_pairs(&local, &device);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].local[0].id, local[0].id);
        assert_eq!(pairs[0].device[0].id, device[0].id);
    }
}

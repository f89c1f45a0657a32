// Supplemental-event side channel
//
// Operators can request ad-hoc events for an entity type by appending lines
// to a plain-text file. The file is re-read once per cycle; each line is
// `<entity_type> <event_name> <rfc3339-expiry>`. Blank lines and lines
// starting with `#` are ignored. A malformed line is logged and skipped, and
// a missing file simply yields no events.

use crate::models::SupplementalEvent;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Abstract source of supplemental events, re-queried every cycle.
pub trait SupplementalSource: Send + Sync {
    /// Current unexpired events for the configured entity types.
    fn read(&self, entity_types: &BTreeSet<String>, now: DateTime<Utc>) -> Vec<SupplementalEvent>;
}

/// Production source backed by an operator-editable file.
pub struct FileSupplementalSource {
    path: PathBuf,
}

impl FileSupplementalSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SupplementalSource for FileSupplementalSource {
    fn read(&self, entity_types: &BTreeSet<String>, now: DateTime<Utc>) -> Vec<SupplementalEvent> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read supplemental-events file");
                return Vec::new();
            }
        };

        parse_supplemental_lines(&contents, entity_types, now)
    }
}

/// In-memory source for tests; applies the same type and expiry filters as
/// the file-backed one.
#[derive(Default)]
pub struct MemorySupplementalSource {
    events: Vec<SupplementalEvent>,
}

impl MemorySupplementalSource {
    pub fn new(events: Vec<SupplementalEvent>) -> Self {
        Self { events }
    }
}

impl SupplementalSource for MemorySupplementalSource {
    fn read(&self, entity_types: &BTreeSet<String>, now: DateTime<Utc>) -> Vec<SupplementalEvent> {
        self.events
            .iter()
            .filter(|e| entity_types.contains(&e.entity_type) && e.expires_at > now)
            .cloned()
            .collect()
    }
}

/// Parse the side-channel file body. Line-scoped errors are logged with the
/// offending line and never abort the rest of the file.
fn parse_supplemental_lines(
    contents: &str,
    entity_types: &BTreeSet<String>,
    now: DateTime<Utc>,
) -> Vec<SupplementalEvent> {
    let mut events = Vec::new();

    for (line_no, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let (Some(entity_type), Some(event_name), Some(expiry), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            warn!(line = line_no + 1, content = raw_line, "Malformed supplemental-event line");
            continue;
        };

        if !entity_types.contains(entity_type) {
            warn!(
                line = line_no + 1,
                entity_type = entity_type,
                "Supplemental event references unconfigured entity type"
            );
            continue;
        }

        let expires_at = match DateTime::parse_from_rfc3339(expiry) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!(line = line_no + 1, expiry = expiry, error = %e, "Unparseable supplemental-event expiry");
                continue;
            }
        };

        if expires_at <= now {
            warn!(
                line = line_no + 1,
                event_name = event_name,
                "Supplemental event already expired"
            );
            continue;
        }

        events.push(SupplementalEvent {
            entity_type: entity_type.to_string(),
            event_name: event_name.to_string(),
            expires_at,
        });
    }

    events
}

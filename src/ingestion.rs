use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::place::Place;

/// Loads raw place records from a JSON array file, falling back to NDJSON
/// (one object per line). NDJSON lines that fail to parse are skipped and
/// logged; a missing file or a non-array JSON root is fatal.
pub fn load_records(path: &Path) -> AppResult<Vec<Value>> {
    let text = fs::read_to_string(path)?;

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(records)) => {
            info!(count = records.len(), path = %path.display(), "loaded place records");
            Ok(records)
        }
        Ok(_) => Err(AppError::Parse(format!(
            "JSON root of {} must be an array",
            path.display()
        ))),
        Err(_) => load_ndjson(&text, path),
    }
}

fn load_ndjson(text: &str, path: &Path) -> AppResult<Vec<Value>> {
    let mut records = Vec::new();
    let mut skipped = 0_usize;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                skipped += 1;
                let preview: String = line.chars().take(80).collect();
                warn!(?err, line = %preview, "skipping invalid JSON line");
            }
        }
    }
    info!(
        count = records.len(),
        skipped,
        path = %path.display(),
        "loaded place records from NDJSON"
    );
    Ok(records)
}

/// Typed load for the enrichment stages. Records that do not fit the place
/// schema are skipped and logged rather than failing the run.
pub fn load_places(path: &Path) -> AppResult<Vec<Place>> {
    let mut places = Vec::new();
    for record in load_records(path)? {
        match serde_json::from_value::<Place>(record) {
            Ok(place) => places.push(place),
            Err(err) => warn!(?err, "skipping record that does not match the place schema"),
        }
    }
    Ok(places)
}

/// Writes the enriched list as a 2-space-indented JSON array. Non-ASCII
/// characters are emitted literally, not escaped.
pub fn write_places(path: &Path, places: &[Place]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let body = serde_json::to_string_pretty(places)?;
    fs::write(path, body)?;
    info!(count = places.len(), path = %path.display(), "wrote enriched places");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn loads_a_json_array() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("places.json");
        fs::write(&path, r#"[{"name": "A", "city": "B"}]"#).unwrap();

        let records = load_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], json!("A"));
    }

    #[test]
    fn ndjson_skips_malformed_lines_without_failing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("places.ndjson");
        fs::write(
            &path,
            "{\"name\": \"A\", \"city\": \"X\"}\nnot json at all\n{\"name\": \"B\", \"city\": \"Y\"}\n{\"name\": \"C\", \"city\": \"Z\"}\n",
        )
        .unwrap();

        let records = load_records(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2]["name"], json!("C"));
    }

    #[test]
    fn non_array_root_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("places.json");
        fs::write(&path, r#"{"barcelona": []}"#).unwrap();

        assert!(matches!(load_records(&path), Err(AppError::Parse(_))));
    }

    #[test]
    fn missing_file_is_fatal() {
        assert!(matches!(
            load_records(Path::new("/nonexistent/places.json")),
            Err(AppError::Io(_))
        ));
    }

    #[test]
    fn writes_pretty_json_with_literal_unicode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/enriched.json");
        let places = load_places_from_json(json!([
            {"name": "Sagrada Família", "city": "Barcelona"}
        ]));
        write_places(&path, &places).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("Sagrada Família"));
        assert!(written.contains("\n  {"));

        let reloaded = load_places(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].name, "Sagrada Família");
    }

    #[test]
    fn typed_load_skips_records_missing_required_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("places.json");
        fs::write(
            &path,
            r#"[{"name": "Valid", "city": "Barcelona"}, {"city": "no name"}]"#,
        )
        .unwrap();

        let places = load_places(&path).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].name, "Valid");
    }

    fn load_places_from_json(value: Value) -> Vec<Place> {
        serde_json::from_value(value).unwrap()
    }
}

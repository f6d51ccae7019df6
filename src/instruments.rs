use std::{
    fs::OpenOptions,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::{
    constants::INSTRUMENT_CONFIG_PATH,
    model::{self, SyncError},
    store::documents::DocumentStore,
};

/// Splits a comma or newline separated list, dropping blanks and repeats.
pub fn parse_codes(raw: &str) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for code in raw.split([',', '\n']).map(str::trim) {
        if !code.is_empty() && !codes.iter().any(|c| c == code) {
            codes.push(code.to_string());
        }
    }
    codes
}

/// Reads one instrument code per line.
pub fn read_symbols_from_file(symbols_file_path: &str) -> model::Result<Vec<String>> {
    // Validate symbols file path
    let path = Path::new(symbols_file_path);
    if !path.is_file() {
        return Err(SyncError::Configuration(format!(
            "symbols file not found: {symbols_file_path}"
        )));
    }

    let file = OpenOptions::new().read(true).open(path)?;

    let mut codes = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            log::warn!("line {i} of {symbols_file_path} is empty");
            continue;
        }
        codes.push(line);
    }
    Ok(parse_codes(&codes.join("\n")))
}

/// Resolves the instruments for a run: environment override first, then the
/// symbols file, then the `config/instruments` document.
pub fn resolve<S: DocumentStore>(
    env_override: Option<&[String]>,
    symbols_file_path: Option<&str>,
    store: &S,
) -> model::Result<Vec<String>> {
    if let Some(codes) = env_override.filter(|c| !c.is_empty()) {
        log::info!("using {} instruments from INSTRUMENT_CODES", codes.len());
        return Ok(codes.to_vec());
    }

    if let Some(path) = symbols_file_path {
        let codes = read_symbols_from_file(path)?;
        if codes.is_empty() {
            return Err(SyncError::Configuration(format!("empty symbols file: {path}")));
        }
        log::info!("using {} instruments from {path}", codes.len());
        return Ok(codes);
    }

    let document = store
        .get(INSTRUMENT_CONFIG_PATH)
        .map_err(|e| SyncError::Configuration(format!("cannot read {INSTRUMENT_CONFIG_PATH}: {e}")))?;
    let codes: Vec<String> = document
        .as_ref()
        .and_then(|doc| doc.get("codes"))
        .and_then(|codes| codes.as_array())
        .map(|codes| {
            codes
                .iter()
                .filter_map(|c| c.as_str())
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    if codes.is_empty() {
        return Err(SyncError::Configuration(format!(
            "no instruments configured: set INSTRUMENT_CODES, pass --symbols-file or fill {INSTRUMENT_CONFIG_PATH}"
        )));
    }
    log::info!("using {} instruments from {INSTRUMENT_CONFIG_PATH}", codes.len());
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::documents::{Mutation, SqliteDocumentStore};
    use rusqlite::Connection;
    use serde_json::json;
    use std::io::Write;

    fn store() -> SqliteDocumentStore {
        SqliteDocumentStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn parse_codes_trims_and_dedupes() {
        assert_eq!(parse_codes(" 005930,000660\n005930,, "), vec!["005930", "000660"]);
        assert!(parse_codes(" , \n").is_empty());
    }

    #[test]
    fn env_override_wins() {
        let codes = vec!["A".to_string()];
        let store = store();
        assert_eq!(resolve(Some(codes.as_slice()), Some("/nonexistent"), &store).unwrap(), codes);
    }

    #[test]
    fn reads_symbols_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "005930\n\n000660\n").unwrap();
        let path = file.path().to_str().unwrap();
        assert_eq!(resolve(None, Some(path), &store()).unwrap(), vec!["005930", "000660"]);
    }

    #[test]
    fn missing_symbols_file_is_configuration_error() {
        let err = resolve(None, Some("/definitely/not/here.txt"), &store()).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn falls_back_to_config_document() {
        let store = store();
        store
            .write(Mutation::replace(INSTRUMENT_CONFIG_PATH, json!({"codes": ["005930", " ", 7]})))
            .unwrap();
        assert_eq!(resolve(None, None, &store).unwrap(), vec!["005930"]);
    }

    #[test]
    fn nothing_configured_is_fatal() {
        assert!(matches!(
            resolve(None, None, &store()),
            Err(SyncError::Configuration(_))
        ));
        assert!(matches!(
            resolve(Some(&[][..]), None, &store()),
            Err(SyncError::Configuration(_))
        ));
    }
}

//! CSV payload decoding: explicit dialect, sniffing, header handling, the
//! plain-text one-value-per-line reader and the IP-list fast path.

use serde_json::{Map, Value};

use super::DecodedPayload;
use crate::config::CsvOptions;
use crate::error::{ImportError, Result};
use crate::log::RunLog;

/// How much of the payload the delimiter sniffer examines.
const SNIFF_WINDOW: usize = 5 * 1024;

const DELIMITER_CANDIDATES: [char; 4] = [',', ';', '\t', '|'];

pub fn decode_csv(text: &str, opts: &CsvOptions, log: &mut RunLog) -> Result<DecodedPayload> {
    let first_line = match text.lines().find(|l| !l.trim().is_empty()) {
        Some(line) => line.trim(),
        None => return Ok(DecodedPayload::empty()),
    };

    let delimiter = match opts.separator {
        Some(sep) => {
            log.info(format!("Using configured separator {sep:?}"));
            sep
        }
        None => {
            let mut end = text.len().min(SNIFF_WINDOW);
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            let sniffed = sniff_delimiter(&text[..end]);
            log.info(format!("Sniffed separator {sniffed:?}"));
            sniffed
        }
    };

    // A comma-separated headerless payload whose first line is an IPv4
    // address is a bare IP list; an explicit non-comma separator disables
    // this path.
    if delimiter == ',' && !opts.has_header && looks_like_ipv4(first_line) {
        log.info("Detected an IP address list (one address per line)");
        return Ok(read_single_column(text, single_column_name(opts)));
    }

    // One value per line without any delimiter: plain text.
    if !opts.has_header && !first_line.contains(delimiter) {
        log.info("Detected a plain text payload (one value per line)");
        return Ok(read_single_column(text, single_column_name(opts)));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = reader.records();

    let header: Vec<String> = if opts.has_header {
        match rows.next() {
            Some(row) => {
                let row = row.map_err(|e| ImportError::Format(format!("invalid CSV: {e}")))?;
                let names: Vec<String> = row.iter().map(|h| h.trim().to_string()).collect();
                if names.iter().all(String::is_empty) {
                    return Ok(DecodedPayload::empty());
                }
                log.info(format!("CSV header: {names:?}"));
                names
            }
            None => return Ok(DecodedPayload::empty()),
        }
    } else {
        let width = first_line.split(delimiter).count();
        let names = synthesize_names(width, &opts.column_names);
        log.info(format!("No header row; using column names {names:?}"));
        names
    };

    let mut records = Vec::new();
    for row in rows {
        let row = row.map_err(|e| ImportError::Format(format!("invalid CSV: {e}")))?;
        if row.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        let mut record = Map::new();
        for (index, value) in row.iter().enumerate() {
            let Some(name) = header.get(index) else { break };
            if name.is_empty() {
                continue;
            }
            record.insert(name.clone(), Value::String(value.to_string()));
        }
        records.push(record);
    }

    Ok(DecodedPayload {
        fields: header.into_iter().filter(|n| !n.is_empty()).collect(),
        records,
    })
}

fn sniff_delimiter(window: &str) -> char {
    let Some(first_line) = window.lines().find(|l| !l.trim().is_empty()) else {
        return ',';
    };
    let mut best = ',';
    let mut best_count = 0usize;
    for candidate in DELIMITER_CANDIDATES {
        let count = first_line.matches(candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

fn single_column_name(opts: &CsvOptions) -> String {
    opts.column_names
        .first()
        .filter(|n| !n.is_empty())
        .cloned()
        .unwrap_or_else(|| "Column1".to_string())
}

fn read_single_column(text: &str, column: String) -> DecodedPayload {
    let records: Vec<Map<String, Value>> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut record = Map::new();
            record.insert(column.clone(), Value::String(line.to_string()));
            record
        })
        .collect();
    DecodedPayload {
        fields: vec![column],
        records,
    }
}

fn synthesize_names(width: usize, configured: &[String]) -> Vec<String> {
    (0..width)
        .map(|i| match configured.get(i) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("Column{}", i + 1),
        })
        .collect()
}

/// Exactly four dotted components, all digits.
fn looks_like_ipv4(line: &str) -> bool {
    let parts: Vec<&str> = line.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str, opts: &CsvOptions) -> DecodedPayload {
        decode_csv(text, opts, &mut RunLog::new()).unwrap()
    }

    #[test]
    fn header_row_names_the_columns() {
        let payload = decode("ip,name\n10.0.0.1,alpha\n10.0.0.2,beta\n", &CsvOptions::default());
        assert_eq!(payload.fields, vec!["ip", "name"]);
        assert_eq!(payload.records.len(), 2);
        assert_eq!(payload.records[0]["ip"], "10.0.0.1");
        assert_eq!(payload.records[1]["name"], "beta");
    }

    #[test]
    fn explicit_separator_is_honored_not_sniffed() {
        for sep in ['\t', ';', '|'] {
            let text = format!("a{sep}b\n1{sep}2\n");
            let opts = CsvOptions {
                separator: Some(sep),
                ..Default::default()
            };
            let payload = decode(&text, &opts);
            assert_eq!(payload.fields, vec!["a", "b"], "separator {sep:?}");
            assert_eq!(payload.records[0]["b"], "2");
        }

        // Explicit comma means semicolons are data, not separators.
        let opts = CsvOptions {
            separator: Some(','),
            ..Default::default()
        };
        let payload = decode("a\n1;2\n", &opts);
        assert_eq!(payload.fields, vec!["a"]);
        assert_eq!(payload.records[0]["a"], "1;2");
    }

    #[test]
    fn sniffs_semicolon_when_unconfigured() {
        let payload = decode("a;b\n1;2\n", &CsvOptions::default());
        assert_eq!(payload.fields, vec!["a", "b"]);
    }

    #[test]
    fn headerless_payload_synthesizes_names() {
        let opts = CsvOptions {
            has_header: false,
            ..Default::default()
        };
        let payload = decode("x,1\ny,2\n", &opts);
        assert_eq!(payload.fields, vec!["Column1", "Column2"]);
        assert_eq!(payload.records.len(), 2);

        let opts = CsvOptions {
            has_header: false,
            column_names: vec!["name".into()],
            ..Default::default()
        };
        let payload = decode("x,1\n", &opts);
        assert_eq!(payload.fields, vec!["name", "Column2"]);
    }

    #[test]
    fn plain_text_yields_one_record_per_nonempty_line() {
        let opts = CsvOptions {
            has_header: false,
            column_names: vec!["host".into()],
            ..Default::default()
        };
        let payload = decode("alpha\n\nbeta\n", &opts);
        assert_eq!(payload.fields, vec!["host"]);
        assert_eq!(payload.records.len(), 2);
        assert_eq!(payload.records[1]["host"], "beta");
    }

    #[test]
    fn ip_list_fast_path_defaults_to_column1() {
        let opts = CsvOptions {
            has_header: false,
            ..Default::default()
        };
        let payload = decode("10.0.0.1\n10.0.0.2\n", &opts);
        assert_eq!(payload.fields, vec!["Column1"]);
        assert_eq!(payload.records.len(), 2);
        assert_eq!(payload.records[0]["Column1"], "10.0.0.1");
    }

    #[test]
    fn explicit_noncomma_separator_disables_ip_fast_path() {
        let opts = CsvOptions {
            separator: Some('\t'),
            has_header: false,
            ..Default::default()
        };
        let payload = decode("10.0.0.1\tup\n10.0.0.2\tdown\n", &opts);
        assert_eq!(payload.fields, vec!["Column1", "Column2"]);
        assert_eq!(payload.records[0]["Column2"], "up");
    }

    #[test]
    fn empty_payload_decodes_to_zero_rows() {
        assert!(decode("", &CsvOptions::default()).is_empty());
        assert!(decode("\n\n", &CsvOptions::default()).is_empty());
    }

    #[test]
    fn quoted_fields_follow_rfc4180() {
        let payload = decode(
            "name,desc\n\"smith, john\",\"says \"\"hi\"\"\"\n",
            &CsvOptions::default(),
        );
        assert_eq!(payload.records[0]["name"], "smith, john");
        assert_eq!(payload.records[0]["desc"], "says \"hi\"");
    }
}

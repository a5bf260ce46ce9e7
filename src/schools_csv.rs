use crate::store::StoreError;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

const DELIMITER: char = ';';

const COLUMNS: [&str; 9] = [
    "id",
    "inep",
    "escola",
    "endereco",
    "bairro",
    "distrito",
    "gestor",
    "telefone_extraido",
    "localidade_id",
];

/// Split one `;`-separated record. Quoted fields may contain the delimiter and
/// use `""` for a literal quote.
pub fn parse_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                buf.push('"');
                chars.next();
                continue;
            }
            in_quotes = !in_quotes;
            continue;
        }
        if ch == DELIMITER && !in_quotes {
            out.push(std::mem::take(&mut buf));
            continue;
        }
        buf.push(ch);
    }
    out.push(buf);
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchoolRow {
    pub line_no: usize,
    pub id: i64,
    pub inep: String,
    pub name: String,
    pub address: Option<String>,
    pub district: Option<String>,
    pub manager: Option<String>,
    pub phone: Option<String>,
    pub locality_id: i64,
}

fn non_empty(v: Option<&String>) -> Option<String> {
    v.map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn district_of(bairro: Option<String>, distrito: Option<String>) -> Option<String> {
    match (bairro, distrito) {
        (Some(b), Some(d)) => Some(format!("{}/{}", b, d)),
        (Some(b), None) => Some(b),
        (None, Some(d)) => Some(d),
        (None, None) => None,
    }
}

fn warning(line_no: usize, code: &str, message: &str) -> serde_json::Value {
    json!({ "line": line_no, "code": code, "message": message })
}

/// Parse a roster export. Returns accepted rows, per-line warnings for the
/// rejected ones, and the number of non-blank data lines seen.
pub fn parse_schools(text: &str) -> Result<(Vec<SchoolRow>, Vec<serde_json::Value>, usize), StoreError> {
    let mut lines = text.lines().enumerate();
    let header = loop {
        match lines.next() {
            Some((_, l)) if l.trim().is_empty() => continue,
            Some((_, l)) => break l,
            None => return Err(StoreError::new("bad_params", "CSV is empty")),
        }
    };
    let header: Vec<String> = parse_record(header.trim_start_matches('\u{feff}'))
        .into_iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();
    let mut index = [0usize; COLUMNS.len()];
    for (slot, name) in index.iter_mut().zip(COLUMNS) {
        *slot = header.iter().position(|h| h == name).ok_or_else(|| {
            StoreError::new("bad_params", format!("missing CSV column: {}", name))
                .with_details(json!({ "expected": COLUMNS }))
        })?;
    }
    let [c_id, c_inep, c_name, c_addr, c_bairro, c_distrito, c_manager, c_phone, c_loc] = index;

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    let mut total = 0usize;
    for (idx, raw) in lines {
        if raw.trim().is_empty() {
            continue;
        }
        total += 1;
        let line_no = idx + 1;
        let fields = parse_record(raw);
        let field = |i: usize| non_empty(fields.get(i));

        let Some(name) = field(c_name) else {
            warnings.push(warning(line_no, "missing_name", "school name is empty"));
            continue;
        };
        let Some(id) = field(c_id).and_then(|s| s.parse::<i64>().ok()) else {
            warnings.push(warning(line_no, "bad_id", "id must be an integer"));
            continue;
        };
        let Some(inep) = field(c_inep) else {
            warnings.push(warning(line_no, "missing_inep", "inep is empty"));
            continue;
        };
        let Some(locality_id) = field(c_loc).and_then(|s| s.parse::<i64>().ok()) else {
            warnings.push(warning(
                line_no,
                "bad_locality_id",
                "localidade_id must be an integer",
            ));
            continue;
        };
        rows.push(SchoolRow {
            line_no,
            id,
            inep,
            name,
            address: field(c_addr),
            district: district_of(field(c_bairro), field(c_distrito)),
            manager: field(c_manager),
            phone: field(c_phone),
            locality_id,
        });
    }
    Ok((rows, warnings, total))
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub localities_created: usize,
    pub warnings: Vec<serde_json::Value>,
}

/// Upsert parsed rows by school id inside one transaction. Unknown locality
/// ids get a placeholder locality so the roster can be loaded first.
pub fn import_schools(conn: &mut Connection, text: &str) -> Result<ImportSummary, StoreError> {
    let (rows, mut warnings, total) = parse_schools(text)?;
    for w in &warnings {
        tracing::warn!(warning = %w, "school row skipped");
    }
    let mut summary = ImportSummary {
        total,
        skipped: warnings.len(),
        ..ImportSummary::default()
    };

    let tx = conn
        .transaction()
        .map_err(|e| StoreError::new("db_update_failed", e.to_string()))?;
    for row in rows {
        let locality_known: Option<i64> = tx
            .query_row("SELECT id FROM localities WHERE id = ?", [row.locality_id], |r| {
                r.get(0)
            })
            .optional()
            .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
        if locality_known.is_none() {
            tx.execute(
                "INSERT INTO localities(id, name) VALUES(?, ?)",
                (row.locality_id, format!("Localidade {}", row.locality_id)),
            )
            .map_err(|e| {
                StoreError::new("db_insert_failed", e.to_string())
                    .with_details(json!({ "table": "localities" }))
            })?;
            summary.localities_created += 1;
        }

        // An INEP code held by a different school would violate the unique key.
        let inep_owner: Option<i64> = tx
            .query_row("SELECT id FROM schools WHERE inep = ?", [&row.inep], |r| r.get(0))
            .optional()
            .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
        if inep_owner.is_some_and(|owner| owner != row.id) {
            let w = warning(row.line_no, "duplicate_inep", "inep already belongs to another school");
            tracing::warn!(warning = %w, "school row skipped");
            warnings.push(w);
            summary.skipped += 1;
            continue;
        }

        let exists: Option<i64> = tx
            .query_row("SELECT id FROM schools WHERE id = ?", [row.id], |r| r.get(0))
            .optional()
            .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
        if exists.is_some() {
            tx.execute(
                "UPDATE schools SET inep = ?, name = ?, address = ?, district = ?,
                   manager = ?, phone = ?, locality_id = ?
                 WHERE id = ?",
                rusqlite::params![
                    row.inep,
                    row.name,
                    row.address,
                    row.district,
                    row.manager,
                    row.phone,
                    row.locality_id,
                    row.id
                ],
            )
            .map_err(|e| {
                StoreError::new("db_update_failed", e.to_string())
                    .with_details(json!({ "table": "schools", "line": row.line_no }))
            })?;
            summary.updated += 1;
        } else {
            tx.execute(
                "INSERT INTO schools(id, inep, name, address, district, manager, phone, locality_id)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    row.id,
                    row.inep,
                    row.name,
                    row.address,
                    row.district,
                    row.manager,
                    row.phone,
                    row.locality_id
                ],
            )
            .map_err(|e| {
                StoreError::new("db_insert_failed", e.to_string())
                    .with_details(json!({ "table": "schools", "line": row.line_no }))
            })?;
            summary.inserted += 1;
        }
    }
    tx.commit()
        .map_err(|e| StoreError::new("db_update_failed", e.to_string()))?;

    summary.warnings = warnings;
    tracing::info!(
        inserted = summary.inserted,
        updated = summary.updated,
        skipped = summary.skipped,
        "school roster imported"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "id;inep;escola;endereco;bairro;distrito;gestor;telefone_extraido;localidade_id";

    #[test]
    fn splits_on_semicolon_and_honours_quotes() {
        assert_eq!(parse_record("1;\"a;b\";c"), vec!["1", "a;b", "c"]);
        assert_eq!(parse_record("\"say \"\"hi\"\"\";"), vec!["say \"hi\"", ""]);
        assert_eq!(parse_record(""), vec![""]);
    }

    #[test]
    fn combines_bairro_and_distrito() {
        let text = format!(
            "{}\n10;29000001;Escola Um;Rua A;Centro;Sede;Maria;7499990000;1\n11;29000002;Escola Dois;;;Massaroca;;;2\n",
            HEADER
        );
        let (rows, warnings, total) = parse_schools(&text).expect("parse roster");
        assert_eq!(total, 2);
        assert!(warnings.is_empty());
        assert_eq!(rows[0].district.as_deref(), Some("Centro/Sede"));
        assert_eq!(rows[0].phone.as_deref(), Some("7499990000"));
        assert_eq!(rows[1].district.as_deref(), Some("Massaroca"));
        assert_eq!(rows[1].address, None);
        assert_eq!(rows[1].locality_id, 2);
    }

    #[test]
    fn skips_unnamed_and_non_numeric_ids() {
        let text = format!(
            "{}\n1;290;;Rua;;;;;1\nabc;291;Escola X;;;;;;1\n\n3;292;Escola Y;;;;;;1\n",
            HEADER
        );
        let (rows, warnings, total) = parse_schools(&text).expect("parse roster");
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 3);
        assert_eq!(rows[0].line_no, 5);
        let codes: Vec<&str> = warnings
            .iter()
            .filter_map(|w| w.get("code").and_then(|c| c.as_str()))
            .collect();
        assert_eq!(codes, vec!["missing_name", "bad_id"]);
    }

    #[test]
    fn header_columns_may_be_reordered() {
        let text = "escola;id;localidade_id;inep;endereco;bairro;distrito;gestor;telefone_extraido\nEscola Z;9;4;123;;;;;\n";
        let (rows, _, _) = parse_schools(text).expect("parse reordered roster");
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].id, rows[0].locality_id), (9, 4));
        assert_eq!(rows[0].name, "Escola Z");
    }

    #[test]
    fn missing_column_is_rejected() {
        let err = parse_schools("id;inep;escola\n1;2;x\n").expect_err("missing columns");
        assert_eq!(err.code, "bad_params");
    }
}

//! Raw-extract location and reading.
//!
//! The upstream export job drops spreadsheets under `raw/{period}/` with
//! inconsistent names: sometimes the canonical table name, usually a numeric
//! slug like `4_202501.xlsx`, occasionally a slug plus free-form label text.
//! The locator tries exact candidates first and falls back to a prefix scan
//! of the period folder.

use crate::constants;
use crate::domain::{CellValue, Frame, Period};
use crate::error::{GranaryError, Result};
use crate::registry::TableSpec;
use crate::storage::ObjectStore;
use calamine::{Data, Reader, Xlsx};
use std::io::Cursor;

pub struct ExtractLocator;

impl ExtractLocator {
    /// Candidate file names in probe order: canonical name first, then each
    /// alias slug, each tried bare and with the period suffix.
    pub fn candidates(spec: &TableSpec, period: Period) -> Vec<String> {
        let mut slugs: Vec<&str> = vec![spec.table_id.as_str()];
        slugs.extend(spec.aliases.iter().map(String::as_str));

        let mut names = Vec::with_capacity(slugs.len() * 4);
        for slug in slugs {
            names.push(format!("{}.xlsx", slug));
            names.push(format!("{}.csv", slug));
            names.push(format!("{}_{}.xlsx", slug, period));
            names.push(format!("{}_{}.csv", slug, period));
        }
        names
    }

    /// Finds the raw extract for a table in one period folder. `None` means
    /// no file was delivered, which callers treat as a skip.
    pub async fn locate(
        store: &dyn ObjectStore,
        spec: &TableSpec,
        period: Period,
    ) -> Result<Option<String>> {
        let period_str = period.to_string();
        for name in Self::candidates(spec, period) {
            let key = constants::raw_key(&period_str, &name);
            if store.exists(&key).await? {
                return Ok(Some(key));
            }
        }

        // Partial match: export jobs append label text after the slug, so
        // accept anything starting with "{slug}_" or "{slug}."
        let mut slugs: Vec<&str> = vec![spec.table_id.as_str()];
        slugs.extend(spec.aliases.iter().map(String::as_str));
        let listing = store.list(&constants::raw_period_prefix(&period_str)).await?;
        for key in listing {
            let matched = {
                let name = key.rsplit('/').next().unwrap_or("");
                slugs.iter().any(|slug| {
                    name.starts_with(&format!("{}_", slug))
                        || name.starts_with(&format!("{}.", slug))
                })
            };
            if matched {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }
}

/// Reads a raw extract into a frame, picking the reader by file extension.
pub async fn read_frame(
    store: &dyn ObjectStore,
    key: &str,
    sheet: Option<&str>,
) -> Result<Frame> {
    let bytes = store.get(key).await?;
    if key.ends_with(".xlsx") {
        XlsxReader::read(&bytes, sheet)
    } else {
        CsvReader::read(&bytes)
    }
}

pub struct XlsxReader;

impl XlsxReader {
    pub fn read(bytes: &[u8], sheet: Option<&str>) -> Result<Frame> {
        let mut workbook = Xlsx::new(Cursor::new(bytes.to_vec()))?;
        let range = match sheet {
            Some(name) => workbook.worksheet_range(name)?,
            None => workbook
                .worksheet_range_at(0)
                .ok_or_else(|| GranaryError::Storage("workbook has no sheets".to_string()))??,
        };
        Ok(frame_from_rows(range.rows()))
    }
}

/// Builds a frame from spreadsheet rows: first row is the header, rendered
/// as text with embedded line breaks stripped.
pub fn frame_from_rows<'a, I>(rows: I) -> Frame
where
    I: IntoIterator<Item = &'a [Data]>,
{
    let mut iter = rows.into_iter();
    let columns = match iter.next() {
        Some(header) => header
            .iter()
            .map(|cell| {
                cell_value(cell)
                    .render()
                    .unwrap_or_default()
                    .replace(['\n', '\r'], "")
            })
            .collect(),
        None => Vec::new(),
    };

    let mut frame = Frame::new(columns);
    for row in iter {
        let cells: Vec<CellValue> = row.iter().map(cell_value).collect();
        // Ranges include embedded blank rows; only rows with content count
        if cells.iter().any(|c| !c.is_null()) {
            frame.push_row(cells);
        }
    }
    frame
}

fn cell_value(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Null,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) => CellValue::Text(s.clone()),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(_) => CellValue::Null,
    }
}

pub struct CsvReader;

impl CsvReader {
    pub fn read(bytes: &[u8]) -> Result<Frame> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.replace(['\n', '\r'], ""))
            .collect();

        let mut frame = Frame::new(columns);
        for record in reader.records() {
            let record = record?;
            frame.push_row(record.iter().map(CellValue::from_csv_field).collect());
        }
        Ok(frame)
    }
}

pub struct CsvWriter;

impl CsvWriter {
    /// Serializes a frame as UTF-8 CSV with a header row; nulls render as
    /// empty fields.
    pub fn to_bytes(frame: &Frame) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&frame.columns)?;
        for row in &frame.rows {
            writer.write_record(row.iter().map(|c| c.render().unwrap_or_default()))?;
        }
        writer
            .into_inner()
            .map_err(|e| GranaryError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SemanticType;
    use crate::registry::{ColumnSpec, TableKind};
    use crate::storage::InMemoryObjectStore;

    fn spec() -> TableSpec {
        TableSpec {
            table_id: "ledger_income".to_string(),
            aliases: vec!["4".to_string()],
            sheet: None,
            description: None,
            columns: vec![ColumnSpec {
                source_name: "伝票日付".to_string(),
                target_name: "slip_date".to_string(),
                semantic_type: SemanticType::Date,
                description: None,
            }],
            kind: TableKind::SinglePeriod {
                partition_column: "slip_date".to_string(),
                partition_granularity: Default::default(),
            },
            range_delete: false,
            partition_first: false,
        }
    }

    #[test]
    fn candidates_probe_canonical_name_before_aliases() {
        let names = ExtractLocator::candidates(&spec(), Period::parse("202501").unwrap());
        assert_eq!(names[0], "ledger_income.xlsx");
        assert_eq!(names[1], "ledger_income.csv");
        assert_eq!(names[2], "ledger_income_202501.xlsx");
        assert!(names.contains(&"4_202501.xlsx".to_string()));
    }

    #[tokio::test]
    async fn locate_prefers_exact_candidates() {
        let store = InMemoryObjectStore::new();
        store.put("raw/202501/4.xlsx", b"x").await.unwrap();
        store.put("raw/202501/4_extra.xlsx", b"x").await.unwrap();

        let key = ExtractLocator::locate(&store, &spec(), Period::parse("202501").unwrap())
            .await
            .unwrap();
        assert_eq!(key.as_deref(), Some("raw/202501/4.xlsx"));
    }

    #[tokio::test]
    async fn locate_falls_back_to_prefix_scan() {
        let store = InMemoryObjectStore::new();
        store
            .put("raw/202501/4_収益明細(月次).xlsx", b"x")
            .await
            .unwrap();

        let key = ExtractLocator::locate(&store, &spec(), Period::parse("202501").unwrap())
            .await
            .unwrap();
        assert_eq!(key.as_deref(), Some("raw/202501/4_収益明細(月次).xlsx"));
    }

    #[tokio::test]
    async fn locate_returns_none_when_nothing_was_delivered() {
        let store = InMemoryObjectStore::new();
        // A slug sharing a digit prefix must not match: "41_" is not "4_"
        store.put("raw/202501/41_other.xlsx", b"x").await.unwrap();

        let key = ExtractLocator::locate(&store, &spec(), Period::parse("202501").unwrap())
            .await
            .unwrap();
        assert_eq!(key, None);
    }

    #[test]
    fn frame_from_rows_maps_cell_types_and_scrubs_headers() {
        let rows: Vec<Vec<Data>> = vec![
            vec![
                Data::String("支店\nコード".to_string()),
                Data::String("金額".to_string()),
                Data::String("備考".to_string()),
            ],
            vec![
                Data::Float(1.0),
                Data::Int(500),
                Data::String("済".to_string()),
            ],
            vec![Data::Empty, Data::Empty, Data::Empty],
            vec![Data::Bool(true), Data::Error(calamine::CellErrorType::Div0), Data::Empty],
        ];

        let frame = frame_from_rows(rows.iter().map(Vec::as_slice));
        assert_eq!(frame.columns, vec!["支店コード", "金額", "備考"]);
        // The all-empty row is dropped
        assert_eq!(frame.row_count(), 2);
        assert_eq!(frame.rows[0][0], CellValue::Number(1.0));
        assert_eq!(frame.rows[0][1], CellValue::Number(500.0));
        assert_eq!(frame.rows[1][0], CellValue::Bool(true));
        assert_eq!(frame.rows[1][1], CellValue::Null);
    }

    #[test]
    fn csv_reader_maps_empty_fields_to_null() {
        let bytes = "伝票日付,金額\n2025-01-15,1000\n,\n".as_bytes();
        let frame = CsvReader::read(bytes).unwrap();

        assert_eq!(frame.columns, vec!["伝票日付", "金額"]);
        assert_eq!(frame.row_count(), 2);
        assert_eq!(frame.rows[1][0], CellValue::Null);
        assert_eq!(frame.rows[1][1], CellValue::Null);
    }

    #[test]
    fn csv_writer_renders_nulls_as_empty_fields() {
        let mut frame = Frame::new(vec!["a".to_string(), "b".to_string()]);
        frame.push_row(vec![CellValue::Number(3.0), CellValue::Null]);
        frame.push_row(vec![
            CellValue::Text("x".to_string()),
            CellValue::Number(1.5),
        ]);

        let bytes = CsvWriter::to_bytes(&frame).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "a,b\n3,\nx,1.5\n");
    }
}

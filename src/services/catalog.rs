//! Order catalog
//!
//! Reads a delivery sheet (CSV or workbook) into raw rows, lists the delivery
//! dates it contains, and normalizes one date's rows into validated orders.
//! Bad cell values never abort the import: they default to zero/absent and are
//! reported as [`ImportIssue`]s. Only an unreadable source is an error.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, DataType, Range, Reader};
use chrono::{NaiveTime, Timelike};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{Channel, Coordinates, ImportIssue, ImportIssueLevel, Location, Order, TimeWindow};

/// Fatal order source errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read order source {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse CSV order source")]
    Csv(#[from] csv::Error),
    #[error("failed to open workbook {path}")]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
    #[error("workbook {0} has no sheets")]
    EmptyWorkbook(PathBuf),
    #[error("order source has no customer name column (expected one of: {})", NAME_ALIASES.join(", "))]
    MissingNameColumn,
}

const DATE_ALIASES: &[&str] = &["date", "delivery date"];
const NAME_ALIASES: &[&str] = &["ship-to name", "customer", "name"];
const ADDRESS_ALIASES: &[&str] = &["address"];
const REGION_ALIASES: &[&str] = &["region"];
const PROVINCE_ALIASES: &[&str] = &["province"];
const DISTRICT_ALIASES: &[&str] = &["district"];
const CHANNEL_ALIASES: &[&str] = &["channel", "channel tag"];
const WEIGHT_ALIASES: &[&str] = &["#kg.", "weight", "weight (kg)"];
const CASES_ALIASES: &[&str] = &["cases", "#case", "case"];
const WINDOW_START_ALIASES: &[&str] = &["time start", "window start"];
const WINDOW_END_ALIASES: &[&str] = &["time end", "window end"];
const LAT_ALIASES: &[&str] = &["lat", "latitude"];
const LNG_ALIASES: &[&str] = &["lng", "lon", "longitude"];

/// Workbook extensions read through calamine
const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// One source row with recognized fields, trimmed
#[derive(Debug, Clone, Default, PartialEq)]
struct SourceRow {
    row_number: u32,
    date: String,
    name: String,
    address: String,
    region: String,
    province: String,
    district: String,
    channel: String,
    weight: String,
    cases: String,
    window_start: String,
    window_end: String,
    lat: String,
    lng: String,
}

/// Orders for one delivery date plus everything that looked wrong in them
#[derive(Debug, Clone, Default)]
pub struct DailyOrders {
    pub date: String,
    pub orders: Vec<Order>,
    pub issues: Vec<ImportIssue>,
}

impl DailyOrders {
    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.level != ImportIssueLevel::Info)
            .count()
    }
}

/// All rows of an order source
#[derive(Debug, Clone, Default)]
pub struct OrderCatalog {
    rows: Vec<SourceRow>,
}

impl OrderCatalog {
    /// Read a CSV file or a workbook (first sheet), chosen by extension
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let catalog = if WORKBOOK_EXTENSIONS.contains(&extension.as_str()) {
            Self::from_workbook(path)?
        } else {
            let content = std::fs::read(path).map_err(|source| CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let content = String::from_utf8_lossy(&content);
            Self::from_csv_str(content.trim_start_matches('\u{feff}'))?
        };

        info!("Loaded {} order rows from {}", catalog.row_count(), path.display());
        Ok(catalog)
    }

    /// Parse CSV text; `;` is used as delimiter when the header has more of them than `,`
    pub fn from_csv_str(content: &str) -> Result<Self, CatalogError> {
        let header = content.lines().next().unwrap_or_default();
        let delimiter = if header.matches(';').count() > header.matches(',').count() {
            b';'
        } else {
            b','
        };
        Self::from_csv_reader(content.as_bytes(), delimiter)
    }

    pub fn from_csv_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, CatalogError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Self::from_table(&headers, rows)
    }

    fn from_workbook(path: &Path) -> Result<Self, CatalogError> {
        let mut workbook = open_workbook_auto(path).map_err(|source| CatalogError::Workbook {
            path: path.to_path_buf(),
            source,
        })?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| CatalogError::EmptyWorkbook(path.to_path_buf()))?
            .map_err(|source| CatalogError::Workbook {
                path: path.to_path_buf(),
                source,
            })?;

        let (headers, rows) = workbook_table(&range);
        Self::from_table(&headers, rows)
    }

    /// Map a header row plus data rows onto recognized fields
    fn from_table(headers: &[String], rows: Vec<Vec<String>>) -> Result<Self, CatalogError> {
        let columns: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_lowercase(), i))
            .collect();

        let column = |aliases: &[&str]| aliases.iter().find_map(|a| columns.get(*a).copied());
        let name_column = column(NAME_ALIASES).ok_or(CatalogError::MissingNameColumn)?;

        let fields = [
            column(DATE_ALIASES),
            column(ADDRESS_ALIASES),
            column(REGION_ALIASES),
            column(PROVINCE_ALIASES),
            column(DISTRICT_ALIASES),
            column(CHANNEL_ALIASES),
            column(WEIGHT_ALIASES),
            column(CASES_ALIASES),
            column(WINDOW_START_ALIASES),
            column(WINDOW_END_ALIASES),
            column(LAT_ALIASES),
            column(LNG_ALIASES),
        ];

        let rows = rows
            .into_iter()
            .enumerate()
            .filter(|(_, cells)| cells.iter().any(|c| !c.trim().is_empty()))
            .map(|(i, cells)| {
                let cell = |index: Option<usize>| {
                    index
                        .and_then(|i| cells.get(i))
                        .map(|c| c.trim().to_string())
                        .unwrap_or_default()
                };
                SourceRow {
                    // header is row 1
                    row_number: i as u32 + 2,
                    name: cell(Some(name_column)),
                    date: cell(fields[0]),
                    address: cell(fields[1]),
                    region: cell(fields[2]),
                    province: cell(fields[3]),
                    district: cell(fields[4]),
                    channel: cell(fields[5]),
                    weight: cell(fields[6]),
                    cases: cell(fields[7]),
                    window_start: cell(fields[8]),
                    window_end: cell(fields[9]),
                    lat: cell(fields[10]),
                    lng: cell(fields[11]),
                }
            })
            .collect();

        Ok(Self { rows })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Delivery dates in first-seen order
    pub fn dates(&self) -> Vec<String> {
        let mut dates: Vec<String> = Vec::new();
        for row in &self.rows {
            if !row.date.is_empty() && !dates.contains(&row.date) {
                dates.push(row.date.clone());
            }
        }
        dates
    }

    /// Normalize the rows of one delivery date.
    ///
    /// Channel tags outside `recognized_channels` collapse to the general
    /// channel; an empty list accepts every tag.
    pub fn orders_for(&self, date: &str, recognized_channels: &[Channel]) -> DailyOrders {
        let mut daily = DailyOrders {
            date: date.to_string(),
            ..Default::default()
        };

        for row in self.rows.iter().filter(|r| r.date == date) {
            if let Some(order) = normalize_row(row, recognized_channels, &mut daily.issues) {
                daily.orders.push(order);
            }
        }

        for issue in &daily.issues {
            match issue.level {
                ImportIssueLevel::Info => debug!("Row {}: {} ({})", issue.row_number, issue.message, issue.field),
                _ => warn!("Row {}: {} ({})", issue.row_number, issue.message, issue.field),
            }
        }

        info!(
            "Date {}: {} orders, {} import issues",
            date,
            daily.orders.len(),
            daily.issues.len()
        );
        daily
    }
}

fn normalize_row(row: &SourceRow, recognized: &[Channel], issues: &mut Vec<ImportIssue>) -> Option<Order> {
    let row_number = row.row_number;

    if row.name.is_empty() {
        issues.push(ImportIssue::error(row_number, "name", "Missing customer name, row skipped"));
        return None;
    }

    let weight_kg = parse_amount(&row.weight)
        .filter(|w| *w >= 0.0)
        .unwrap_or_else(|| {
            issues.push(ImportIssue::warning(row_number, "weight", "Invalid weight, using 0", Some(&row.weight)));
            0.0
        });

    let cases = parse_amount(&row.cases)
        .filter(|c| *c >= 0.0)
        .map(|c| c.round() as u32)
        .unwrap_or_else(|| {
            issues.push(ImportIssue::warning(row_number, "cases", "Invalid case count, using 0", Some(&row.cases)));
            0
        });

    let channel = if row.channel.is_empty() {
        Channel::general()
    } else {
        let tag = Channel::new(&row.channel);
        if recognized.is_empty() || recognized.contains(&tag) {
            tag
        } else {
            issues.push(ImportIssue {
                row_number,
                level: ImportIssueLevel::Info,
                field: "channel".to_string(),
                message: "Unrecognized channel tag, treated as general".to_string(),
                original_value: Some(row.channel.clone()),
            });
            Channel::general()
        }
    };

    let location = match (row.lat.is_empty(), row.lng.is_empty()) {
        (true, true) => Location::Unresolved,
        _ => match parse_coordinates(&row.lat, &row.lng) {
            Some(coords) => Location::Resolved(coords),
            None => {
                issues.push(ImportIssue::warning(
                    row_number,
                    "coordinates",
                    "Invalid coordinates, address will be geocoded",
                    Some(&format!("{}, {}", row.lat, row.lng)),
                ));
                Location::Unresolved
            }
        },
    };

    let address = if row.address.is_empty() {
        [row.name.as_str(), row.district.as_str(), row.province.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        row.address.clone()
    };

    Some(Order {
        id: row_number,
        name: row.name.clone(),
        address,
        region: row.region.clone(),
        province: (!row.province.is_empty()).then(|| row.province.clone()),
        district: row.district.clone(),
        channel,
        weight_kg,
        cases,
        location,
        time_window: parse_window(row, issues),
    })
}

/// Blank cells read as zero; thousands separators are ignored
fn parse_amount(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        return Some(0.0);
    }
    raw.replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn parse_coordinates(lat: &str, lng: &str) -> Option<Coordinates> {
    let lat: f64 = lat.parse().ok()?;
    let lng: f64 = lng.parse().ok()?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }
    Some(Coordinates { lat, lng })
}

/// Minutes of the day from `HH:MM` or `HH:MM:SS`
fn parse_minutes(raw: &str) -> Option<u16> {
    let time = NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()?;
    Some((time.hour() * 60 + time.minute()) as u16)
}

fn parse_window(row: &SourceRow, issues: &mut Vec<ImportIssue>) -> Option<TimeWindow> {
    let mut bound = |raw: &str, field: &str| -> Option<u16> {
        if raw.is_empty() {
            return None;
        }
        let minutes = parse_minutes(raw);
        if minutes.is_none() {
            issues.push(ImportIssue::warning(row.row_number, field, "Invalid time, ignored", Some(raw)));
        }
        minutes
    };

    let start = bound(&row.window_start, "time_start");
    let end = bound(&row.window_end, "time_end");
    if start.is_none() && end.is_none() {
        return None;
    }

    let window = TimeWindow::new(start.unwrap_or(0), end.unwrap_or(TimeWindow::LAST_MINUTE));
    if window.is_none() {
        issues.push(ImportIssue::warning(
            row.row_number,
            "time_window",
            "Window ends before it starts, ignored",
            Some(&format!("{}-{}", row.window_start, row.window_end)),
        ));
    }
    window
}

/// Header row and data rows of a worksheet as text.
///
/// Time window columns keep the time of day of date/time cells; every other
/// date/time cell keeps its calendar date.
fn workbook_table(range: &Range<Data>) -> (Vec<String>, Vec<Vec<String>>) {
    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .map(|row| row.iter().map(|c| cell_to_string(c, false)).collect())
        .unwrap_or_default();

    let time_columns: Vec<bool> = headers
        .iter()
        .map(|h| {
            let h = h.trim().to_lowercase();
            WINDOW_START_ALIASES.contains(&h.as_str()) || WINDOW_END_ALIASES.contains(&h.as_str())
        })
        .collect();

    let rows = rows
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, c)| cell_to_string(c, time_columns.get(i).copied().unwrap_or(false)))
                .collect()
        })
        .collect();

    (headers, rows)
}

/// Convert a workbook cell to trimmed text
fn cell_to_string(cell: &Data, time_of_day: bool) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty | Data::Error(_) => String::new(),
        Data::Float(_) | Data::DateTime(_) | Data::DateTimeIso(_) if time_of_day => match cell.as_time() {
            Some(time) => time.format("%H:%M").to_string(),
            None => cell.to_string().trim().to_string(),
        },
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => match other.as_date() {
            Some(date) => date.format("%Y-%m-%d").to_string(),
            None => other.to_string().trim().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "\
Date,Ship-to Name,District,Province,Region,Channel,#Kg.,Cases,Time Start,Time End,Lat,Lng
2024-05-01,Shop A,Bang Rak,Bangkok,Central,MAKRO,\"1,250.5\",12,08:00,10:00,13.72,100.52
2024-05-01,Shop B,Mueang,Nonthaburi,Central,,abc,3,,,,
2024-05-01,,Mueang,Nonthaburi,Central,,10,1,,,,
2024-05-02,Shop C,Bang Na,Bangkok,Central,weird,20,x,10:00,09:00,,
2024-05-01,Shop D,Bang Na,Bangkok,Central,cvs,15,2,13:00,,999,100.5
";

    fn recognized() -> Vec<Channel> {
        vec![Channel::new("MAKRO"), Channel::new("CVS")]
    }

    #[test]
    fn test_dates_in_first_seen_order() {
        let catalog = OrderCatalog::from_csv_str(SHEET).unwrap();
        assert_eq!(catalog.row_count(), 5);
        assert_eq!(catalog.dates(), vec!["2024-05-01", "2024-05-02"]);
    }

    #[test]
    fn test_orders_for_date_normalizes_fields() {
        let catalog = OrderCatalog::from_csv_str(SHEET).unwrap();
        let daily = catalog.orders_for("2024-05-01", &recognized());

        let names: Vec<&str> = daily.orders.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Shop A", "Shop B", "Shop D"]);

        let a = &daily.orders[0];
        assert_eq!(a.id, 2);
        assert!((a.weight_kg - 1250.5).abs() < 1e-9);
        assert_eq!(a.cases, 12);
        assert_eq!(a.channel, Channel::new("MAKRO"));
        assert_eq!(a.province.as_deref(), Some("Bangkok"));
        assert_eq!(a.address, "Shop A Bang Rak Bangkok");
        assert_eq!(a.time_window, TimeWindow::new(480, 600));
        assert_eq!(a.location, Location::Resolved(Coordinates { lat: 13.72, lng: 100.52 }));
    }

    #[test]
    fn test_bad_values_default_and_are_reported() {
        let catalog = OrderCatalog::from_csv_str(SHEET).unwrap();
        let daily = catalog.orders_for("2024-05-01", &recognized());

        let b = &daily.orders[1];
        assert_eq!(b.weight_kg, 0.0);
        assert_eq!(b.channel, Channel::general());
        assert_eq!(b.location, Location::Unresolved);
        assert!(b.time_window.is_none());

        let d = &daily.orders[2];
        assert_eq!(d.channel, Channel::new("CVS"));
        assert_eq!(d.location, Location::Unresolved, "latitude 999 is rejected");
        assert_eq!(d.time_window, TimeWindow::new(13 * 60, TimeWindow::LAST_MINUTE));

        let fields: Vec<&str> = daily.issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"weight"));
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"coordinates"));
        assert_eq!(daily.warning_count(), 3);
    }

    #[test]
    fn test_unrecognized_channel_and_reversed_window() {
        let catalog = OrderCatalog::from_csv_str(SHEET).unwrap();
        let daily = catalog.orders_for("2024-05-02", &recognized());

        let c = &daily.orders[0];
        assert_eq!(c.channel, Channel::general());
        assert_eq!(c.cases, 0);
        assert!(c.time_window.is_none());

        let levels: Vec<(&str, ImportIssueLevel)> =
            daily.issues.iter().map(|i| (i.field.as_str(), i.level)).collect();
        assert!(levels.contains(&("channel", ImportIssueLevel::Info)));
        assert!(levels.contains(&("cases", ImportIssueLevel::Warning)));
        assert!(levels.contains(&("time_window", ImportIssueLevel::Warning)));
    }

    #[test]
    fn test_empty_recognized_list_accepts_any_tag() {
        let catalog = OrderCatalog::from_csv_str(SHEET).unwrap();
        let daily = catalog.orders_for("2024-05-02", &[]);
        assert_eq!(daily.orders[0].channel, Channel::new("WEIRD"));
    }

    #[test]
    fn test_semicolon_sheet_with_aliases() {
        let sheet = "Delivery Date;Customer;Address;Weight;Latitude;Longitude\n\
                     01/05/2024;Shop Z;12 Sukhumvit Rd;40;13.7;100.6\n";
        let catalog = OrderCatalog::from_csv_str(sheet).unwrap();
        let daily = catalog.orders_for("01/05/2024", &[]);

        assert_eq!(daily.orders.len(), 1);
        assert_eq!(daily.orders[0].address, "12 Sukhumvit Rd");
        assert!(daily.orders[0].province.is_none());
        assert!(daily.orders[0].location.is_resolved());
        assert!(daily.issues.is_empty());
    }

    #[test]
    fn test_missing_name_column_is_fatal() {
        let result = OrderCatalog::from_csv_str("Date,Weight\n2024-05-01,10\n");
        assert!(matches!(result, Err(CatalogError::MissingNameColumn)));
    }

    #[test]
    fn test_unreadable_file_is_fatal() {
        let result = OrderCatalog::from_path(Path::new("/nonexistent/orders.csv"));
        assert!(matches!(result, Err(CatalogError::Io { .. })));
    }

    #[test]
    fn test_workbook_time_cells_keep_time_of_day() {
        use calamine::{ExcelDateTime, ExcelDateTimeType};

        let datetime = |value: f64| Data::DateTime(ExcelDateTime::new(value, ExcelDateTimeType::DateTime, false));
        let header = ["Date", "Ship-to Name", "#Kg.", "Time Start", "Time End"];

        let mut range: Range<Data> = Range::new((0, 0), (1, 4));
        for (col, title) in header.iter().enumerate() {
            range.set_value((0, col as u32), Data::String(title.to_string()));
        }
        // 2024-05-01, 08:15 and 10:30
        range.set_value((1, 0), datetime(45413.0));
        range.set_value((1, 1), Data::String("Shop A".to_string()));
        range.set_value((1, 2), Data::Float(120.0));
        range.set_value((1, 3), datetime(0.34375));
        range.set_value((1, 4), datetime(0.4375));

        let (headers, rows) = workbook_table(&range);
        assert_eq!(rows[0], vec!["2024-05-01", "Shop A", "120", "08:15", "10:30"]);

        let catalog = OrderCatalog::from_table(&headers, rows).unwrap();
        let daily = catalog.orders_for("2024-05-01", &recognized());
        assert_eq!(daily.orders.len(), 1);
        assert_eq!(daily.orders[0].time_window, TimeWindow::new(495, 630));
        assert!(daily.issues.iter().all(|i| !i.field.starts_with("time")));
    }

    #[test]
    fn test_parse_minutes() {
        assert_eq!(parse_minutes("08:30"), Some(510));
        assert_eq!(parse_minutes("23:59:59"), Some(1439));
        assert_eq!(parse_minutes("25:00"), None);
        assert_eq!(parse_minutes("noon"), None);
    }
}

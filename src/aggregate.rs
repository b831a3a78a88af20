//! Deterministic aggregation over the pre-aggregated profile tables.
//!
//! Three independent operations share the "group/reshape flat rows"
//! pattern: a time series at one depth, a dense depth×time contour matrix,
//! and per-float trajectories. All three address rows through the grid-cell
//! id scheme in [`crate::grid`] and query through the strict executor mode
//! (database errors propagate; the caller needs to distinguish "no data"
//! from "query failed").

use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::Serialize;

use crate::grid;
use crate::store::{Row, SqlExecutor, SqlParam};

// ============ Time series at depth ============

/// One measurement in a time series or trajectory query result.
#[derive(Debug, Clone, Serialize)]
pub struct TimeSeriesPoint {
    pub time: String,
    pub avg_temperature: Option<f64>,
    pub avg_salinity: Option<f64>,
}

/// Time series for one grid cell at one depth, ascending by time.
#[derive(Debug, Clone, Serialize)]
pub struct TimeSeries {
    pub grid_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub profiles: Vec<TimeSeriesPoint>,
}

/// Fetch the time series for a single, addressable cell/depth combination.
///
/// Zero rows is an error, not an empty success: the caller asked about one
/// specific cell and depth, so silence there is informative.
pub async fn timeseries_at_depth(
    executor: &dyn SqlExecutor,
    cell_size: f64,
    lat: f64,
    lng: f64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    depth: i64,
) -> Result<TimeSeries> {
    let grid_id = grid::resolve(lat, lng, cell_size);

    let sql = r#"
        SELECT
            grid_id,
            latitude,
            longitude,
            time_period AS time,
            avg_temperature,
            avg_salinity
        FROM
            argo_depth_ocean_profiles
        WHERE
            grid_id = $1
            AND depth = $2
            AND time_period BETWEEN $3 AND $4
        ORDER BY
            time_period ASC
    "#;

    let rows = executor
        .fetch_strict(
            sql,
            &[
                SqlParam::Text(grid_id.clone()),
                SqlParam::Int(depth),
                SqlParam::Date(start_date),
                SqlParam::Date(end_date),
            ],
        )
        .await?;

    if rows.is_empty() {
        bail!(
            "no data found for grid '{}' at depth {}m in the specified date range",
            grid_id,
            depth
        );
    }

    let first = &rows[0];
    Ok(TimeSeries {
        grid_id,
        latitude: get_f64(first, "latitude"),
        longitude: get_f64(first, "longitude"),
        profiles: rows
            .iter()
            .map(|row| TimeSeriesPoint {
                time: get_str(row, "time").unwrap_or_default(),
                avg_temperature: get_f64(row, "avg_temperature"),
                avg_salinity: get_f64(row, "avg_salinity"),
            })
            .collect(),
    })
}

// ============ Depth-time contour ============

/// The measured variable a contour can be built over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContourVariable {
    Temperature,
    Salinity,
}

impl ContourVariable {
    /// Parse the request parameter. Anything outside the two-valued enum
    /// is a validation error, never silently defaulted.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "temperature" => Ok(Self::Temperature),
            "salinity" => Ok(Self::Salinity),
            other => bail!(
                "variable '{}' is invalid: must be one of temperature, salinity",
                other
            ),
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Self::Temperature => "avg_temperature",
            Self::Salinity => "avg_salinity",
        }
    }
}

/// Dense depth×time grid of one variable with explicit missing cells.
#[derive(Debug, Clone, Serialize)]
pub struct ContourMatrix {
    pub grid_id: String,
    /// Unique times in first-seen (time-ascending) order.
    pub times: Vec<String>,
    /// Unique depths sorted ascending.
    pub depths: Vec<i64>,
    /// `matrix[d][t]` is the value at `(depths[d], times[t])`, or `null`
    /// when no row supplied that combination.
    pub matrix: Vec<Vec<Option<f64>>>,
}

/// Build the contour matrix for one grid cell and date range.
pub async fn depth_time_contour(
    executor: &dyn SqlExecutor,
    cell_size: f64,
    lat: f64,
    lng: f64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    variable: &str,
) -> Result<ContourMatrix> {
    // Validate before any query executes.
    let variable = ContourVariable::parse(variable)?;
    let grid_id = grid::resolve(lat, lng, cell_size);

    let sql = format!(
        r#"
        SELECT
            time_period AS time,
            depth,
            {} AS value
        FROM
            argo_depth_ocean_profiles
        WHERE
            grid_id = $1
            AND time_period BETWEEN $2 AND $3
        ORDER BY
            time_period ASC, depth ASC
    "#,
        variable.column()
    );

    let rows = executor
        .fetch_strict(
            &sql,
            &[
                SqlParam::Text(grid_id.clone()),
                SqlParam::Date(start_date),
                SqlParam::Date(end_date),
            ],
        )
        .await?;

    if rows.is_empty() {
        bail!(
            "no data found for grid '{}' in the specified date range",
            grid_id
        );
    }

    let triples: Vec<(String, i64, Option<f64>)> = rows
        .iter()
        .map(|row| {
            (
                get_str(row, "time").unwrap_or_default(),
                get_i64(row, "depth").unwrap_or_default(),
                get_f64(row, "value"),
            )
        })
        .collect();

    let (times, depths, matrix) = build_contour(&triples);

    Ok(ContourMatrix {
        grid_id,
        times,
        depths,
        matrix,
    })
}

/// Reshape `(time, depth, value)` triples into the dense matrix.
///
/// Times keep their first-seen order (the query orders by time ascending),
/// depths are deduplicated and sorted ascending, and every absent
/// combination holds `None` — no value is ever fabricated.
fn build_contour(
    triples: &[(String, i64, Option<f64>)],
) -> (Vec<String>, Vec<i64>, Vec<Vec<Option<f64>>>) {
    let mut times: Vec<String> = Vec::new();
    let mut depths: Vec<i64> = Vec::new();

    for (time, depth, _) in triples {
        if !times.contains(time) {
            times.push(time.clone());
        }
        if !depths.contains(depth) {
            depths.push(*depth);
        }
    }
    depths.sort_unstable();

    let mut matrix = vec![vec![None; times.len()]; depths.len()];
    for (time, depth, value) in triples {
        let t = times.iter().position(|x| x == time).unwrap();
        let d = depths.iter().position(|x| x == depth).unwrap();
        matrix[d][t] = *value;
    }

    (times, depths, matrix)
}

// ============ Trajectories ============

/// A float's position at one time.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryPoint {
    pub time: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// One float's ordered positions.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectorySeries {
    pub argo_id: String,
    pub points: Vec<TrajectoryPoint>,
}

/// Flatten repeated and comma-joined id parameters into one list,
/// deduplicated preserving first occurrence.
pub fn normalize_ids(raw: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for value in raw {
        for token in value.split(',') {
            let token = token.trim();
            if !token.is_empty() && !ids.iter().any(|existing| existing == token) {
                ids.push(token.to_string());
            }
        }
    }
    ids
}

/// Decode the comma-joined `argo_float_ids` column into discrete tokens.
pub fn parse_float_ids(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fetch one series per requested float id that matched at least one row.
///
/// Ids with no matching rows are simply absent from the result. An empty
/// id list is rejected before any query executes.
pub async fn trajectories(
    executor: &dyn SqlExecutor,
    ids: &[String],
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<Vec<TrajectorySeries>> {
    if ids.is_empty() {
        bail!("at least one argo_id must be provided");
    }

    // Parameter-bound LIKE clauses prefilter in SQL; exact token matching
    // below rejects substring hits ('123' inside '1234').
    let mut params: Vec<SqlParam> = Vec::new();
    let like_clauses: Vec<String> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            params.push(SqlParam::Text(id.clone()));
            format!("argo_float_ids LIKE '%' || ${} || '%'", i + 1)
        })
        .collect();

    let mut sql = format!(
        r#"
        SELECT
            "TIME" AS time,
            latitude,
            longitude,
            argo_float_ids
        FROM
            "Average_Ocean_Profiles"
        WHERE
            ({})
    "#,
        like_clauses.join(" OR ")
    );

    if let Some(start) = start_date {
        params.push(SqlParam::Date(start));
        sql.push_str(&format!(" AND \"TIME\" >= ${}", params.len()));
    }
    if let Some(end) = end_date {
        params.push(SqlParam::Date(end));
        sql.push_str(&format!(" AND \"TIME\" <= ${}", params.len()));
    }
    sql.push_str(" ORDER BY \"TIME\" ASC");

    let rows = executor.fetch_strict(&sql, &params).await?;

    Ok(group_trajectories(ids, &rows))
}

/// Group rows by requested id, preserving each group's first-seen
/// (time-ascending) order.
fn group_trajectories(ids: &[String], rows: &[Row]) -> Vec<TrajectorySeries> {
    let mut series: Vec<TrajectorySeries> = ids
        .iter()
        .map(|id| TrajectorySeries {
            argo_id: id.clone(),
            points: Vec::new(),
        })
        .collect();

    for row in rows {
        let tokens = parse_float_ids(&get_str(row, "argo_float_ids").unwrap_or_default());
        let point = TrajectoryPoint {
            time: get_str(row, "time").unwrap_or_default(),
            latitude: get_f64(row, "latitude"),
            longitude: get_f64(row, "longitude"),
        };

        for entry in series.iter_mut() {
            if tokens.iter().any(|token| *token == entry.argo_id) {
                entry.points.push(point.clone());
            }
        }
    }

    series
        .into_iter()
        .filter(|entry| !entry.points.is_empty())
        .collect()
}

// ============ Row access helpers ============

fn get_str(row: &Row, key: &str) -> Option<String> {
    row.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn get_f64(row: &Row, key: &str) -> Option<f64> {
    row.get(key).and_then(|v| v.as_f64())
}

fn get_i64(row: &Row, key: &str) -> Option<i64> {
    row.get(key).and_then(|v| v.as_i64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_row(entries: &[(&str, serde_json::Value)]) -> Row {
        let mut row = Row::new();
        for (key, value) in entries {
            row.insert(key.to_string(), value.clone());
        }
        row
    }

    #[test]
    fn test_build_contour_dense_matrix() {
        let triples = vec![
            ("2023-01-01".to_string(), 10, Some(25.1)),
            ("2023-01-01".to_string(), 100, Some(24.0)),
            ("2023-01-02".to_string(), 10, Some(25.5)),
        ];

        let (times, depths, matrix) = build_contour(&triples);

        assert_eq!(times, vec!["2023-01-01", "2023-01-02"]);
        assert_eq!(depths, vec![10, 100]);
        assert_eq!(
            matrix,
            vec![
                vec![Some(25.1), Some(25.5)],
                vec![Some(24.0), None],
            ]
        );
    }

    #[test]
    fn test_build_contour_shape() {
        let triples = vec![
            ("t1".to_string(), 500, Some(8.0)),
            ("t2".to_string(), 10, Some(26.0)),
            ("t3".to_string(), 100, None),
        ];
        let (times, depths, matrix) = build_contour(&triples);

        assert_eq!(matrix.len(), depths.len());
        for line in &matrix {
            assert_eq!(line.len(), times.len());
        }
        // Depths sorted ascending regardless of arrival order.
        assert_eq!(depths, vec![10, 100, 500]);
        // A row with a NULL value stays an explicit missing cell.
        assert_eq!(matrix[1][2], None);
    }

    #[test]
    fn test_contour_variable_parse() {
        assert_eq!(
            ContourVariable::parse("temperature").unwrap(),
            ContourVariable::Temperature
        );
        assert_eq!(
            ContourVariable::parse("salinity").unwrap(),
            ContourVariable::Salinity
        );
        let err = ContourVariable::parse("oxygen").unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn test_normalize_ids_comma_and_repeated_equivalent() {
        let joined = normalize_ids(&["123,456".to_string()]);
        let repeated = normalize_ids(&["123".to_string(), "456".to_string()]);
        assert_eq!(joined, repeated);
        assert_eq!(joined, vec!["123", "456"]);
    }

    #[test]
    fn test_normalize_ids_dedupes_preserving_first_occurrence() {
        let ids = normalize_ids(&["456, 123".to_string(), "123,789".to_string()]);
        assert_eq!(ids, vec!["456", "123", "789"]);
    }

    #[test]
    fn test_normalize_ids_drops_empty_tokens() {
        let ids = normalize_ids(&[", 123,,".to_string(), "".to_string()]);
        assert_eq!(ids, vec!["123"]);
    }

    #[test]
    fn test_parse_float_ids() {
        assert_eq!(parse_float_ids("123, 456"), vec!["123", "456"]);
        assert_eq!(parse_float_ids("123"), vec!["123"]);
        assert!(parse_float_ids("").is_empty());
    }

    #[test]
    fn test_group_trajectories_only_matched_ids() {
        let rows = vec![
            make_row(&[
                ("time", json!("2023-01-01")),
                ("latitude", json!(13.0)),
                ("longitude", json!(61.0)),
                ("argo_float_ids", json!("123, 999")),
            ]),
            make_row(&[
                ("time", json!("2023-01-02")),
                ("latitude", json!(13.2)),
                ("longitude", json!(61.1)),
                ("argo_float_ids", json!("123")),
            ]),
        ];

        let ids = vec!["123".to_string(), "456".to_string()];
        let series = group_trajectories(&ids, &rows);

        // "456" matched nothing and is absent, not an error.
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].argo_id, "123");
        assert_eq!(series[0].points.len(), 2);
        assert_eq!(series[0].points[0].time, "2023-01-01");
        assert_eq!(series[0].points[1].time, "2023-01-02");
    }

    #[test]
    fn test_group_trajectories_exact_token_match() {
        // '123' must not match inside '1234'.
        let rows = vec![make_row(&[
            ("time", json!("2023-01-01")),
            ("latitude", json!(10.0)),
            ("longitude", json!(60.0)),
            ("argo_float_ids", json!("1234, 5678")),
        ])];

        let series = group_trajectories(&["123".to_string()], &rows);
        assert!(series.is_empty());
    }

    #[test]
    fn test_group_trajectories_row_shared_by_two_ids() {
        let rows = vec![make_row(&[
            ("time", json!("2023-01-01")),
            ("latitude", json!(10.0)),
            ("longitude", json!(60.0)),
            ("argo_float_ids", json!("123, 456")),
        ])];

        let ids = vec!["123".to_string(), "456".to_string()];
        let series = group_trajectories(&ids, &rows);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].points.len(), 1);
        assert_eq!(series[1].points.len(), 1);
    }
}

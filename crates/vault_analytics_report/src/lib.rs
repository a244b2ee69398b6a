//! Export of computed reports as a JSON envelope, RFC 4180 CSV, or a static
//! HTML page.
//!
//! Large quantities are already decimal strings in the serialized reports;
//! nothing here converts them to floating point.

use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use vault_analytics::analytics::{AchievementReport, RetentionMatrix};
use vault_analytics::conservation::ConservationReport;
use vault_analytics::verify::{ExportEnvelope, VerifyError};
use vault_analytics::{
    AnalyticsResult, CohortAnalysis, DistributionReport, DormancyRisk, EcosystemHealth,
    IndexedEvent, TimeSeries, Vault,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    Html,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Html => "html",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "html" => Ok(ExportFormat::Html),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

/// Any report the analytics layer produces.
#[derive(Clone, Debug)]
pub enum Report {
    Ranked(AnalyticsResult),
    Vaults(Vec<Vault>),
    Distribution(DistributionReport),
    Cohorts(CohortAnalysis),
    Retention(RetentionMatrix),
    Health(EcosystemHealth),
    Risks(Vec<DormancyRisk>),
    Conservation(ConservationReport),
    Series(TimeSeries),
    Achievements(AchievementReport),
    Events(Vec<IndexedEvent>),
}

impl Report {
    /// Envelope `kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Report::Ranked(_) => "ranked_vaults",
            Report::Vaults(_) => "vaults",
            Report::Distribution(_) => "distribution",
            Report::Cohorts(_) => "cohorts",
            Report::Retention(_) => "retention_matrix",
            Report::Health(_) => "ecosystem_health",
            Report::Risks(_) => "dormancy_risks",
            Report::Conservation(_) => "conservation",
            Report::Series(_) => "time_series",
            Report::Achievements(_) => "achievements",
            Report::Events(_) => "events",
        }
    }

    /// Serialized report, fields in declaration order.
    pub fn data(&self) -> Result<Value, ExportError> {
        let value = match self {
            Report::Ranked(r) => to_value(r),
            Report::Vaults(r) => to_value(r),
            Report::Distribution(r) => to_value(r),
            Report::Cohorts(r) => to_value(r),
            Report::Retention(r) => to_value(r),
            Report::Health(r) => to_value(r),
            Report::Risks(r) => to_value(r),
            Report::Conservation(r) => to_value(r),
            Report::Series(r) => to_value(r),
            Report::Achievements(r) => to_value(r),
            Report::Events(r) => to_value(r),
        };
        value.map_err(ExportError::Json)
    }

    pub fn envelope(&self) -> Result<ExportEnvelope, ExportError> {
        ExportEnvelope::new(self.kind(), self.data()?).map_err(ExportError::Verify)
    }

    /// Tabular view used by CSV and HTML.
    pub fn table(&self) -> Result<Table, ExportError> {
        let data = self.data()?;
        let table = match self {
            Report::Ranked(_) => Table::from_records(items(&data, "vaults")),
            Report::Cohorts(_) => Table::from_records(items(&data, "cohorts")),
            Report::Series(_) => Table::from_records(items(&data, "points")),
            Report::Achievements(_) => Table::from_records(items(&data, "distribution")),
            Report::Health(_) => Table::from_records(std::slice::from_ref(&data)),
            Report::Vaults(_) | Report::Risks(_) | Report::Events(_) => {
                Table::from_records(data.as_array().map_or(&[][..], Vec::as_slice))
            }
            Report::Distribution(d) => distribution_table(d),
            Report::Retention(m) => retention_table(m),
            Report::Conservation(c) => conservation_table(c),
        };
        Ok(table)
    }
}

fn to_value<T: Serialize>(v: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(v)
}

fn items<'a>(data: &'a Value, field: &str) -> &'a [Value] {
    data.get(field)
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

/// Header plus rows of cells.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Flatten JSON objects into columns. Nested objects become dotted
    /// names; the header is the union of names in first-seen order.
    pub fn from_records(records: &[Value]) -> Self {
        let flat: Vec<Vec<(String, String)>> = records
            .iter()
            .map(|r| {
                let mut out = Vec::new();
                flatten("", r, &mut out);
                out
            })
            .collect();
        let mut headers: Vec<String> = Vec::new();
        for row in &flat {
            for (name, _) in row {
                if !headers.contains(name) {
                    headers.push(name.clone());
                }
            }
        }
        let rows = flat
            .into_iter()
            .map(|row| {
                let cells: Map<String, Value> =
                    row.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
                headers
                    .iter()
                    .map(|h| cells.get(h).and_then(Value::as_str).unwrap_or_default().to_string())
                    .collect()
            })
            .collect();
        Self { headers, rows }
    }

    /// RFC 4180: CRLF line endings, fields quoted when needed.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let mut line = |cells: &[String]| {
            let quoted: Vec<String> = cells.iter().map(|c| csv_field(c)).collect();
            out.push_str(&quoted.join(","));
            out.push_str("\r\n");
        };
        line(&self.headers);
        for row in &self.rows {
            line(row);
        }
        out
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let name = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&name, v, out);
            }
        }
        scalar => out.push((prefix.to_string(), cell(scalar))),
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn table(headers: &[&str], rows: Vec<Vec<String>>) -> Table {
    Table {
        headers: headers.iter().map(|h| (*h).to_string()).collect(),
        rows,
    }
}

fn pct(v: f64) -> String {
    format!("{v:.4}")
}

fn distribution_table(d: &DistributionReport) -> Table {
    let mut rows = Vec::new();
    for g in &d.tiers.tiers {
        rows.push(vec![
            "tier".to_string(),
            g.key.to_string(),
            g.count.to_string(),
            g.collateral.to_string(),
            pct(g.percentage),
        ]);
    }
    for g in &d.dormancy {
        rows.push(vec![
            "dormancy".to_string(),
            g.key.as_str().to_string(),
            g.count.to_string(),
            g.collateral.to_string(),
            pct(g.percentage),
        ]);
    }
    let v = &d.vesting;
    for (key, count, collateral, share) in [
        ("vested", v.vested_count, v.vested_collateral, v.vested_percentage),
        ("vesting", v.vesting_count, v.vesting_collateral, v.vesting_percentage),
    ] {
        rows.push(vec![
            "vesting".to_string(),
            key.to_string(),
            count.to_string(),
            collateral.to_string(),
            pct(share),
        ]);
    }
    let population = d.population;
    for b in &d.portfolio.buckets {
        let share = if population == 0 {
            0.0
        } else {
            b.count as f64 / population as f64 * 100.0
        };
        rows.push(vec![
            "collateral".to_string(),
            b.label.to_string(),
            b.count.to_string(),
            b.total.to_string(),
            pct(share),
        ]);
    }
    table(&["group", "key", "count", "collateral", "percentage"], rows)
}

fn retention_table(m: &RetentionMatrix) -> Table {
    let width = m.rows.iter().map(|r| r.retention.len()).max().unwrap_or(0);
    let mut headers: Vec<String> = ["cohort", "label", "size"].map(String::from).to_vec();
    headers.extend((0..width).map(|k| format!("m{k}")));
    let rows = m
        .rows
        .iter()
        .map(|r| {
            let mut row = vec![r.cohort.to_string(), r.label.clone(), r.size.to_string()];
            row.extend((0..width).map(|k| match r.retention.get(k) {
                Some(v) => pct(*v),
                None => String::new(),
            }));
            row
        })
        .collect();
    Table { headers, rows }
}

fn conservation_table(c: &ConservationReport) -> Table {
    let mut rows: Vec<Vec<String>> = c
        .denominations
        .iter()
        .map(|(denom, d)| {
            vec![
                denom.clone(),
                d.locked.to_string(),
                d.accounted.to_string(),
                d.discrepancy.to_string(),
                d.overdrawn.to_string(),
                d.stranded.to_string(),
            ]
        })
        .collect();
    rows.push(vec![
        vault_analytics::conservation::VESTED_TOKEN_LEDGER.to_string(),
        c.vested_token.supply.to_string(),
        c.vested_token.vault_side.to_string(),
        c.vested_token.discrepancy.to_string(),
        "0".to_string(),
        "0".to_string(),
    ]);
    for v in c
        .violations
        .iter()
        .filter(|v| v.ledger == vault_analytics::conservation::MATCH_POOL_LEDGER)
    {
        rows.push(vec![
            v.ledger.clone(),
            String::new(),
            String::new(),
            v.discrepancy.to_string(),
            String::new(),
            String::new(),
        ]);
    }
    table(
        &["ledger", "expected", "actual", "discrepancy", "overdrawn", "stranded"],
        rows,
    )
}

/// Serialize `report` in `format`.
pub fn export(report: &Report, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Json => {
            let mut bytes = serde_json::to_vec_pretty(&report.envelope()?).map_err(ExportError::Json)?;
            bytes.push(b'\n');
            Ok(bytes)
        }
        ExportFormat::Csv => Ok(report.table()?.to_csv().into_bytes()),
        ExportFormat::Html => Ok(build_html(report)?.into_bytes()),
    }
}

/// Write an export to `out_path`.
pub fn write_export(
    report: &Report,
    format: ExportFormat,
    out_path: impl AsRef<Path>,
) -> Result<(), ExportError> {
    let bytes = export(report, format)?;
    let mut f = std::fs::File::create(out_path.as_ref()).map_err(ExportError::Io)?;
    f.write_all(&bytes).map_err(ExportError::Io)?;
    Ok(())
}

/// Static page: the table plus the JSON envelope embedded for verification.
pub fn build_html(report: &Report) -> Result<String, ExportError> {
    let envelope = report.envelope()?;
    let json_embed = serde_json::to_string(&envelope).map_err(ExportError::Json)?;
    let t = report.table()?;
    let head: String = t
        .headers
        .iter()
        .map(|h| format!("<th>{}</th>", escape_html(h)))
        .collect();
    let body: String = t
        .rows
        .iter()
        .map(|r| {
            let cells: String = r
                .iter()
                .map(|c| format!("<td>{}</td>", escape_html(c)))
                .collect();
            format!("<tr>{cells}</tr>\n")
        })
        .collect();
    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8"/>
<meta name="viewport" content="width=device-width,initial-scale=1"/>
<title>Vault analytics – {kind}</title>
<style>
:root {{ font-family: system-ui, sans-serif; background: #0f1419; color: #e6edf3; }}
body {{ max-width: 960px; margin: 0 auto; padding: 1.5rem; }}
h1 {{ font-size: 1.4rem; }}
table {{ border-collapse: collapse; width: 100%; font-size: 0.9rem; }}
th, td {{ border: 1px solid #30363d; padding: 0.25rem 0.5rem; text-align: left; }}
.mono {{ font-family: ui-monospace, monospace; font-size: 0.85em; word-break: break-all; }}
.footer {{ margin-top: 2rem; font-size: 0.85rem; color: #8b949e; }}
</style>
</head>
<body>
<h1>{kind}</h1>
<p class="mono">SHA-256: {digest}</p>
<table>
<thead><tr>{head}</tr></thead>
<tbody>
{body}</tbody>
</table>
<p class="footer">Verify with <code>vault-analytics verify --file &lt;export.json&gt;</code>. The export is embedded below. Do not edit.</p>
<script type="application/json" id="export-envelope">{json}</script>
</body>
</html>
"#,
        kind = escape_html(report.kind()),
        digest = escape_html(&envelope.digest),
        head = head,
        body = body,
        json = escape_html(&json_embed),
    ))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug)]
pub enum ExportError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Verify(VerifyError),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Io(e) => write!(f, "io: {}", e),
            ExportError::Json(e) => write!(f, "json: {}", e),
            ExportError::Verify(e) => write!(f, "digest: {}", e),
        }
    }
}

impl std::error::Error for ExportError {}

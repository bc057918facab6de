//! SQLite-backed accounting of LLM token usage and cost.
//!
//! One row per call, inserted with `INSERT OR REPLACE` keyed on
//! timestamp; cost is derived from a static per-model price table at
//! insert time.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};
use thiserror::Error;

use crate::model::{TokenRecord, unix_timestamp};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("lock poisoned")]
    Lock,
}

pub type Result<T> = std::result::Result<T, LedgerError>;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS token_costs (
    timestamp REAL PRIMARY KEY,
    model TEXT NOT NULL,
    n_input_tokens INTEGER NOT NULL,
    n_output_tokens INTEGER NOT NULL,
    cost_input_tokens REAL NOT NULL,
    cost_output_tokens REAL NOT NULL
);
";

/// Price per 1000 tokens, `(input, output)`. Models absent from this
/// table are still recorded, at zero cost.
const PRICE_PER_THOUSAND_TOKENS: &[(&str, f64, f64)] = &[
    ("gpt-3.5-turbo", 0.0015, 0.002),
    ("gpt-4", 0.03, 0.06),
    ("gpt-4-turbo", 0.01, 0.03),
    ("text-embedding-ada-002", 0.0001, 0.0),
];

fn price_for_model(model: &str) -> (f64, f64) {
    PRICE_PER_THOUSAND_TOKENS.iter().find(|(name, _, _)| *name == model).map(|(_, input, output)| (*input, *output)).unwrap_or((0.0, 0.0))
}

/// Per-model totals, as returned by [`TokenLedger::sums_by_model`].
#[derive(Debug, Clone, Default)]
pub struct ModelSummary {
    pub model: String,
    pub n_input_tokens: i64,
    pub n_output_tokens: i64,
    pub cost_input_tokens: f64,
    pub cost_output_tokens: f64,
    pub earliest_timestamp: f64,
}

/// Aggregate totals across all models.
#[derive(Debug, Clone, Default)]
pub struct TotalSummary {
    pub n_input_tokens: i64,
    pub n_output_tokens: i64,
    pub cost_input_tokens: f64,
    pub cost_output_tokens: f64,
}

pub struct TokenLedger {
    conn: Mutex<Connection>,
}

impl TokenLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::Lock)
    }

    /// Record one LLM call's usage, deriving cost from the static price
    /// table. Uses `INSERT OR REPLACE` on the timestamp primary key.
    pub fn insert(&self, model: &str, n_input_tokens: i64, n_output_tokens: i64) -> Result<TokenRecord> {
        let (price_input, price_output) = price_for_model(model);
        let record = TokenRecord {
            timestamp_utc: unix_timestamp(),
            model: model.to_string(),
            n_input_tokens,
            n_output_tokens,
            cost_input_tokens: n_input_tokens as f64 * price_input / 1000.0,
            cost_output_tokens: n_output_tokens as f64 * price_output / 1000.0,
        };
        self.insert_record(&record)?;
        Ok(record)
    }

    fn insert_record(&self, record: &TokenRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO token_costs
                (timestamp, model, n_input_tokens, n_output_tokens, cost_input_tokens, cost_output_tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.timestamp_utc,
                record.model,
                record.n_input_tokens,
                record.n_output_tokens,
                record.cost_input_tokens,
                record.cost_output_tokens,
            ],
        )?;
        Ok(())
    }

    /// Grouped totals by model, with the earliest timestamp recorded for each.
    pub fn sums_by_model(&self) -> Result<Vec<ModelSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT model, SUM(n_input_tokens), SUM(n_output_tokens),
                    SUM(cost_input_tokens), SUM(cost_output_tokens), MIN(timestamp)
             FROM token_costs GROUP BY model ORDER BY model",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ModelSummary {
                model: row.get(0)?,
                n_input_tokens: row.get(1)?,
                n_output_tokens: row.get(2)?,
                cost_input_tokens: row.get(3)?,
                cost_output_tokens: row.get(4)?,
                earliest_timestamp: row.get(5)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(LedgerError::from)
    }

    /// Overall totals across every model.
    pub fn sums(&self) -> Result<TotalSummary> {
        let models = self.sums_by_model()?;
        Ok(models.iter().fold(TotalSummary::default(), |mut acc, m| {
            acc.n_input_tokens += m.n_input_tokens;
            acc.n_output_tokens += m.n_output_tokens;
            acc.cost_input_tokens += m.cost_input_tokens;
            acc.cost_output_tokens += m.cost_output_tokens;
            acc
        }))
    }

    /// A tabular balance report: one row per model plus a totals row.
    pub fn balance_report(&self) -> Result<String> {
        let models = self.sums_by_model()?;
        let total = self.sums()?;
        Ok(render_report(&models, &total))
    }
}

fn render_report(models: &[ModelSummary], total: &TotalSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<24} {:>10} {:>10} {:>10} {:>10}\n", "Model", "Tokens In", "Tokens Out", "Cost In($)", "Cost Out($)"));
    for m in models {
        out.push_str(&format!(
            "{:<24} {:>10} {:>10} {:>10.4} {:>10.4}\n",
            m.model, m.n_input_tokens, m.n_output_tokens, m.cost_input_tokens, m.cost_output_tokens
        ));
    }
    out.push_str(&format!(
        "{:<24} {:>10} {:>10} {:>10.4} {:>10.4}\n",
        "TOTAL", total.n_input_tokens, total.n_output_tokens, total.cost_input_tokens, total.cost_output_tokens
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_sums_by_model_round_trips() {
        let ledger = TokenLedger::open_in_memory().unwrap();
        ledger.insert("gpt-4", 1000, 500).unwrap();
        let sums = ledger.sums_by_model().unwrap();
        assert_eq!(sums.len(), 1);
        assert_eq!(sums[0].n_input_tokens, 1000);
        assert_eq!(sums[0].n_output_tokens, 500);
        assert!((sums[0].cost_input_tokens - 0.03).abs() < 1e-9);
        assert!((sums[0].cost_output_tokens - 0.03).abs() < 1e-9);
    }

    #[test]
    fn sums_aggregates_across_inserts() {
        let ledger = TokenLedger::open_in_memory().unwrap();
        ledger.insert("gpt-4", 1000, 500).unwrap();
        ledger.insert("gpt-4", 1000, 500).unwrap();
        let total = ledger.sums().unwrap();
        assert_eq!(total.n_input_tokens, 2000);
        assert_eq!(total.n_output_tokens, 1000);
        assert!((total.cost_input_tokens - 0.06).abs() < 1e-9);
        assert!((total.cost_output_tokens - 0.06).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_is_recorded_at_zero_cost() {
        let ledger = TokenLedger::open_in_memory().unwrap();
        ledger.insert("some-local-model", 10, 10).unwrap();
        let sums = ledger.sums_by_model().unwrap();
        assert_eq!(sums[0].cost_input_tokens, 0.0);
        assert_eq!(sums[0].cost_output_tokens, 0.0);
    }

    #[test]
    fn persists_across_open_with_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.db");
        {
            let ledger = TokenLedger::open(&path).unwrap();
            ledger.insert("gpt-3.5-turbo", 100, 50).unwrap();
        }
        let ledger = TokenLedger::open(&path).unwrap();
        let total = ledger.sums().unwrap();
        assert_eq!(total.n_input_tokens, 100);
    }
}

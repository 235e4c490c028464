//! The relational key-value substrate (spec §6): transactions,
//! placeholder-bound parameters, cursored row iteration — over any engine
//! `sqlx`'s `Any` driver supports. The driver and query processor never see
//! a concrete Postgres or SQLite type; they bind [`Param`] values and read
//! columns back through [`AnyRow`].
//!
//! `each` synthesizes a streaming cursor with server-side `LIMIT`/`OFFSET`
//! paging, per the "Streaming cursor" design note (§9): some backends only
//! offer `fetchAll`, so the substrate never assumes a native cursor exists.

mod param;

use std::ops::ControlFlow;

use graphkeep_core::error::CoreError;
use sqlx::any::{Any, AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::{Executor, Pool, Row, Transaction};

pub use param::{placeholders, row_placeholders, Param};
pub use sqlx::any::AnyRow as Row_;

type Result<T> = std::result::Result<T, CoreError>;

/// Default page size for `each`'s synthesized cursor.
const DEFAULT_PAGE_SIZE: i64 = 500;

fn substrate_err(e: sqlx::Error) -> CoreError {
    if is_lock_contention(&e) {
        CoreError::StoreFailed
    } else {
        CoreError::Other(e.into())
    }
}

/// Best-effort classification of a lock/serialization-conflict error as
/// retryable substrate contention (spec §5, §7). sqlx's `Any` driver
/// reports backend errors generically; a deployment wiring a specific
/// driver may refine this via the error's database code.
fn is_lock_contention(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_ascii_lowercase();
            msg.contains("lock") || msg.contains("busy") || msg.contains("conflict")
        }
        _ => false,
    }
}

fn bind_one<'q>(
    query: sqlx::query::Query<'q, Any, AnyArguments<'q>>,
    param: Param,
) -> sqlx::query::Query<'q, Any, AnyArguments<'q>> {
    match param {
        Param::Bytes(b) => query.bind(b),
        Param::I64(i) => query.bind(i),
        Param::Str(s) => query.bind(s),
        Param::Bool(b) => query.bind(b),
        Param::Null => query.bind(Option::<i64>::None),
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Any, AnyArguments<'q>>,
    params: &[Param],
) -> sqlx::query::Query<'q, Any, AnyArguments<'q>> {
    for p in params {
        query = bind_one(query, p.clone());
    }
    query
}

/// The substrate connection pool. One per deployment; `NodeDriver` and
/// `QueryProcessor` each open their own transaction from it.
pub struct Substrate {
    pool: Pool<Any>,
}

impl Substrate {
    /// Connects to the given URL (`postgres://...` or `sqlite::memory:`).
    ///
    /// Installs the default `sqlx::Any` drivers on first call — safe to
    /// call from multiple tests in the same process.
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(substrate_err)?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: Pool<Any>) -> Self {
        Self { pool }
    }

    /// Opens a new transaction. Expects no transaction is already open on
    /// the returned connection (sub-methods never issue a nested `BEGIN`).
    pub async fn begin(&self) -> Result<Tx<'_>> {
        let inner = self.pool.begin().await.map_err(substrate_err)?;
        Ok(Tx { inner })
    }

    /// Lists the tables visible to this connection. Used only by tests to
    /// assert the fixture schema landed; not a bootstrap/migration API.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type='table' \
             UNION SELECT tablename FROM pg_tables WHERE schemaname='public'",
        )
        .fetch_all(&self.pool)
        .await;
        // The union trick only works against sqlite; fall back gracefully
        // for engines that don't recognize one half of the UNION.
        match rows {
            Ok(rows) => Ok(rows.iter().filter_map(|r| r.try_get::<String, _>(0).ok()).collect()),
            Err(e) => Err(substrate_err(e)),
        }
    }
}

/// A transaction over the substrate. Expects a surrounding `BEGIN`; never
/// commits or rolls back implicitly except via explicit [`Tx::commit`] /
/// [`Tx::rollback`].
pub struct Tx<'c> {
    inner: Transaction<'c, Any>,
}

impl<'c> Tx<'c> {
    /// Executes a statement with no parameters and no result (DDL, or a
    /// fixed DML statement).
    pub async fn exec(&mut self, sql: &str) -> Result<()> {
        self.inner.execute(sql).await.map_err(substrate_err)?;
        Ok(())
    }

    /// Executes a parameterized statement, returning rows affected.
    pub async fn run(&mut self, sql: &str, params: &[Param]) -> Result<u64> {
        let query = bind_all(sqlx::query(sql), params);
        let result = query.execute(&mut *self.inner).await.map_err(substrate_err)?;
        Ok(result.rows_affected())
    }

    /// Fetches at most one row.
    pub async fn get(&mut self, sql: &str, params: &[Param]) -> Result<Option<AnyRow>> {
        let query = bind_all(sqlx::query(sql), params);
        query.fetch_optional(&mut *self.inner).await.map_err(substrate_err)
    }

    /// Fetches all matching rows in one round trip.
    pub async fn all(&mut self, sql: &str, params: &[Param]) -> Result<Vec<AnyRow>> {
        let query = bind_all(sqlx::query(sql), params);
        query.fetch_all(&mut *self.inner).await.map_err(substrate_err)
    }

    /// Streams rows one at a time via synthesized `LIMIT`/`OFFSET` paging.
    /// `sql` must not itself contain `LIMIT`/`OFFSET` and must have a
    /// stable `ORDER BY` (paging over an unordered result is undefined).
    ///
    /// `f` returns `ControlFlow::Break(())` to cancel early; `each` then
    /// stops issuing further pages, matching the reply-callback
    /// cancellation contract in spec §5.
    pub async fn each<F>(
        &mut self,
        sql: &str,
        params: &[Param],
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(&AnyRow) -> ControlFlow<()>,
    {
        self.each_paged(sql, params, DEFAULT_PAGE_SIZE, &mut f).await
    }

    /// Like [`Tx::each`] with an explicit page size (exposed for tests that
    /// need to exercise multi-page behavior deterministically).
    pub async fn each_paged<F>(
        &mut self,
        sql: &str,
        params: &[Param],
        page_size: i64,
        f: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&AnyRow) -> ControlFlow<()>,
    {
        let mut offset: i64 = 0;
        loop {
            let paged_sql = format!("{sql} LIMIT {page_size} OFFSET {offset}");
            let rows = self.all(&paged_sql, params).await?;
            let n = rows.len();
            for row in &rows {
                if f(row).is_break() {
                    return Ok(());
                }
            }
            if n < page_size as usize {
                return Ok(());
            }
            offset += page_size;
        }
    }

    pub async fn commit(self) -> Result<()> {
        self.inner.commit().await.map_err(substrate_err)
    }

    pub async fn rollback(self) -> Result<()> {
        self.inner.rollback().await.map_err(substrate_err)
    }
}

//! Live PostgreSQL sessions: tokio-postgres clients pooled by deadpool-postgres.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};
use deadpool_postgres::{ClientWrapper, ManagerConfig, RecyclingMethod};
use postgres_native_tls::MakeTlsConnector;
use std::fmt::Write as _;
use std::time::Duration;
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{CancelToken, NoTls, Row};
use tracing::debug;

use super::connection::{ConnectionConfig, SslMode};
use super::error::{Error, Result};
use super::query::{CellValue, ColumnInfo, RawResult};
use super::session::{Interrupt, Session};
use crate::sql::Engine;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Statement run on every session before it goes back into the pool, so a
/// transaction abandoned mid-way never leaks into the next borrower.
const RECYCLE_SQL: &str = "ROLLBACK";

#[derive(Clone)]
enum PgTls {
    Plain,
    Native(MakeTlsConnector),
}

/// Builds sessions for one connection configuration.
pub struct PgManager {
    inner: deadpool_postgres::Manager,
    tls: PgTls,
}

impl PgManager {
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        if config.engine != Engine::Postgres {
            return Err(Error::not_implemented(config.engine.name(), "live connection"));
        }

        let pg = pg_config(config)?;
        let mut manager_config = ManagerConfig::default();
        manager_config.recycling_method = RecyclingMethod::Custom(RECYCLE_SQL.to_string());

        let (inner, tls) = match tls_connector(config)? {
            None => (
                deadpool_postgres::Manager::from_config(pg, NoTls, manager_config),
                PgTls::Plain,
            ),
            Some(connector) => (
                deadpool_postgres::Manager::from_config(pg, connector.clone(), manager_config),
                PgTls::Native(connector),
            ),
        };
        Ok(Self { inner, tls })
    }
}

impl Manager for PgManager {
    type Type = PgSession;
    type Error = Error;

    async fn create(&self) -> Result<PgSession> {
        let client = self.inner.create().await.map_err(connect_error)?;
        debug!("postgres session opened");
        Ok(PgSession {
            client,
            tls: self.tls.clone(),
        })
    }

    async fn recycle(&self, session: &mut PgSession, metrics: &Metrics) -> RecycleResult<Error> {
        self.inner
            .recycle(&mut session.client, metrics)
            .await
            .map_err(|e| match e {
                RecycleError::Backend(e) => RecycleError::Backend(Error::from(e)),
                RecycleError::Message(msg) => RecycleError::Message(msg),
                #[allow(unreachable_patterns)]
                other => RecycleError::Message(other.to_string().into()),
            })
    }
}

/// Failures while opening a session are connection errors whatever the
/// server reported (bad password, unknown database, refused TLS).
fn connect_error(err: tokio_postgres::Error) -> Error {
    match err.as_db_error() {
        Some(db) => Error::Connection(format!("{}: {}", db.code().code(), db.message())),
        None => Error::Connection(err.to_string()),
    }
}

pub fn pg_config(config: &ConnectionConfig) -> Result<tokio_postgres::Config> {
    let mut pg = match &config.connection_string {
        Some(conn) => conn
            .parse::<tokio_postgres::Config>()
            .map_err(|e| Error::Config(format!("invalid connection string: {}", e)))?,
        None => {
            let mut pg = tokio_postgres::Config::new();
            pg.host(&config.host)
                .port(config.port)
                .dbname(&config.database)
                .user(&config.username);
            pg
        }
    };
    if !config.password.is_empty() {
        pg.password(&config.password);
    }
    pg.application_name("sqlbridge")
        .connect_timeout(CONNECT_TIMEOUT)
        .ssl_mode(match config.ssl_mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => PgSslMode::Require,
        });
    Ok(pg)
}

/// TLS connector for the configured mode; `None` when TLS is disabled.
///
/// `accept_invalid_certs` only relaxes `Prefer`/`Require`. The verifying
/// modes always check the chain, and `VerifyFull` also checks the hostname.
fn tls_connector(config: &ConnectionConfig) -> Result<Option<MakeTlsConnector>> {
    if config.ssl_mode == SslMode::Disable {
        return Ok(None);
    }
    let strict = config.ssl_mode.verifies_certificate();
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(path) = &config.ca_cert_path {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read CA certificate {}: {}", path, e)))?;
        let blocks = pem_certificates(&pem);
        if blocks.is_empty() {
            return Err(Error::Config(format!("no certificate found in {}", path)));
        }
        for block in blocks {
            let cert = native_tls::Certificate::from_pem(block.as_bytes())
                .map_err(|e| Error::Config(format!("invalid CA certificate in {}: {}", path, e)))?;
            builder.add_root_certificate(cert);
        }
    }
    if config.ssl_mode == SslMode::VerifyCa {
        builder.danger_accept_invalid_hostnames(true);
    }

    let connector = builder
        .build()
        .map_err(|e| Error::Config(format!("failed to build TLS connector: {}", e)))?;
    Ok(Some(MakeTlsConnector::new(connector)))
}

/// Split a PEM bundle into its individual certificate blocks.
fn pem_certificates(pem: &str) -> Vec<String> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let mut blocks = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(BEGIN) {
        let Some(len) = rest[start..].find(END) else {
            break;
        };
        let end = start + len + END.len();
        blocks.push(format!("{}\n", &rest[start..end]));
        rest = &rest[end..];
    }
    blocks
}

pub struct PgSession {
    client: ClientWrapper,
    tls: PgTls,
}

#[async_trait]
impl Session for PgSession {
    async fn fetch(&self, sql: &str) -> Result<RawResult> {
        let statement = self.client.prepare(sql).await?;
        let columns: Vec<ColumnInfo> = statement
            .columns()
            .iter()
            .map(|c| ColumnInfo::new(c.name(), c.type_().name()))
            .collect();
        let rows = self.client.query(&statement, &[]).await?;
        Ok(RawResult {
            columns,
            rows: rows.iter().map(row_values).collect(),
        })
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        Ok(self.client.execute(sql, &[]).await?)
    }

    fn interrupt_handle(&self) -> Option<Box<dyn Interrupt>> {
        Some(Box::new(PgInterrupt {
            token: self.client.cancel_token(),
            tls: self.tls.clone(),
        }))
    }
}

/// Asks the server, over a separate connection, to cancel whatever the
/// session is running.
struct PgInterrupt {
    token: CancelToken,
    tls: PgTls,
}

#[async_trait]
impl Interrupt for PgInterrupt {
    async fn interrupt(&self) -> Result<()> {
        match &self.tls {
            PgTls::Plain => self.token.cancel_query(NoTls).await?,
            PgTls::Native(connector) => self.token.cancel_query(connector.clone()).await?,
        }
        debug!("cancel request sent");
        Ok(())
    }
}

fn row_values(row: &Row) -> Vec<CellValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| extract_value(row, idx, col.type_()))
        .collect()
}

fn get<'a, T: FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    wrap: impl FnOnce(T) -> CellValue,
) -> CellValue {
    row.try_get::<_, Option<T>>(idx)
        .ok()
        .flatten()
        .map(wrap)
        .unwrap_or(CellValue::Null)
}

fn array<T>(items: Vec<Option<T>>, wrap: impl Fn(T) -> CellValue) -> CellValue {
    CellValue::Array(
        items
            .into_iter()
            .map(|item| item.map_or(CellValue::Null, &wrap))
            .collect(),
    )
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> CellValue {
    match *pg_type {
        Type::BOOL => get(row, idx, CellValue::Bool),
        Type::INT2 => get(row, idx, CellValue::Int16),
        Type::INT4 => get(row, idx, CellValue::Int32),
        Type::INT8 => get(row, idx, CellValue::Int64),
        Type::OID => get(row, idx, |oid: u32| CellValue::Int64(oid as i64)),
        Type::FLOAT4 => get(row, idx, CellValue::Float32),
        Type::FLOAT8 => get(row, idx, CellValue::Float64),
        Type::NUMERIC => get(row, idx, |n: PgNumeric| CellValue::Numeric(n.0)),
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::BPCHAR => get(row, idx, CellValue::Text),
        Type::BYTEA => get(row, idx, CellValue::Bytes),
        Type::DATE => get::<NaiveDate>(row, idx, CellValue::Date),
        Type::TIME => get::<NaiveTime>(row, idx, CellValue::Time),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx, CellValue::DateTime),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx, CellValue::TimestampTz),
        Type::JSON | Type::JSONB => get(row, idx, CellValue::Json),
        Type::INT4_ARRAY => get(row, idx, |v: Vec<Option<i32>>| array(v, CellValue::Int32)),
        Type::INT8_ARRAY => get(row, idx, |v: Vec<Option<i64>>| array(v, CellValue::Int64)),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            get(row, idx, |v: Vec<Option<String>>| array(v, CellValue::Text))
        }
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(Some(text)) => CellValue::Text(text),
            Ok(None) => CellValue::Null,
            Err(_) => CellValue::Unknown(format!("<{}>", pg_type.name())),
        },
    }
}

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// NUMERIC decoded from the binary wire format into its exact decimal text.
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, BoxError> {
        decode_numeric(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Layout: ndigits, weight, sign, dscale (all 16-bit), then `ndigits`
/// base-10000 digits. `weight` is the power of 10000 of the first digit.
fn decode_numeric(raw: &[u8]) -> std::result::Result<String, BoxError> {
    let word = |i: usize| -> std::result::Result<u16, BoxError> {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };

    let ndigits = word(0)? as usize;
    let weight = word(1)? as i16 as i32;
    let sign = word(2)?;
    let dscale = word(3)? as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<std::result::Result<Vec<u16>, _>>()?;
    let digit = |i: i32| -> u16 {
        if i < 0 {
            0
        } else {
            digits.get(i as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                let _ = write!(out, "{}", digit(i));
            } else {
                let _ = write!(out, "{:04}", digit(i));
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit(i));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_postgres::config::Host;

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        for word in [digits.len() as u16, weight as u16, sign, dscale] {
            raw.extend_from_slice(&word.to_be_bytes());
        }
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_decode_numeric() {
        assert_eq!(decode_numeric(&numeric(0, 0, 2, &[12, 5000])).unwrap(), "12.50");
        assert_eq!(decode_numeric(&numeric(-1, 0, 3, &[10])).unwrap(), "0.001");
        assert_eq!(decode_numeric(&numeric(1, 0, 0, &[10])).unwrap(), "100000");
        let raw = numeric(1, NUMERIC_NEG, 1, &[1, 2345, 6000]);
        assert_eq!(decode_numeric(&raw).unwrap(), "-12345.6");
        assert_eq!(decode_numeric(&numeric(0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
    }

    #[test]
    fn test_decode_numeric_rejects_truncated_input() {
        let mut raw = numeric(0, 0, 0, &[7, 8]);
        raw.truncate(raw.len() - 1);
        assert!(decode_numeric(&raw).is_err());
    }

    #[test]
    fn test_pg_config_from_fields() {
        let config = ConnectionConfig {
            host: "db.example.com".to_string(),
            port: 6543,
            database: "app".to_string(),
            username: "reader".to_string(),
            password: "secret".to_string(),
            ssl_mode: SslMode::VerifyFull,
            ..ConnectionConfig::default()
        };
        let pg = pg_config(&config).unwrap();
        assert!(matches!(&pg.get_hosts()[0], Host::Tcp(h) if h == "db.example.com"));
        assert_eq!(pg.get_ports(), &[6543]);
        assert_eq!(pg.get_dbname(), Some("app"));
        assert_eq!(pg.get_user(), Some("reader"));
        assert_eq!(pg.get_password(), Some(&b"secret"[..]));
        assert!(matches!(pg.get_ssl_mode(), PgSslMode::Require));
    }

    #[test]
    fn test_connection_string_overrides_fields() {
        let config = ConnectionConfig {
            connection_string: Some("host=other dbname=warehouse user=etl".to_string()),
            password: "pw".to_string(),
            ssl_mode: SslMode::Disable,
            ..ConnectionConfig::default()
        };
        let pg = pg_config(&config).unwrap();
        assert_eq!(pg.get_dbname(), Some("warehouse"));
        assert_eq!(pg.get_user(), Some("etl"));
        assert_eq!(pg.get_password(), Some(&b"pw"[..]));
        assert!(matches!(pg.get_ssl_mode(), PgSslMode::Disable));
    }

    #[test]
    fn test_bad_connection_string_is_config_error() {
        let config = ConnectionConfig {
            connection_string: Some("port=notanumber".to_string()),
            ..ConnectionConfig::default()
        };
        assert!(matches!(pg_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_oracle_has_no_live_driver() {
        let config = ConnectionConfig {
            engine: Engine::Oracle,
            ..ConnectionConfig::default()
        };
        let err = PgManager::from_config(&config).err().unwrap();
        assert!(err.is_not_implemented());
    }

    #[test]
    fn test_pem_bundle_split() {
        let bundle = "junk\n-----BEGIN CERTIFICATE-----\nAAA\n-----END CERTIFICATE-----\n\
                      -----BEGIN CERTIFICATE-----\nBBB\n-----END CERTIFICATE-----\n";
        let blocks = pem_certificates(bundle);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains("AAA"));
        assert!(blocks[1].starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(pem_certificates("no certs here").is_empty());
    }

    #[test]
    fn test_missing_ca_file_is_config_error() {
        let config = ConnectionConfig {
            ssl_mode: SslMode::VerifyCa,
            ca_cert_path: Some("/nonexistent/ca.pem".to_string()),
            ..ConnectionConfig::default()
        };
        assert!(matches!(tls_connector(&config), Err(Error::Config(_))));
    }
}

//! SQL Server session over TDS using tiberius.
//!
//! - One TCP connection per session, opened by [`MssqlSource::connect`]
//! - Named instances without an explicit port are located through the SQL
//!   Browser service
//! - Gateway redirects (Azure SQL) are followed once
//! - Optional connect and per-query timeouts
//! - Errors never carry credential material

use super::{DataSource, ResultColumn, ResultSet, SourceError};
use crate::error::{ExportError, Result};
use crate::models::CellValue;
use crate::security::{Authentication, ConnectionDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::fmt::Write as _;
use std::time::Duration;
use tiberius::numeric::Numeric;
use tiberius::{
    AuthMethod, Client, ColumnData, ColumnType, Config, EncryptionLevel, FromSql, SqlBrowser,
    ToSql,
};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

type TdsClient = Client<Compat<TcpStream>>;

/// Transport options for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Require TLS for the whole session
    pub encrypt: bool,
    /// Accept the server certificate without validation
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
    /// `None` lets a long query block until the server answers
    pub query_timeout: Option<Duration>,
    pub application_name: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            encrypt: true,
            trust_server_certificate: true,
            connect_timeout: Duration::from_secs(30),
            query_timeout: None,
            application_name: "tdsexport".to_string(),
        }
    }
}

/// Live SQL Server session.
pub struct MssqlSource {
    client: Option<TdsClient>,
    query_timeout: Option<Duration>,
    target: String,
}

impl MssqlSource {
    /// Opens a session to the descriptor's server and database.
    ///
    /// # Errors
    /// Returns [`ExportError::Auth`] when the authentication mode is not
    /// available on this platform, and [`ExportError::Connection`] for
    /// network, TLS, timeout or login failures.
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        options: &SessionOptions,
    ) -> Result<Self> {
        let config = build_config(descriptor, options)?;
        let named = uses_browser(descriptor);
        let target = descriptor.to_safe_string();

        info!("Connecting to {}", target);
        let client = match tokio::time::timeout(options.connect_timeout, open_client(config, named))
            .await
        {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                return Err(ExportError::connection_failed(
                    format!("could not open session to {}", target),
                    e,
                ));
            }
            Err(_) => {
                return Err(ExportError::connection_failed(
                    format!("could not open session to {}", target),
                    SourceError::Timeout(options.connect_timeout),
                ));
            }
        };
        debug!("Session established with {}", target);

        Ok(Self {
            client: Some(client),
            query_timeout: options.query_timeout,
            target,
        })
    }
}

#[async_trait]
impl DataSource for MssqlSource {
    async fn query(
        &mut self,
        sql: &str,
        params: &[&str],
    ) -> std::result::Result<ResultSet, SourceError> {
        let limit = self.query_timeout;
        let client = self.client.as_mut().ok_or(SourceError::Closed)?;

        match limit {
            Some(limit) => tokio::time::timeout(limit, run_query(client, sql, params))
                .await
                .map_err(|_| SourceError::Timeout(limit))?,
            None => run_query(client, sql, params).await,
        }
    }

    async fn close(&mut self) -> std::result::Result<(), SourceError> {
        if let Some(client) = self.client.take() {
            debug!("Closing session with {}", self.target);
            client.close().await?;
        }
        Ok(())
    }
}

impl Drop for MssqlSource {
    fn drop(&mut self) {
        if self.client.is_some() {
            warn!("Session with {} dropped without close", self.target);
        }
    }
}

fn build_config(descriptor: &ConnectionDescriptor, options: &SessionOptions) -> Result<Config> {
    let server = descriptor.server();
    let mut config = Config::new();
    config.host(server.dial_host());
    config.port(server.effective_port());
    if let Some(instance) = server.instance.as_ref().filter(|_| uses_browser(descriptor)) {
        config.instance_name(instance);
    }
    config.database(descriptor.database());
    config.application_name(&options.application_name);

    config.encryption(if options.encrypt {
        EncryptionLevel::Required
    } else {
        EncryptionLevel::Off
    });
    if options.trust_server_certificate {
        config.trust_cert();
    }

    config.authentication(auth_method(descriptor.authentication())?);
    Ok(config)
}

/// An explicit port wins over the browser lookup.
fn uses_browser(descriptor: &ConnectionDescriptor) -> bool {
    let server = descriptor.server();
    server.instance.is_some() && server.port.is_none()
}

fn auth_method(authentication: &Authentication) -> Result<AuthMethod> {
    match authentication {
        Authentication::SqlLogin(credentials) => Ok(AuthMethod::sql_server(
            credentials.username(),
            credentials.password().unwrap_or_default(),
        )),
        Authentication::AccessToken(token) => Ok(AuthMethod::aad_token(token.as_str())),
        Authentication::Integrated => integrated_auth(),
    }
}

#[cfg(windows)]
fn integrated_auth() -> Result<AuthMethod> {
    Ok(AuthMethod::Integrated)
}

#[cfg(not(windows))]
fn integrated_auth() -> Result<AuthMethod> {
    Err(ExportError::auth(
        "integrated authentication is only available on Windows",
    ))
}

async fn open_client(config: Config, named: bool) -> tiberius::Result<TdsClient> {
    let tcp = if named {
        TcpStream::connect_named(&config).await?
    } else {
        TcpStream::connect(config.get_addr()).await?
    };
    tcp.set_nodelay(true)?;

    match Client::connect(config.clone(), tcp.compat_write()).await {
        Err(tiberius::error::Error::Routing { host, port }) => {
            debug!("Server redirected session to {}:{}", host, port);
            let mut config = config;
            config.host(&host);
            config.port(port);

            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write()).await
        }
        other => other,
    }
}

async fn run_query(
    client: &mut TdsClient,
    sql: &str,
    params: &[&str],
) -> std::result::Result<ResultSet, SourceError> {
    let params: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
    let mut stream = client.query(sql, &params).await?;

    let columns = stream
        .columns()
        .await?
        .map(|columns| {
            columns
                .iter()
                .map(|c| ResultColumn::new(c.name(), type_name(&c.column_type())))
                .collect()
        })
        .unwrap_or_default();

    let rows = stream
        .into_first_result()
        .await?
        .into_iter()
        .map(|row| row.into_iter().map(convert_cell).collect())
        .collect::<std::result::Result<Vec<Vec<CellValue>>, SourceError>>()?;

    Ok(ResultSet { columns, rows })
}

/// Converts one wire value into a cell.
fn convert_cell(data: ColumnData<'static>) -> std::result::Result<CellValue, SourceError> {
    let value = match &data {
        ColumnData::U8(v) => v.map(|v| CellValue::Integer(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| CellValue::Integer(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| CellValue::Integer(i64::from(v))),
        ColumnData::I64(v) => v.map(CellValue::Integer),
        ColumnData::F32(v) => v.map(|v| CellValue::Float(f64::from(v))),
        ColumnData::F64(v) => v.map(CellValue::Float),
        ColumnData::Bit(v) => v.map(CellValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| CellValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(|g| CellValue::Text(g.to_string().to_uppercase())),
        ColumnData::Binary(v) => v.as_ref().map(|b| CellValue::Text(hex(b))),
        ColumnData::Numeric(v) => v.as_ref().map(numeric_cell),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|xml| CellValue::Text(xml.clone().into_owned().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)?.map(CellValue::DateTime)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(&data)?.map(CellValue::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)?.map(CellValue::Time),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<Utc>::from_sql(&data)?.map(|dt| CellValue::DateTime(dt.naive_utc()))
        }
    };
    Ok(value.unwrap_or(CellValue::Null))
}

fn numeric_cell(n: &Numeric) -> CellValue {
    if n.scale() == 0 {
        if let Ok(v) = i64::try_from(n.value()) {
            return CellValue::Integer(v);
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let unscaled = n.value() as f64;
    CellValue::Float(unscaled / 10f64.powi(i32::from(n.scale())))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// SQL Server type name for a wire column type.
fn type_name(ty: &ColumnType) -> String {
    let name = match ty {
        ColumnType::Bit | ColumnType::Bitn => "bit",
        ColumnType::Int1 => "tinyint",
        ColumnType::Int2 => "smallint",
        ColumnType::Int4 | ColumnType::Intn => "int",
        ColumnType::Int8 => "bigint",
        ColumnType::Float4 => "real",
        ColumnType::Float8 | ColumnType::Floatn => "float",
        ColumnType::Money => "money",
        ColumnType::Money4 => "smallmoney",
        ColumnType::Decimaln => "decimal",
        ColumnType::Numericn => "numeric",
        ColumnType::Datetime | ColumnType::Datetimen => "datetime",
        ColumnType::Datetime4 => "smalldatetime",
        ColumnType::Daten => "date",
        ColumnType::Timen => "time",
        ColumnType::Datetime2 => "datetime2",
        ColumnType::DatetimeOffsetn => "datetimeoffset",
        ColumnType::Guid => "uniqueidentifier",
        ColumnType::BigVarChar => "varchar",
        ColumnType::BigChar => "char",
        ColumnType::NVarchar => "nvarchar",
        ColumnType::NChar => "nchar",
        ColumnType::Text => "text",
        ColumnType::NText => "ntext",
        ColumnType::BigVarBin => "varbinary",
        ColumnType::BigBinary => "binary",
        ColumnType::Image => "image",
        ColumnType::Xml => "xml",
        other => return format!("{other:?}").to_lowercase(),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{Credentials, ServerAddress};
    use std::borrow::Cow;
    use zeroize::Zeroizing;

    #[test]
    fn test_convert_scalar_cells() {
        assert_eq!(
            convert_cell(ColumnData::I32(Some(42))).unwrap(),
            CellValue::Integer(42)
        );
        assert_eq!(convert_cell(ColumnData::I32(None)).unwrap(), CellValue::Null);
        assert_eq!(
            convert_cell(ColumnData::Bit(Some(true))).unwrap(),
            CellValue::Bool(true)
        );
        assert_eq!(
            convert_cell(ColumnData::String(Some(Cow::Borrowed("Ada")))).unwrap(),
            CellValue::Text("Ada".to_string())
        );
        assert_eq!(
            convert_cell(ColumnData::Binary(Some(Cow::Owned(vec![0x0a, 0xff])))).unwrap(),
            CellValue::Text("0x0AFF".to_string())
        );
    }

    #[test]
    fn test_numeric_cells() {
        assert_eq!(
            numeric_cell(&Numeric::new_with_scale(1234, 0)),
            CellValue::Integer(1234)
        );
        match numeric_cell(&Numeric::new_with_scale(12345, 2)) {
            CellValue::Float(v) => assert!((v - 123.45).abs() < 1e-9),
            other => panic!("unexpected cell {:?}", other),
        }
    }

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(&ColumnType::NVarchar), "nvarchar");
        assert_eq!(type_name(&ColumnType::Int4), "int");
        assert_eq!(type_name(&ColumnType::Datetime2), "datetime2");
        assert_eq!(type_name(&ColumnType::Guid), "uniqueidentifier");
    }

    #[test]
    fn test_build_config_for_sql_login() {
        let descriptor = ConnectionDescriptor::new(
            ServerAddress::parse("db01,14330").unwrap(),
            "Loans",
            Authentication::SqlLogin(Credentials::new(
                "jdoe".to_string(),
                Some("pw".to_string()),
            )),
        )
        .unwrap();

        let config = build_config(&descriptor, &SessionOptions::default()).unwrap();
        assert_eq!(config.get_addr(), "db01:14330");
    }

    #[test]
    fn test_explicit_port_skips_browser() {
        let descriptor = |server: &str| {
            ConnectionDescriptor::new(
                ServerAddress::parse(server).unwrap(),
                "Loans",
                Authentication::AccessToken(Zeroizing::new("token".to_string())),
            )
            .unwrap()
        };

        assert!(uses_browser(&descriptor(r"db01\PROD")));

        let pinned = descriptor(r"db01\PROD,1433");
        assert!(!uses_browser(&pinned));
        let config = build_config(&pinned, &SessionOptions::default()).unwrap();
        assert_eq!(config.get_addr(), "db01:1433");

        let config = build_config(&descriptor("[::1]:14330"), &SessionOptions::default()).unwrap();
        assert_eq!(config.get_addr(), "[::1]:14330");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_integrated_auth_unavailable_off_windows() {
        let err = auth_method(&Authentication::Integrated).unwrap_err();
        assert_eq!(err.stage(), crate::error::Stage::Auth);
    }
}

use std::collections::{BTreeMap, HashMap};

use rsmgclient::{ConnectParams, Connection, ConnectionStatus, QueryParam, Record, SSLMode};
use serde_json::{Map, Number, Value};
use theseus_cypher::CypherStatement;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::actor::GraphConnection;
use super::AccessMode;
use crate::prelude::*;

#[derive(Error, Debug)]
pub enum MemgraphError {
    #[error("ConnectionError: {0}")]
    ConnectionError(String),
    #[error("QueryError: {0}")]
    QueryError(String),
    #[error("CommitError: {0}")]
    CommitError(String),
}

pub struct Memgraph {
    connection: Connection,
    connect_params: ConnectParamsSnapshot,
}

/// Connection settings kept to reconnect after the session goes bad.
struct ConnectParamsSnapshot {
    port: u16,
    host: Option<String>,
    username: Option<String>,
    password: Option<String>,
    client_name: String,
    sslmode: SSLMode,
}

impl ConnectParamsSnapshot {
    fn from_params(params: &ConnectParams) -> Self {
        Self {
            port: params.port,
            host: params.host.clone(),
            username: params.username.clone(),
            password: params.password.clone(),
            client_name: params.client_name.clone(),
            sslmode: match params.sslmode {
                SSLMode::Disable => SSLMode::Disable,
                SSLMode::Require => SSLMode::Require,
            },
        }
    }

    fn to_params(&self) -> ConnectParams {
        ConnectParams {
            port: self.port,
            host: self.host.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            client_name: self.client_name.clone(),
            sslmode: match self.sslmode {
                SSLMode::Disable => SSLMode::Disable,
                SSLMode::Require => SSLMode::Require,
            },
            ..Default::default()
        }
    }
}

/// Splits `bolt://host:port` into its parts.
pub fn parse_url(url: &str) -> Result<(String, u16)> {
    let address = url.strip_prefix("bolt://").unwrap_or(url);
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        MemgraphError::ConnectionError(format!("Expected host:port in url {url}"))
    })?;
    let port = port.parse().map_err(|err| {
        MemgraphError::ConnectionError(format!("Failed to parse port from url: {err:?}"))
    })?;
    Ok((host.to_string(), port))
}

impl Memgraph {
    pub fn try_new_from_url(url: &str) -> Result<Self> {
        let (host, port) = parse_url(url)?;
        info!("Connecting to memgraph at {host}:{port}");
        let params = ConnectParams {
            port,
            host: Some(host),
            ..Default::default()
        };
        Self::try_new(params)
    }

    pub fn try_new(params: ConnectParams) -> Result<Self> {
        let connect_params = ConnectParamsSnapshot::from_params(&params);
        let connection = Self::connect(&params)?;
        Ok(Self {
            connection,
            connect_params,
        })
    }

    fn connect(params: &ConnectParams) -> Result<Connection> {
        let connection = Connection::connect(params)
            .map_err(|e| MemgraphError::ConnectionError(e.to_string()))?;
        let status = connection.status();
        if status != ConnectionStatus::Ready {
            return Err(
                MemgraphError::ConnectionError(format!("Connection status {status:?}")).into(),
            );
        }
        Ok(connection)
    }

    fn ensure_connected(&mut self) -> Result<()> {
        let status = self.connection.status();
        if status == ConnectionStatus::Bad || status == ConnectionStatus::Closed {
            info!("Reconnecting to memgraph");
            self.connection = Self::connect(&self.connect_params.to_params())?;
        }
        Ok(())
    }

    /// Rolls back the open transaction after a failed statement so the next
    /// one starts clean.
    fn abort(&mut self) {
        if let Err(err) = self.connection.rollback() {
            warn!("Failed to roll back memgraph transaction: {err}");
        }
        if let Err(err) = self.ensure_connected() {
            warn!("Failed to reconnect memgraph after failed statement: {err}");
        }
    }

    /// Executes a statement with its parameters in one transaction.
    pub fn execute(&mut self, statement: &CypherStatement) -> Result<Vec<Value>> {
        self.ensure_connected()?;
        let params = query_params(&statement.params);
        let columns = match self.connection.execute(&statement.text, Some(&params)) {
            Ok(columns) => columns,
            Err(err) => {
                self.abort();
                return Err(TheseusError::from_database_message(err.to_string()));
            }
        };
        let records = match self.connection.fetchall() {
            Ok(records) => records,
            Err(err) => {
                self.abort();
                return Err(TheseusError::from_database_message(err.to_string()));
            }
        };
        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            rows.push(record_to_json(&columns, record)?);
        }
        self.connection.commit().map_err(|e| {
            let msg = e.to_string();
            self.abort();
            MemgraphError::CommitError(msg)
        })?;
        Ok(rows)
    }
}

impl GraphConnection for Memgraph {
    fn run(&mut self, statement: &CypherStatement, mode: AccessMode) -> Result<Vec<Value>> {
        debug!(%mode, "memgraph statement:\n{}", statement.text);
        self.execute(statement)
    }
}

fn query_params(params: &BTreeMap<String, Value>) -> HashMap<String, QueryParam> {
    params
        .iter()
        .map(|(name, value)| (name.clone(), json_to_query_param(value)))
        .collect()
}

fn json_to_query_param(value: &Value) -> QueryParam {
    match value {
        Value::Null => QueryParam::Null,
        Value::Bool(v) => QueryParam::Bool(*v),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                QueryParam::Int(i)
            } else if let Some(f) = n.as_f64() {
                QueryParam::Float(f)
            } else {
                QueryParam::Null
            }
        }
        Value::String(s) => QueryParam::String(s.clone()),
        Value::Array(xs) => QueryParam::List(xs.iter().map(json_to_query_param).collect()),
        Value::Object(map) => QueryParam::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_query_param(v)))
                .collect(),
        ),
    }
}

fn record_to_json(columns: &[String], record: &Record) -> Result<Value> {
    let mut map = Map::new();
    for (column, value) in columns.iter().zip(record.values.as_slice()) {
        map.insert(column.clone(), value_to_json(value)?);
    }
    Ok(Value::Object(map))
}

fn properties_to_json(properties: &HashMap<String, rsmgclient::Value>) -> Result<Value> {
    let mut map = Map::new();
    for (key, value) in properties {
        map.insert(key.clone(), value_to_json(value)?);
    }
    Ok(Value::Object(map))
}

/// Generated statements project maps and scalars; whole graph elements only
/// appear in the rows of custom statements and keep their properties.
fn value_to_json(value: &rsmgclient::Value) -> Result<Value> {
    let json = match value {
        rsmgclient::Value::Null => Value::Null,
        rsmgclient::Value::Bool(v) => Value::Bool(*v),
        rsmgclient::Value::Int(n) => Value::Number(Number::from(*n)),
        rsmgclient::Value::Float(n) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
        rsmgclient::Value::String(s) => Value::String(s.clone()),
        rsmgclient::Value::List(xs) => {
            let mut items = Vec::with_capacity(xs.len());
            for x in xs {
                items.push(value_to_json(x)?);
            }
            Value::Array(items)
        }
        rsmgclient::Value::Map(m) => properties_to_json(m)?,
        rsmgclient::Value::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        rsmgclient::Value::LocalTime(lt) => Value::String(lt.format("%H:%M:%S%.f").to_string()),
        rsmgclient::Value::LocalDateTime(dt) => {
            Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        rsmgclient::Value::Duration(d) => Value::String(d.to_string()),
        rsmgclient::Value::Node(n) => properties_to_json(&n.properties)?,
        rsmgclient::Value::Relationship(r) => properties_to_json(&r.properties)?,
        rsmgclient::Value::UnboundRelationship(r) => properties_to_json(&r.properties)?,
        other => {
            return Err(MemgraphError::QueryError(format!(
                "Unsupported value in result row: {other:?}"
            ))
            .into())
        }
    };
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bolt_urls() {
        assert_eq!(
            parse_url("bolt://localhost:7687").unwrap(),
            ("localhost".to_string(), 7687)
        );
        assert_eq!(parse_url("db:7688").unwrap(), ("db".to_string(), 7688));
        assert!(parse_url("bolt://localhost").is_err());
    }

    #[test]
    fn converts_parameters() {
        let params = BTreeMap::from([
            ("param0".to_string(), json!(1)),
            ("param1".to_string(), json!(["a", 2.5, null])),
        ]);
        let converted = query_params(&params);
        assert!(matches!(converted.get("param0"), Some(QueryParam::Int(1))));
        let Some(QueryParam::List(items)) = converted.get("param1") else {
            panic!("expected a list parameter");
        };
        assert!(matches!(items.as_slice(), [
            QueryParam::String(_),
            QueryParam::Float(_),
            QueryParam::Null
        ]));
    }

    #[test]
    fn converts_result_values() {
        let value = rsmgclient::Value::List(vec![
            rsmgclient::Value::Int(3),
            rsmgclient::Value::Float(f64::NAN),
            rsmgclient::Value::String("x".to_string()),
        ]);
        assert_eq!(value_to_json(&value).unwrap(), json!([3, null, "x"]));
    }
}

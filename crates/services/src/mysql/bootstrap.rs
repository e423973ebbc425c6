//! Root credential bootstrap and the SQL client seam
//!
//! A server fresh from `--initialize-insecure` has a passwordless root. The
//! bootstrap logs in with the configured root password first and only falls
//! back to the empty one (followed by `ALTER USER`) when that is rejected,
//! so re-running against an already bootstrapped server is a no-op apart
//! from the idempotent `IF NOT EXISTS` statements.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use wpharness_common::{Error, Result};

pub const ROOT_USER: &str = "root";

/// MySQL `ER_ACCESS_DENIED_ERROR`
const ACCESS_DENIED: u16 = 1045;

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl ConnectionTarget {
    pub fn root(port: u16, password: &str) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
            user: ROOT_USER.to_string(),
            password: password.to_string(),
        }
    }

    pub fn with_password(&self, password: &str) -> Self {
        Self {
            password: password.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Nothing answered, or the server is not accepting sessions yet.
    #[error("server unavailable: {0}")]
    Unavailable(String),
    /// The server answered and refused the credentials.
    #[error("access denied: {0}")]
    Rejected(String),
}

/// An open client session
pub trait SqlSession: Send {
    fn execute(&mut self, sql: &str) -> Result<()>;
}

/// Opens client sessions; the production implementation is [`MysqlConnector`].
pub trait SqlConnector: Send + Sync {
    fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> std::result::Result<Box<dyn SqlSession>, ConnectError>;
}

/// Outcome of a readiness check that reached the server
pub(crate) enum RootLogin {
    Accepted(Box<dyn SqlSession>),
    Rejected,
}

/// Try one root login. `None` means the server is not up yet.
pub(crate) fn check_ready(
    connector: &dyn SqlConnector,
    target: &ConnectionTarget,
) -> Option<RootLogin> {
    match connector.connect(target) {
        Ok(session) => Some(RootLogin::Accepted(session)),
        Err(ConnectError::Rejected(reason)) => {
            debug!("Server is up, root login rejected: {}", reason);
            Some(RootLogin::Rejected)
        }
        Err(ConnectError::Unavailable(reason)) => {
            debug!("Server not ready: {}", reason);
            None
        }
    }
}

/// Establish the configured root password, then create the database and
/// application user.
pub(crate) fn bootstrap(
    connector: &dyn SqlConnector,
    target: &ConnectionTarget,
    first_login: RootLogin,
    database: &str,
    user: &str,
    password: &str,
) -> Result<()> {
    let mut session = match first_login {
        RootLogin::Accepted(session) => session,
        RootLogin::Rejected if target.password.is_empty() => {
            return Err(Error::DatabaseBootstrap(
                "root login without password was rejected".to_string(),
            ));
        }
        RootLogin::Rejected => {
            info!("Setting the MySQL root password");
            let mut insecure = connector
                .connect(&target.with_password(""))
                .map_err(|e| login_failed(&e))?;
            insecure.execute(&alter_root_password(&target.password))?;
            drop(insecure);

            connector.connect(target).map_err(|e| login_failed(&e))?
        }
    };

    for statement in provisioning_statements(database, user, password) {
        session.execute(&statement)?;
    }
    info!("Database `{}` ready for user '{}'", database, user);
    Ok(())
}

fn login_failed(err: &ConnectError) -> Error {
    Error::DatabaseBootstrap(format!("root login failed: {}", err))
}

pub fn alter_root_password(password: &str) -> String {
    format!(
        "ALTER USER 'root'@'localhost' IDENTIFIED BY {}",
        quote_literal(password)
    )
}

/// Idempotent statements creating `database` and granting it to `user`.
/// Root already has every privilege, so only the database is created.
pub fn provisioning_statements(database: &str, user: &str, password: &str) -> Vec<String> {
    let db = quote_identifier(database);
    let mut statements = vec![format!("CREATE DATABASE IF NOT EXISTS {}", db)];
    if user != ROOT_USER {
        let account = format!("{}@'%'", quote_literal(user));
        statements.push(format!(
            "CREATE USER IF NOT EXISTS {} IDENTIFIED BY {}",
            account,
            quote_literal(password)
        ));
        statements.push(format!("GRANT ALL PRIVILEGES ON {}.* TO {}", db, account));
    }
    statements.push("FLUSH PRIVILEGES".to_string());
    statements
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn quote_identifier(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

/// [`SqlConnector`] speaking the MySQL protocol over TCP
#[derive(Debug, Clone)]
pub struct MysqlConnector {
    connect_timeout: Duration,
}

impl MysqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for MysqlConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl SqlConnector for MysqlConnector {
    fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> std::result::Result<Box<dyn SqlSession>, ConnectError> {
        let password = (!target.password.is_empty()).then(|| target.password.clone());
        let opts = mysql::OptsBuilder::new()
            .ip_or_hostname(Some(target.host.clone()))
            .tcp_port(target.port)
            .user(Some(target.user.clone()))
            .pass(password)
            .prefer_socket(false)
            .tcp_connect_timeout(Some(self.connect_timeout));

        match mysql::Conn::new(opts) {
            Ok(conn) => Ok(Box::new(MysqlSession { conn })),
            Err(mysql::Error::MySqlError(e)) if e.code == ACCESS_DENIED => {
                Err(ConnectError::Rejected(e.message))
            }
            Err(e) => Err(ConnectError::Unavailable(e.to_string())),
        }
    }
}

struct MysqlSession {
    conn: mysql::Conn,
}

impl SqlSession for MysqlSession {
    fn execute(&mut self, sql: &str) -> Result<()> {
        use mysql::prelude::Queryable;

        self.conn
            .query_drop(sql)
            .map_err(|e| Error::DatabaseBootstrap(e.to_string()))
    }
}

//! wpharness Services
//!
//! Supervised external processes for WordPress test runs: a local MySQL
//! server, ChromeDriver and the PHP built-in web server. Each implements
//! [`ManagedProcess`]; the kind-level PID file is what tells independent
//! invocations that an instance is already up.

pub mod chromedriver;
pub mod context;
pub mod lifecycle;
pub mod mysql;
pub mod php;

pub use chromedriver::{ChromeDriver, ChromeDriverOptions};
pub use context::ServiceContext;
pub use crate::mysql::{MysqlConnection, MysqlServer, MysqlServerOptions};
pub use lifecycle::{LifecycleState, ManagedProcess, ServiceKind};
pub use php::{PhpBuiltInServer, PhpServerOptions};

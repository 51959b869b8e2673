//! Various crate-wide constants.

use std::time::Duration;
use crate::commons::storage::Ident;


//------------ Binary Names -------------------------------------------------

/// The friendly name of the `roahist` binary.
pub const ROAHIST_SERVER_APP: &str = "ROA History";

/// The version of this crate.
pub const ROAHIST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The user agent used for requests to the ROA source.
pub const ROAHIST_USER_AGENT: &str =
    concat!("roahist/", env!("CARGO_PKG_VERSION"));


//------------ Config Files Paths -------------------------------------------

/// The default path to the config file.
pub const ROAHIST_DEFAULT_CONFIG_FILE: &str = "/etc/roahist.conf";


//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const ROAHIST_ENV_LOG_LEVEL: &str = "ROAHIST_LOG_LEVEL";


//------------ Ingestion ----------------------------------------------------

/// The default URI of the published ROA set.
pub const DEFAULT_SOURCE_URI: &str = "https://hosted-routinator.rarc.net/json";

/// The default timeout for fetching the ROA set.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(120);

/// The default minimum time between two ingestion runs.
pub const DEFAULT_MIN_RUN_INTERVAL: Duration = Duration::from_secs(55 * 60);


//------------ Storage Namespaces --------------------------------------------

/// The namespace holding the ROA history.
pub const ROA_HISTORY_NS: &Ident = Ident::make("roa_history");

/// The scope holding one value per ROA.
pub const ROAS_SCOPE: &Ident = Ident::make("roas");

/// The key of the marker for the last completed run.
pub const LAST_RUN_KEY: &Ident = Ident::make("last_run.json");


//------------ HTTP ----------------------------------------------------------

/// The maximum time to wait for a request to be fully received.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

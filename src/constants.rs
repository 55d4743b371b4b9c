// src/constants.rs

/// The name of the project manifest, looked up in the invocation directory.
pub const MANIFEST_FILENAME: &str = "dploy.yml";

/// The project-local directory holding template overrides (relative to the invocation directory).
pub const PROJECT_TEMPLATES_DIR: &str = "dploy";

/// Default root of the remote per-stage override files (`<root>/<project>/<stage>.yml`).
pub const DEFAULT_REMOTE_CONTEXT_ROOT: &str = "/root/.context";

/// The stage allowed to run against the local machine.
pub const DEV_STAGE: &str = "dev";

/// Host names that designate the local machine when used as the only `dev` host.
pub const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1"];

/// Reserved path returning the active stage name.
pub const STAGE_KEY: &str = "stage";

/// Reserved path returning the local invocation directory.
pub const BASE_PATH_KEY: &str = "base_path";

/// Maximum nesting of template cross-references before resolution gives up.
pub const MAX_RECURSION_DEPTH: u32 = 32;

/// Django versions starting from this (major, minor) pair ship a migration framework.
pub const MIGRATIONS_MIN_VERSION: (u64, u64) = (1, 7);

/// Where certbot keeps issued certificates.
pub const LETSENCRYPT_LIVE_DIR: &str = "/etc/letsencrypt/live";

/// The Diffie-Hellman parameters certbot installs alongside its nginx plugin.
pub const LETSENCRYPT_DHPARAMS: &str = "/etc/letsencrypt/ssl-dhparams.pem";

//! Identifying User-Agent: env var → .env in dir → config file → built-in default.

use log::{debug, warn};
use std::path::Path;

use crate::utils::config::{ArchiveConsts, PackagePaths};

fn non_empty(s: String) -> Option<String> {
    let s = s.trim().to_string();
    (!s.is_empty()).then_some(s)
}

fn try_env_then_dotenv(dir: &Path) -> Option<String> {
    let key = PackagePaths::get().user_agent_env();
    if let Some(s) = std::env::var(key).ok().and_then(non_empty) {
        return Some(s);
    }
    let env_path = dir.join(".env");
    if !env_path.is_file() {
        return None;
    }
    // Only our key is picked out; the process environment is not touched.
    let entries = match dotenvy::from_path_iter(&env_path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("{}: {}", env_path.display(), e);
            return None;
        }
    };
    for entry in entries {
        match entry {
            Ok((k, v)) if k == key => return non_empty(v),
            Ok(_) => {}
            Err(e) => warn!("{}: {}", env_path.display(), e),
        }
    }
    None
}

/// Resolve the User-Agent sent with every archive request.
pub fn resolve_user_agent(dir: &Path, from_file: Option<&str>) -> String {
    if let Some(ua) = try_env_then_dotenv(dir) {
        debug!("User-Agent from environment");
        return ua;
    }
    if let Some(ua) = from_file.map(str::to_string).and_then(non_empty) {
        debug!("User-Agent from config file");
        return ua;
    }
    warn!(
        "No {} set; using the default User-Agent. The archive asks for a contact address.",
        PackagePaths::get().user_agent_env()
    );
    ArchiveConsts::DEFAULT_USER_AGENT.to_string()
}

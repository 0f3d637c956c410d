use std::path::PathBuf;

use clap::Parser;

pub const DB_FILE_NAME: &str = "qc_portal.sqlite3";
pub const IMAGES_DIR: &str = "images";

/// QC Portal: search quality-control findings by model number and upload
/// new defect reports with photos.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to bind the HTTP server to
    #[arg(long = "server.address", alias = "address", env = "QC_ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// Port to bind the HTTP server to
    #[arg(long = "server.port", alias = "port", env = "QC_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory holding the database and stored photos
    #[arg(long, env = "QC_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// SQLite database path, defaults to <data-dir>/qc_portal.sqlite3
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Microsoft Teams incoming webhook for NG / nonconformity alerts
    #[arg(long, env = "TEAMS_WEBHOOK_URL")]
    pub teams_webhook_url: Option<String>,

    /// Name recorded as reporter on new records
    #[arg(long, env = "QC_USER")]
    pub user: Option<String>,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl Config {
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => self.data_dir.join(DB_FILE_NAME).to_string_lossy().into_owned(),
        }
    }

    pub fn webhook(&self) -> Option<String> {
        self.teams_webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    }

    /// Reporter name; there is no login, so this is whoever runs the server.
    pub fn reporter(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "User".to_string())
    }

    pub fn bind_addr(&self) -> (String, u16) {
        (self.address.clone(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streamlit_style_flags_are_accepted() {
        let cfg = Config::try_parse_from([
            "qc-portal",
            "--server.address",
            "127.0.0.1",
            "--server.port",
            "9090",
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr(), ("127.0.0.1".to_string(), 9090));
    }

    #[test]
    fn database_defaults_into_data_dir() {
        let cfg = Config::try_parse_from(["qc-portal", "--data-dir", "/srv/qc"]).unwrap();
        if cfg.database_url.is_none() {
            assert_eq!(cfg.database_url(), "/srv/qc/qc_portal.sqlite3");
        }
    }

    #[test]
    fn blank_webhook_disables_notifications() {
        let cfg = Config::try_parse_from(["qc-portal", "--teams-webhook-url", "  "]).unwrap();
        assert_eq!(cfg.webhook(), None);
    }

    #[test]
    fn explicit_user_wins() {
        let cfg = Config::try_parse_from(["qc-portal", "--user", " inspector "]).unwrap();
        assert_eq!(cfg.reporter(), "inspector");
    }
}

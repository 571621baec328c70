use crate::constants::APP_NAME;

use anyhow::{ensure, Result};
use config::{builder::DefaultState, Config, ConfigBuilder};
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize, Clone, Debug)]
pub struct TributaryConfig {
    pub scheduler_url: String,
    pub job_name: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_lost_contact_threshold")]
    pub lost_contact_threshold: u32,
    #[serde(default = "default_lost_contact_cooldown_ms")]
    pub lost_contact_cooldown_ms: u64,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default)]
    pub layout: LayoutSettings,
}

/// Force layout tunables. The defaults follow the scheduler's own job page.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct LayoutSettings {
    #[serde(default = "default_link_distance")]
    pub link_distance: f64,
    #[serde(default = "default_charge")]
    pub charge: f64,
    #[serde(default = "default_gravity")]
    pub gravity: f64,
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default = "default_height")]
    pub height: f64,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        LayoutSettings {
            link_distance: default_link_distance(),
            charge: default_charge(),
            gravity: default_gravity(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl TributaryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn lost_contact_cooldown(&self) -> Duration {
        Duration::from_millis(self.lost_contact_cooldown_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    10000
}

fn default_lost_contact_threshold() -> u32 {
    3
}

fn default_lost_contact_cooldown_ms() -> u64 {
    60000
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_link_distance() -> f64 {
    75.0
}

fn default_charge() -> f64 {
    -1500.0
}

fn default_gravity() -> f64 {
    0.1
}

fn default_width() -> f64 {
    940.0
}

fn default_height() -> f64 {
    600.0
}

pub fn init(file: &str) -> Result<TributaryConfig> {
    finish(
        Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix(APP_NAME)),
    )
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<TributaryConfig> {
    let conf = builder.build()?.try_deserialize::<TributaryConfig>()?;

    ensure!(
        !conf.scheduler_url.trim().is_empty(),
        "scheduler_url must not be empty"
    );
    ensure!(!conf.job_name.trim().is_empty(), "job_name must not be empty");
    ensure!(
        conf.lost_contact_threshold > 0,
        "lost_contact_threshold must be at least 1"
    );
    ensure!(conf.poll_interval_ms > 0, "poll_interval_ms must be positive");
    ensure!(
        conf.frame_interval_ms > 0,
        "frame_interval_ms must be positive"
    );

    Ok(conf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(raw: &str) -> Result<TributaryConfig> {
        finish(Config::builder().add_source(config::File::from_str(raw, FileFormat::Toml)))
    }

    #[test]
    fn defaults_fill_missing_keys() {
        let conf = from_toml(
            r#"
            scheduler_url = "http://localhost:9000"
            job_name = "nightly"
            "#,
        )
        .unwrap();

        assert_eq!(conf.poll_interval(), Duration::from_millis(5000));
        assert_eq!(conf.lost_contact_threshold, 3);
        assert_eq!(conf.layout, LayoutSettings::default());
        assert_eq!(conf.layout.link_distance, 75.0);
    }

    #[test]
    fn nested_layout_overrides() {
        let conf = from_toml(
            r#"
            scheduler_url = "http://localhost:9000"
            job_name = "nightly"
            poll_interval_ms = 250

            [layout]
            charge = -300.0
            "#,
        )
        .unwrap();

        assert_eq!(conf.poll_interval_ms, 250);
        assert_eq!(conf.layout.charge, -300.0);
        assert_eq!(conf.layout.width, 940.0);
    }

    #[test]
    fn rejects_zero_threshold() {
        let res = from_toml(
            r#"
            scheduler_url = "http://localhost:9000"
            job_name = "nightly"
            lost_contact_threshold = 0
            "#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn requires_job_name() {
        assert!(from_toml(r#"scheduler_url = "http://localhost:9000""#).is_err());
    }
}

// config.rs -- TOML configuration, one schema per binary.
//
// Ground truth: original_source/trunk/libsylverant/include/sylverant/config.h,
// reshaped from its XML config-file layout into serde/toml, the way
// this crate's ambient stack handles configuration everywhere else
// (spec.md §9).

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ProtoError, Result};

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .map_err(|e| ProtoError::Config(format!("reading {}: {e}", path.display())))?;
    toml::from_str(&text).map_err(|e| ProtoError::Config(format!("parsing {}: {e}", path.display())))
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(rename = "type", default = "default_db_type")]
    pub kind: String,
    pub host: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub db: String,
    #[serde(default)]
    pub port: u16,
}

fn default_db_type() -> String {
    "sqlite".to_owned()
}

fn default_shipgate_ip() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

fn default_shipgate_port() -> u16 {
    9000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RareMonsterRates {
    #[serde(default)]
    pub hildebear: u32,
    #[serde(default)]
    pub rappy: u32,
    #[serde(default)]
    pub lilly: u32,
    #[serde(default)]
    pub slime: u32,
    #[serde(default)]
    pub merissa: u32,
    #[serde(default)]
    pub pazuzu: u32,
    #[serde(default)]
    pub dorphon: u32,
    #[serde(default)]
    pub kondrieu: u32,
}

impl Default for RareMonsterRates {
    fn default() -> Self {
        Self {
            hildebear: 0,
            rappy: 0,
            lilly: 0,
            slime: 0,
            merissa: 0,
            pazuzu: 0,
            dorphon: 0,
            kondrieu: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmColors {
    pub ggm: u32,
    pub lgm: u32,
    pub user: u32,
}

/// Shared `sylverant_config_t` equivalent: database plus the settings
/// every service binary (redirector, shipgate, login, ship) reads.
#[derive(Debug, Clone, Deserialize)]
pub struct SylverantConfig {
    pub database: DbConfig,
    pub server_ip: Ipv4Addr,
    #[serde(default)]
    pub override_ip: Option<Ipv4Addr>,
    pub server_port: u16,
    /// Address the login and ship services dial to reach the shipgate
    /// (spec.md §4.3 "login service also maintains a session to
    /// Shipgate", §4.5 "one outbound shipgate session").
    #[serde(default = "default_shipgate_ip")]
    pub shipgate_ip: Ipv4Addr,
    #[serde(default = "default_shipgate_port")]
    pub shipgate_port: u16,
    #[serde(default)]
    pub welcome_message: String,
    #[serde(default)]
    pub patch_maxconn: u32,
    #[serde(default)]
    pub login_maxconn: u32,
    #[serde(default)]
    pub shipgate_maxships: u32,
    #[serde(default)]
    pub rare_monsters: RareMonsterRates,
    pub colors: GmColors,
}

impl SylverantConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_toml(path)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShipDrops {
    pub weapon: f32,
    pub armor: f32,
    pub mag: f32,
    pub tool: f32,
    pub meseta: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShipEntry {
    pub name: String,
    pub key_file: String,
    #[serde(default)]
    pub info_files: Vec<String>,
    #[serde(default)]
    pub quests_file: Option<String>,
    pub ship_ip: Ipv4Addr,
    pub base_port: u16,
    pub blocks: u16,
    pub drops: ShipDrops,
    #[serde(default)]
    pub event: u32,
    #[serde(default = "default_exp_rate")]
    pub exp_rate: f32,
}

fn default_exp_rate() -> f32 {
    1.0
}

/// `sylverant_shipcfg_t` equivalent: the shipgate's address plus every
/// ship entry it will accept a connection from.
#[derive(Debug, Clone, Deserialize)]
pub struct ShipConfig {
    pub shipgate_ip: Ipv4Addr,
    pub shipgate_port: u16,
    #[serde(rename = "ship")]
    pub ships: Vec<ShipEntry>,
}

impl ShipConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_toml(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sylverant_config_parses_minimal_toml() {
        let toml_text = r#"
            server_ip = "192.168.1.10"
            server_port = 9300
            welcome_message = "hello"

            [database]
            db = "sylverant.db"

            [colors]
            ggm = 1
            lgm = 2
            user = 3
        "#;
        let cfg: SylverantConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.server_port, 9300);
        assert_eq!(cfg.database.kind, "sqlite");
        assert_eq!(cfg.rare_monsters.hildebear, 0);
    }

    #[test]
    fn ship_config_parses_multiple_ship_entries() {
        let toml_text = r#"
            shipgate_ip = "10.0.0.1"
            shipgate_port = 9000

            [[ship]]
            name = "Ship01"
            key_file = "keys/ship01.key"
            ship_ip = "203.0.113.20"
            base_port = 5900
            blocks = 2

            [ship.drops]
            weapon = 1.0
            armor = 1.0
            mag = 1.0
            tool = 1.0
            meseta = 1.0
        "#;
        let cfg: ShipConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.ships.len(), 1);
        assert_eq!(cfg.ships[0].exp_rate, 1.0);
    }
}

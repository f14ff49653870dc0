use std::io::prelude::*;
use std::path::Path;
use std::sync::{Arc, Mutex};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::*;
use url::Url;

use crate::cli;
use crate::session::SessionConfig;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HeaderSettingsFile {
    pub name: String,
    pub version: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SettingsStruct {
    pub header: HeaderSettingsFile,
    /// Base URL of the control server the proxy forwards to.
    pub upstream_base_url: Url,
    /// Value of the client-identifying header injected on upstream calls.
    pub client_id: String,
    pub session: SessionConfig,
}

#[derive(Debug)]
struct ManagerStruct {
    pub file_name: String,
    pub config: SettingsStruct,
}

struct Manager {
    pub content: Option<ManagerStruct>,
}

lazy_static! {
    static ref MANAGER: Arc<Mutex<Manager>> = Arc::new(Mutex::new(Manager { content: None }));
}

impl Default for SettingsStruct {
    fn default() -> Self {
        SettingsStruct {
            header: HeaderSettingsFile {
                name: "Speedtest Manager".to_string(),
                version: 1,
            },
            upstream_base_url: Url::parse("https://api-beta.nettest.org")
                .expect("Default upstream URL is valid"),
            client_id: "nt".to_string(),
            session: SessionConfig::default(),
        }
    }
}

impl Manager {
    fn new(file_name: &str) -> ManagerStruct {
        let file_name = if !Path::new(file_name).is_absolute() {
            match ProjectDirs::from("org", "Nettest", env!("CARGO_PKG_NAME")) {
                Some(project) => {
                    let folder_path = Path::new(project.config_dir());
                    if let Err(error) = std::fs::create_dir_all(folder_path) {
                        error!(
                            "Failed to create settings folder: {:?}, reason: {error:#?}",
                            folder_path.to_str()
                        );
                    }
                    Path::new(&folder_path)
                        .join(file_name)
                        .to_str()
                        .expect("Failed to create settings path.")
                        .to_string()
                }
                None => panic!("Failed to find user settings path."),
            }
        } else {
            file_name.into()
        };

        debug!("Using settings file: {file_name}");

        let settings = load_settings_from_file(&file_name);

        let settings = ManagerStruct {
            file_name,
            config: settings,
        };

        save_settings_to_file(&settings.file_name, &settings.config).unwrap_or_else(|error| {
            error!("Failed to save file: {error:#?}");
        });

        settings
    }
}

// Init settings manager with the desired settings file,
// will be created if does not exist
pub fn init(file_name: Option<&str>) {
    let mut manager = MANAGER.lock().unwrap();
    let file_name = file_name.unwrap_or("settings.json");
    manager.content = Some(Manager::new(file_name));
}

fn load_settings_from_file(file_name: &str) -> SettingsStruct {
    if cli::manager::is_reset() {
        return SettingsStruct::default();
    }

    let Ok(content) = std::fs::read_to_string(file_name) else {
        return SettingsStruct::default();
    };

    serde_json::from_str(&content).unwrap_or_else(|error| {
        warn!("Failed parsing settings file, using defaults: {error:#?}");
        SettingsStruct::default()
    })
}

fn save_settings_to_file(file_name: &str, content: &SettingsStruct) -> std::io::Result<()> {
    let mut file = std::fs::File::create(file_name)?;
    let value = serde_json::to_string_pretty(content).unwrap();
    file.write_all(value.as_bytes())
}

// Save the latest state of the settings
pub fn save() {
    let manager = MANAGER.lock().unwrap();
    if let Some(content) = &manager.content {
        if let Err(error) = save_settings_to_file(&content.file_name, &content.config) {
            error!(
                "Failed to save settings: file: {:#?}, error: {error:#?}",
                &content.file_name
            );
        }
    } else {
        debug!("Settings not initialized, nothing to save.");
    }
}

pub fn header() -> HeaderSettingsFile {
    let manager = MANAGER.lock().unwrap();
    manager.content.as_ref().unwrap().config.header.clone()
}

/// Upstream base URL, honoring a command line override.
pub fn upstream_base_url() -> Url {
    if let Some(upstream) = cli::manager::upstream() {
        return upstream;
    }
    let manager = MANAGER.lock().unwrap();
    manager
        .content
        .as_ref()
        .unwrap()
        .config
        .upstream_base_url
        .clone()
}

pub fn client_id() -> String {
    let manager = MANAGER.lock().unwrap();
    manager.content.as_ref().unwrap().config.client_id.clone()
}

pub fn session_config() -> SessionConfig {
    let manager = MANAGER.lock().unwrap();
    manager.content.as_ref().unwrap().config.session
}

pub fn set_session_config(session: SessionConfig) {
    // Take care of scope mutex
    {
        let mut manager = MANAGER.lock().unwrap();
        manager.content.as_mut().unwrap().config.session = session;
    }
    save();
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn generate_random_settings_file_name() -> String {
        use rand::Rng;

        let rand_string: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(30)
            .map(char::from)
            .collect();

        format!("/tmp/{rand_string}.json")
    }

    #[test]
    #[serial]
    fn test_store() {
        init(Some(&generate_random_settings_file_name()));

        let header = header();
        assert_eq!(header.name, "Speedtest Manager".to_string());

        assert_eq!(client_id(), "nt");
        assert_eq!(
            upstream_base_url().as_str(),
            "https://api-beta.nettest.org/"
        );

        let fake_session = SessionConfig {
            poll_interval_ms: 42,
            overall_timeout_ms: 4_200,
            connect_timeout_ms: 420,
        };
        set_session_config(fake_session);
        assert_eq!(session_config(), fake_session);

        save();
    }

    #[test]
    #[serial]
    fn test_reload_round_trip() {
        let file_name = generate_random_settings_file_name();
        init(Some(&file_name));

        let fake_session = SessionConfig {
            poll_interval_ms: 100,
            overall_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
        };
        set_session_config(fake_session);

        // A fresh init over the same file must read back the saved state.
        init(Some(&file_name));
        assert_eq!(session_config(), fake_session);
    }
}

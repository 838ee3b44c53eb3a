//! Cookie import from browser profiles already logged in on this host.
//!
//! Every store is SQLite. The file is copied to a temp file first since a
//! running browser keeps it locked.

use rusqlite::{Connection, OpenFlags};
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumIter, IntoEnumIterator};

use super::decrypt::{self, CookieKey};
use crate::core::error::{AppError, AppResult};

const DOMAIN_PATTERN: &str = "%instagram.com";
const COPY_ATTEMPTS: u32 = 3;

/// Browser families in import priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Edge,
    Yandex,
}

impl BrowserFamily {
    fn is_chromium(self) -> bool {
        !matches!(self, BrowserFamily::Firefox)
    }
}

/// One cookie store on disk
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub family: BrowserFamily,
    pub cookies_db: PathBuf,
    /// Chromium `Local State` holding the wrapped cookie key
    pub local_state: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BrowserCookieImporter {
    profiles: Vec<BrowserProfile>,
    explicit_key: Option<CookieKey>,
}

impl BrowserCookieImporter {
    /// Default profile locations of every family that exists on this host.
    pub fn discover(explicit_key: Option<&SecretString>) -> Self {
        let profiles: Vec<BrowserProfile> = BrowserFamily::iter().flat_map(default_profiles).collect();
        log::debug!("BrowserCookieImporter: {} cookie stores found", profiles.len());
        Self::with_profiles(profiles, explicit_key.and_then(CookieKey::from_base64))
    }

    pub fn with_profiles(profiles: Vec<BrowserProfile>, explicit_key: Option<CookieKey>) -> Self {
        Self { profiles, explicit_key }
    }

    pub fn profiles(&self) -> &[BrowserProfile] {
        &self.profiles
    }

    /// Platform cookie jars, highest priority first. Blocking.
    pub fn import_all(&self) -> Vec<(BrowserFamily, BTreeMap<String, String>)> {
        let mut jars = Vec::new();
        for family in BrowserFamily::iter() {
            for profile in self.profiles.iter().filter(|p| p.family == family) {
                match self.import_profile(profile) {
                    Ok(jar) if !jar.is_empty() => {
                        log::info!(
                            "🍪 {}: {} cookies from {}",
                            family,
                            jar.len(),
                            profile.cookies_db.display()
                        );
                        jars.push((family, jar));
                    }
                    Ok(_) => log::debug!("{}: no platform cookies in {}", family, profile.cookies_db.display()),
                    Err(e) => log::warn!("{}: cookie import failed: {}", family, e),
                }
            }
        }
        jars
    }

    pub fn import_profile(&self, profile: &BrowserProfile) -> AppResult<BTreeMap<String, String>> {
        let snapshot = copy_to_temp(&profile.cookies_db)?;
        let conn = Connection::open_with_flags(
            snapshot.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        if profile.family.is_chromium() {
            let key = self
                .explicit_key
                .clone()
                .or_else(|| profile.local_state.as_deref().and_then(CookieKey::from_local_state))
                .or_else(CookieKey::platform_default);
            read_chromium(&conn, key.as_ref())
        } else {
            read_firefox(&conn)
        }
    }
}

fn read_chromium(conn: &Connection, key: Option<&CookieKey>) -> AppResult<BTreeMap<String, String>> {
    let mut stmt = conn.prepare("SELECT name, value, encrypted_value FROM cookies WHERE host_key LIKE ?1")?;
    let rows = stmt.query_map([DOMAIN_PATTERN], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            row.get::<_, Option<Vec<u8>>>(2)?.unwrap_or_default(),
        ))
    })?;

    let mut jar = BTreeMap::new();
    let mut skipped = 0usize;
    for row in rows {
        let (name, value, encrypted) = row?;
        if !value.is_empty() {
            jar.insert(name, value);
            continue;
        }
        match key.and_then(|k| decrypt::decrypt_cookie_value(&encrypted, k)) {
            Some(plain) if !plain.is_empty() => {
                jar.insert(name, plain);
            }
            _ if encrypted.is_empty() => {}
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("⚠️ {} encrypted cookies skipped (no usable key)", skipped);
    }
    Ok(jar)
}

fn read_firefox(conn: &Connection) -> AppResult<BTreeMap<String, String>> {
    let mut stmt = conn.prepare("SELECT name, value FROM moz_cookies WHERE host LIKE ?1")?;
    let rows = stmt.query_map([DOMAIN_PATTERN], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut jar = BTreeMap::new();
    for row in rows {
        let (name, value) = row?;
        if !value.is_empty() {
            jar.insert(name, value);
        }
    }
    Ok(jar)
}

fn copy_to_temp(source: &Path) -> AppResult<tempfile::NamedTempFile> {
    let mut last_error = None;
    for attempt in 1..=COPY_ATTEMPTS {
        let temp = tempfile::NamedTempFile::new()?;
        match fs_err::copy(source, temp.path()) {
            Ok(_) => return Ok(temp),
            Err(e) => {
                log::debug!("Copy attempt {}/{} failed: {}", attempt, COPY_ATTEMPTS, e);
                last_error = Some(e);
                std::thread::sleep(Duration::from_millis(500));
            }
        }
    }
    Err(last_error
        .map(AppError::from)
        .unwrap_or_else(|| AppError::Session(format!("cannot copy {}", source.display()))))
}

fn default_profiles(family: BrowserFamily) -> Vec<BrowserProfile> {
    let Some(home) = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
    else {
        return Vec::new();
    };

    match family {
        BrowserFamily::Firefox => firefox_roots(&home)
            .into_iter()
            .flat_map(|root| firefox_profiles(&root))
            .map(|cookies_db| BrowserProfile {
                family,
                cookies_db,
                local_state: None,
            })
            .collect(),
        _ => chromium_user_data(&home, family)
            .into_iter()
            .filter_map(|user_data| {
                let cookies_db = ["Default/Network/Cookies", "Default/Cookies"]
                    .iter()
                    .map(|rel| user_data.join(rel))
                    .find(|p| p.is_file())?;
                let local_state = Some(user_data.join("Local State")).filter(|p| p.is_file());
                Some(BrowserProfile {
                    family,
                    cookies_db,
                    local_state,
                })
            })
            .collect(),
    }
}

fn chromium_user_data(home: &Path, family: BrowserFamily) -> Vec<PathBuf> {
    let local_app_data = std::env::var_os("LOCALAPPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join("AppData/Local"));
    let candidates: Vec<PathBuf> = match family {
        BrowserFamily::Chrome => vec![
            home.join(".config/google-chrome"),
            home.join(".config/chromium"),
            home.join("Library/Application Support/Google/Chrome"),
            local_app_data.join("Google/Chrome/User Data"),
        ],
        BrowserFamily::Edge => vec![
            home.join(".config/microsoft-edge"),
            home.join("Library/Application Support/Microsoft Edge"),
            local_app_data.join("Microsoft/Edge/User Data"),
        ],
        BrowserFamily::Yandex => vec![
            home.join(".config/yandex-browser"),
            home.join("Library/Application Support/Yandex/YandexBrowser"),
            local_app_data.join("Yandex/YandexBrowser/User Data"),
        ],
        BrowserFamily::Firefox => Vec::new(),
    };
    candidates.into_iter().filter(|p| p.is_dir()).collect()
}

fn firefox_roots(home: &Path) -> Vec<PathBuf> {
    let app_data = std::env::var_os("APPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join("AppData/Roaming"));
    [
        home.join(".mozilla/firefox"),
        home.join("Library/Application Support/Firefox/Profiles"),
        app_data.join("Mozilla/Firefox/Profiles"),
    ]
    .into_iter()
    .filter(|p| p.is_dir())
    .collect()
}

/// `cookies.sqlite` of every profile, `*.default-release` first.
fn firefox_profiles(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs_err::read_dir(root) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path().join("cookies.sqlite"))
        .filter(|p| p.is_file())
        .collect();
    found.sort_by_key(|p| !p.to_string_lossy().contains("default-release"));
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chromium_db(dir: &Path) -> PathBuf {
        let path = dir.join("Cookies");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE cookies (host_key TEXT, name TEXT, value TEXT, encrypted_value BLOB);
             INSERT INTO cookies VALUES ('.instagram.com', 'sessionid', 'plain-sess', x'');
             INSERT INTO cookies VALUES ('.instagram.com', 'csrftoken', '', x'7631306e6f7065');
             INSERT INTO cookies VALUES ('.youtube.com', 'SID', 'yt', x'');",
        )
        .unwrap();
        path
    }

    fn firefox_db(dir: &Path) -> PathBuf {
        let path = dir.join("cookies.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE moz_cookies (host TEXT, name TEXT, value TEXT);
             INSERT INTO moz_cookies VALUES ('.instagram.com', 'sessionid', 'ff-sess');
             INSERT INTO moz_cookies VALUES ('www.instagram.com', 'ds_user_id', '42');
             INSERT INTO moz_cookies VALUES ('.example.com', 'x', 'y');",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_chromium_plain_values_and_undecryptable_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let importer = BrowserCookieImporter::with_profiles(Vec::new(), None);
        let profile = BrowserProfile {
            family: BrowserFamily::Chrome,
            cookies_db: chromium_db(dir.path()),
            local_state: None,
        };

        let jar = importer.import_profile(&profile).unwrap();
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.get("sessionid").map(String::as_str), Some("plain-sess"));
    }

    #[test]
    fn test_firefox_store() {
        let dir = tempfile::tempdir().unwrap();
        let profile = BrowserProfile {
            family: BrowserFamily::Firefox,
            cookies_db: firefox_db(dir.path()),
            local_state: None,
        };
        let importer = BrowserCookieImporter::with_profiles(vec![profile], None);

        let jars = importer.import_all();
        assert_eq!(jars.len(), 1);
        assert_eq!(jars[0].0, BrowserFamily::Firefox);
        assert_eq!(jars[0].1.keys().collect::<Vec<_>>(), vec!["ds_user_id", "sessionid"]);
    }

    #[test]
    fn test_import_all_follows_family_priority() {
        let chrome_dir = tempfile::tempdir().unwrap();
        let firefox_dir = tempfile::tempdir().unwrap();
        let importer = BrowserCookieImporter::with_profiles(
            vec![
                BrowserProfile {
                    family: BrowserFamily::Firefox,
                    cookies_db: firefox_db(firefox_dir.path()),
                    local_state: None,
                },
                BrowserProfile {
                    family: BrowserFamily::Chrome,
                    cookies_db: chromium_db(chrome_dir.path()),
                    local_state: None,
                },
            ],
            None,
        );

        let families: Vec<BrowserFamily> = importer.import_all().into_iter().map(|(f, _)| f).collect();
        assert_eq!(families, vec![BrowserFamily::Chrome, BrowserFamily::Firefox]);
    }

    #[test]
    fn test_missing_store_is_an_error_not_a_panic() {
        let importer = BrowserCookieImporter::with_profiles(Vec::new(), None);
        let profile = BrowserProfile {
            family: BrowserFamily::Edge,
            cookies_db: PathBuf::from("/nonexistent/Cookies"),
            local_state: None,
        };
        assert!(importer.import_profile(&profile).is_err());
    }
}

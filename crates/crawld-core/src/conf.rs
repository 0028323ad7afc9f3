//! Named configurations: an in-memory registry of string property bags.
//!
//! Job bodies and the fetch client read their settings from the bag named by
//! the job's conf id. The `default` bag is seeded from `CrawldConfig` at
//! startup and always exists.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Name of the configuration that always exists.
pub const DEFAULT_CONF: &str = "default";

/// Property naming the owning configuration, set on every created bag.
pub const CONF_ID_KEY: &str = "crawld.config.id";

/// String-keyed property bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Value parsed as an integer; missing or unparsable values yield `default`.
    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("true") => true,
            Some(v) if v.eq_ignore_ascii_case("false") => false,
            _ => default,
        }
    }

    /// Comma-separated list; blank entries are dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl FromIterator<(String, String)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Request to create a configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewConf {
    /// Requested id; one is generated when absent or blank.
    #[serde(default)]
    pub conf_id: Option<String>,
    /// Replace an existing configuration with the same id.
    #[serde(default)]
    pub force: bool,
    /// Properties layered over the default configuration.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfError {
    #[error("unknown configuration id <{0}>")]
    NotFound(String),
    #[error("configuration <{0}> already exists")]
    AlreadyExists(String),
}

/// Keyed registry of property bags.
pub struct ConfManager {
    confs: RwLock<HashMap<String, Properties>>,
    sequence: AtomicU64,
}

impl ConfManager {
    /// Create the registry with `defaults` as the `default` configuration.
    pub fn new(mut defaults: Properties) -> Self {
        let mut confs = HashMap::new();
        defaults.set(CONF_ID_KEY, DEFAULT_CONF);
        confs.insert(DEFAULT_CONF.to_string(), defaults);
        Self {
            confs: RwLock::new(confs),
            sequence: AtomicU64::new(0),
        }
    }

    /// Ids of all configurations, sorted.
    pub fn list(&self) -> Vec<String> {
        let confs = self.confs.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = confs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Create a configuration layered over the default one; returns its id.
    pub fn create(&self, request: NewConf) -> Result<String, ConfError> {
        let conf_id = match request.conf_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.generate_id(&request),
        };

        let mut confs = self.confs.write().unwrap_or_else(|e| e.into_inner());
        if confs.contains_key(&conf_id) && !request.force {
            return Err(ConfError::AlreadyExists(conf_id));
        }

        let mut props = confs.get(DEFAULT_CONF).cloned().unwrap_or_default();
        for (k, v) in request.params {
            props.set(k, v);
        }
        props.set(CONF_ID_KEY, conf_id.clone());
        confs.insert(conf_id.clone(), props);
        tracing::info!(conf_id = %conf_id, "created configuration");
        Ok(conf_id)
    }

    /// Snapshot of a configuration. `None` selects the default one.
    pub fn get(&self, conf_id: Option<&str>) -> Result<Properties, ConfError> {
        let id = conf_id.unwrap_or(DEFAULT_CONF);
        let confs = self.confs.read().unwrap_or_else(|e| e.into_inner());
        confs
            .get(id)
            .cloned()
            .ok_or_else(|| ConfError::NotFound(id.to_string()))
    }

    pub fn contains(&self, conf_id: &str) -> bool {
        let confs = self.confs.read().unwrap_or_else(|e| e.into_inner());
        confs.contains_key(conf_id)
    }

    /// Sorted key/value view; an unknown id yields an empty map.
    pub fn get_as_map(&self, conf_id: &str) -> BTreeMap<String, String> {
        self.get(Some(conf_id))
            .map(Properties::into_map)
            .unwrap_or_default()
    }

    pub fn set_property(&self, conf_id: &str, key: &str, value: &str) -> Result<(), ConfError> {
        let mut confs = self.confs.write().unwrap_or_else(|e| e.into_inner());
        let props = confs
            .get_mut(conf_id)
            .ok_or_else(|| ConfError::NotFound(conf_id.to_string()))?;
        props.set(key, value);
        Ok(())
    }

    /// Remove a configuration. The default configuration cannot be removed.
    pub fn delete(&self, conf_id: &str) -> bool {
        if conf_id == DEFAULT_CONF {
            return false;
        }
        let removed = self
            .confs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(conf_id)
            .is_some();
        if removed {
            tracing::info!(conf_id, "removed configuration");
        }
        removed
    }

    fn generate_id(&self, request: &NewConf) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        match request.params.get("crawl.id") {
            Some(crawl) if !crawl.is_empty() => format!("{crawl}-{seq}"),
            _ => format!("conf-{seq}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfManager {
        let mut defaults = Properties::new();
        defaults.set("http.timeout", "1000");
        ConfManager::new(defaults)
    }

    #[test]
    fn default_conf_always_present() {
        let m = manager();
        let props = m.get(None).unwrap();
        assert_eq!(props.get("http.timeout"), Some("1000"));
        assert_eq!(props.get(CONF_ID_KEY), Some(DEFAULT_CONF));
        assert!(!m.delete(DEFAULT_CONF));
    }

    #[test]
    fn create_layers_params_over_default() {
        let m = manager();
        let mut params = BTreeMap::new();
        params.insert("http.timeout".to_string(), "5".to_string());
        params.insert("crawl.id".to_string(), "news".to_string());
        let id = m
            .create(NewConf {
                conf_id: None,
                force: false,
                params,
            })
            .unwrap();
        assert_eq!(id, "news-1");
        let props = m.get(Some(&id)).unwrap();
        assert_eq!(props.get("http.timeout"), Some("5"));
        assert_eq!(props.get(CONF_ID_KEY), Some("news-1"));
    }

    #[test]
    fn create_refuses_duplicate_without_force() {
        let m = manager();
        let req = NewConf {
            conf_id: Some("c1".to_string()),
            ..NewConf::default()
        };
        m.create(req.clone()).unwrap();
        assert!(matches!(m.create(req.clone()), Err(ConfError::AlreadyExists(_))));
        let forced = NewConf { force: true, ..req };
        assert_eq!(m.create(forced).unwrap(), "c1");
    }

    #[test]
    fn set_property_on_unknown_conf_is_not_found() {
        let m = manager();
        assert!(matches!(
            m.set_property("nope", "a", "b"),
            Err(ConfError::NotFound(_))
        ));
        m.set_property(DEFAULT_CONF, "a", "b").unwrap();
        assert_eq!(m.get_as_map(DEFAULT_CONF).get("a").map(String::as_str), Some("b"));
        assert!(m.get_as_map("nope").is_empty());
    }

    #[test]
    fn typed_getters() {
        let mut p = Properties::new();
        p.set("n", " 42 ");
        p.set("b", "TRUE");
        p.set("l", "TLSv1.2, ,TLSv1.3");
        assert_eq!(p.get_i64("n", 0), 42);
        assert_eq!(p.get_i64("missing", -1), -1);
        assert!(p.get_bool("b", false));
        assert_eq!(p.get_list("l"), vec!["TLSv1.2", "TLSv1.3"]);
        assert!(p.get_list("missing").is_empty());
    }
}

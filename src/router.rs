//! Role and step based model routing.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::roles::AgentRole;

/// Model used when nothing else is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Resolves which model serves a role or a specific plan step.
///
/// Lookup order: step map, pinned caller overrides, role map, default.
/// Role keys are stored lower-cased; empty model ids are never stored, so
/// [`ModelRouter::resolve`] never returns an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRouter {
    default_model: String,
    role_models: BTreeMap<String, String>,
    pinned: BTreeMap<String, String>,
    step_models: BTreeMap<String, String>,
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl ModelRouter {
    pub fn new(default_model: impl Into<String>) -> Self {
        let default_model = default_model.into().trim().to_string();
        Self {
            default_model: if default_model.is_empty() {
                DEFAULT_MODEL.to_string()
            } else {
                default_model
            },
            role_models: BTreeMap::new(),
            pinned: BTreeMap::new(),
            step_models: BTreeMap::new(),
        }
    }

    /// Merge role maps in increasing precedence, then pin `overrides` above
    /// everything a later [`apply_role_map`](Self::apply_role_map) may write.
    pub fn from_layers<I>(
        default_model: impl Into<String>,
        layers: I,
        overrides: &BTreeMap<String, String>,
    ) -> Self
    where
        I: IntoIterator<Item = BTreeMap<String, String>>,
    {
        let mut router = Self::new(default_model);
        for layer in layers {
            router.apply_role_map(&layer);
        }
        for (role, model) in overrides {
            router.pin_role(role, model);
        }
        router
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Merge a role→model map, overwriting only the roles it names.
    pub fn apply_role_map<'a, I, K, V>(&mut self, mapping: I)
    where
        I: IntoIterator<Item = (&'a K, &'a V)>,
        K: AsRef<str> + ?Sized + 'a,
        V: AsRef<str> + ?Sized + 'a,
    {
        for (role, model) in mapping {
            insert_model(&mut self.role_models, normalize_role(role.as_ref()), model.as_ref());
        }
    }

    /// Caller override for one role; outranks any role map.
    pub fn pin_role(&mut self, role: &str, model: &str) {
        insert_model(&mut self.pinned, normalize_role(role), model);
    }

    /// Merge a step_id→model map. Step ids are matched exactly.
    pub fn apply_step_map<'a, I, K, V>(&mut self, mapping: I)
    where
        I: IntoIterator<Item = (&'a K, &'a V)>,
        K: AsRef<str> + ?Sized + 'a,
        V: AsRef<str> + ?Sized + 'a,
    {
        for (step_id, model) in mapping {
            insert_model(&mut self.step_models, step_id.as_ref().trim().to_string(), model.as_ref());
        }
    }

    pub fn resolve(&self, role: &str, step_id: Option<&str>) -> &str {
        if let Some(model) = step_id.and_then(|id| self.step_models.get(id)) {
            return model;
        }
        let key = normalize_role(role);
        self.pinned
            .get(&key)
            .or_else(|| self.role_models.get(&key))
            .map(String::as_str)
            .unwrap_or(self.default_model.as_str())
    }

    pub fn resolve_role(&self, role: AgentRole, step_id: Option<&str>) -> &str {
        self.resolve(role.as_str(), step_id)
    }

    /// Effective model for every routed role.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        AgentRole::ROUTED
            .iter()
            .map(|r| (r.as_str().to_string(), self.resolve_role(*r, None).to_string()))
            .collect()
    }
}

fn normalize_role(role: &str) -> String {
    role.trim().to_lowercase()
}

fn insert_model(map: &mut BTreeMap<String, String>, key: String, model: &str) {
    let model = model.trim();
    if key.is_empty() || model.is_empty() {
        return;
    }
    map.insert(key, model.to_string());
}

mod error;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{
    Deserialize,
    Serialize,
};
use tera::{
    Context,
    Tera,
};
use tracing::warn;

pub use crate::error::{
    TemplateError,
    TemplateResult,
};

const TEMPLATE_SUFFIX: &str = ".json.tera";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct TemplateMeta {
    name: String,
    #[serde(default)]
    ports: Option<u32>,
    #[serde(default)]
    commands: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct TemplateDoc {
    template: TemplateMeta,
}

/// A loaded container specification template. `raw` is the template's
/// source text, unrendered — `render` feeds it through `tera` and
/// reparses the result, rather than caching a pre-parsed structure,
/// since the whole document (not just `template.commands`) may carry
/// placeholders.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub ports: Option<u32>,
    pub commands: Vec<Vec<String>>,
    raw: String,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Loads and renders the cluster's container specification templates.
///
/// Recognizes files ending in `.json.tera`, parses each as JSON, and
/// indexes by `template.name`. A file that fails to parse is logged and
/// skipped rather than aborting the load, mirroring the
/// try/except-per-file loop around template loading in the system this
/// was distilled from.
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: HashMap<String, Template>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(dir: impl AsRef<Path>) -> TemplateResult<Self> {
        let dir = dir.as_ref();
        let mut store = Self::new();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "template directory unreadable, starting empty");
                return Ok(store);
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(TEMPLATE_SUFFIX) {
                continue;
            }

            match Self::load_one(&path) {
                Ok(template) => {
                    store.templates.insert(template.name.clone(), template);
                }
                Err(e) => {
                    warn!(file = %file_name, error = %e, "cannot load template, skipping");
                }
            }
        }

        Ok(store)
    }

    fn load_one(path: &Path) -> Result<Template, String> {
        let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
        let doc: TemplateDoc = serde_json::from_str(&raw).map_err(|e| e.to_string())?;

        Ok(Template {
            name: doc.template.name,
            ports: doc.template.ports,
            commands: doc.template.commands,
            raw,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// Renders the named template's full source against `context`,
    /// returning the reparsed JSON specification the host driver expects.
    pub fn render(&self, name: &str, context: &serde_json::Value) -> TemplateResult<serde_json::Value> {
        let template = self
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;

        let rendered = render_str(&template.raw, context)
            .map_err(|cause| TemplateError::Render { name: name.to_string(), cause })?;

        serde_json::from_str(&rendered).map_err(|e| TemplateError::Render {
            name: name.to_string(),
            cause: format!("rendered output is not valid JSON: {e}"),
        })
    }

    /// Renders each item independently against `context`, preserving
    /// order — used for per-argument command placeholders
    /// (`["lxc", "exec", "{{ environment.instance.name }}", ...]`).
    pub fn render_list(&self, items: &[String], context: &serde_json::Value) -> TemplateResult<Vec<String>> {
        items
            .iter()
            .map(|item| {
                render_str(item, context).map_err(|cause| TemplateError::Render {
                    name: "<command-arg>".to_string(),
                    cause,
                })
            })
            .collect()
    }
}

fn render_str(source: &str, context: &serde_json::Value) -> Result<String, String> {
    let tera_context = Context::from_value(context.clone()).map_err(|e| e.to_string())?;
    Tera::one_off(source, &tera_context, false).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::tempdir;

    use super::*;

    fn write_template(dir: &Path, file_name: &str, contents: &str) {
        let mut file = fs::File::create(dir.join(file_name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn load_skips_malformed_files_and_keeps_valid_ones() {
        let dir = tempdir().unwrap();
        write_template(
            dir.path(),
            "cs135-f23.json.tera",
            r#"{"template": {"name": "cs135-f23", "ports": 1, "commands": [["echo", "{{ environment.instance.name }}"]]}}"#,
        );
        write_template(dir.path(), "broken.json.tera", "not json");
        write_template(dir.path(), "ignored.txt", "irrelevant");

        let store = TemplateStore::load(dir.path()).unwrap();
        assert!(store.get("cs135-f23").is_some());
        assert_eq!(store.templates.len(), 1);
    }

    #[test]
    fn render_substitutes_context_and_reparses_json() {
        let dir = tempdir().unwrap();
        write_template(
            dir.path(),
            "t.json.tera",
            r#"{"template": {"name": "t"}, "name": "{{ environment.instance.name }}", "ports": {{ ports }}}"#,
        );
        let store = TemplateStore::load(dir.path()).unwrap();

        let context = serde_json::json!({
            "environment": { "instance": { "name": "box1" } },
            "ports": [9000, 9001],
        });

        let rendered = store.render("t", &context).unwrap();
        assert_eq!(rendered["name"], "box1");
        assert_eq!(rendered["ports"], serde_json::json!([9000, 9001]));
    }

    #[test]
    fn render_missing_template_is_not_found() {
        let store = TemplateStore::new();
        let err = store.render("missing", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(_)));
    }

    #[test]
    fn render_list_preserves_order_and_renders_each_item() {
        let store = TemplateStore::new();
        let items = vec![
            "lxc".to_string(),
            "exec".to_string(),
            "{{ environment.instance.name }}".to_string(),
        ];
        let context = serde_json::json!({ "environment": { "instance": { "name": "box1" } } });

        let rendered = store.render_list(&items, &context).unwrap();
        assert_eq!(rendered, vec!["lxc", "exec", "box1"]);
    }
}

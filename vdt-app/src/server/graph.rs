//! Static import graph of the project's source modules

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::assets::{is_ignored_dir, relative_id};
use crate::error::ServerError;

pub const MODULE_EXTENSIONS: [&str; 6] = ["js", "ts", "jsx", "tsx", "vue", "mjs"];

const IMPORT_PATTERN: &str = r#"(?:\bimport\s+(?:[\w*{}\s,$]+\s+from\s+)?|\bexport\s+[\w*{}\s,$]+\s+from\s+|\bimport\s*\(\s*|\brequire\s*\(\s*)["']([^"'\n]+)["']"#;

/// One module and the modules it imports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    /// Root-relative path, or the bare specifier for packages
    pub id: String,
    pub deps: Vec<String>,
}

pub fn is_module(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MODULE_EXTENSIONS.contains(&ext))
}

pub struct ImportScanner {
    pattern: Regex,
}

impl ImportScanner {
    pub fn new() -> Result<Self, ServerError> {
        Ok(Self {
            pattern: Regex::new(IMPORT_PATTERN)?,
        })
    }

    /// Import specifiers in `source`, in order of appearance, deduplicated
    pub fn specifiers(&self, source: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for capture in self.pattern.captures_iter(source) {
            let specifier = &capture[1];
            if !found.iter().any(|s| s == specifier) {
                found.push(specifier.to_string());
            }
        }
        found
    }

    /// Scan every module under `root`. `root` must be canonical.
    pub fn graph(&self, root: &Path) -> Vec<ModuleInfo> {
        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| !is_ignored_dir(entry))
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && is_module(entry.path()));

        let mut modules = Vec::new();
        for entry in walker {
            let Some(id) = relative_id(root, entry.path()) else {
                continue;
            };
            let source = match fs::read_to_string(entry.path()) {
                Ok(source) => source,
                Err(e) => {
                    tracing::debug!("Skipping {}: {}", id, e);
                    continue;
                }
            };
            let deps = self
                .specifiers(&source)
                .into_iter()
                .filter_map(|specifier| resolve_import(root, entry.path(), &specifier))
                .collect();
            modules.push(ModuleInfo { id, deps });
        }
        modules.sort_by(|a, b| a.id.cmp(&b.id));
        modules
    }
}

/// Module id for `specifier` imported from `importer`.
///
/// Bare specifiers are kept as they are. Relative ones resolve to a file
/// under `root`, trying module extensions and `index` files; unresolvable
/// ones yield `None`.
fn resolve_import(root: &Path, importer: &Path, specifier: &str) -> Option<String> {
    if !specifier.starts_with("./") && !specifier.starts_with("../") {
        return Some(specifier.to_string());
    }
    let base = importer.parent()?.join(specifier);
    let resolved = candidates(&base)
        .into_iter()
        .find(|candidate| candidate.is_file())
        .and_then(|candidate| candidate.canonicalize().ok());
    match resolved {
        Some(path) => relative_id(root, &path),
        None => {
            tracing::trace!("Unresolved import {} in {}", specifier, importer.display());
            None
        }
    }
}

fn candidates(base: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![base.to_path_buf()];
    let name = base.as_os_str().to_string_lossy();
    for ext in MODULE_EXTENSIONS {
        candidates.push(PathBuf::from(format!("{name}.{ext}")));
    }
    for ext in MODULE_EXTENSIONS {
        candidates.push(base.join(format!("index.{ext}")));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specifiers() {
        let scanner = ImportScanner::new().unwrap();
        let source = r#"
import { createApp } from 'vue'
import App from "./App.vue"
import './style.css'
import * as utils from '../utils'
export { default as Button } from './Button'
const Page = () => import('./pages/Page.vue')
const legacy = require("./legacy")
import { createApp as again } from 'vue'
"#;
        assert_eq!(
            scanner.specifiers(source),
            vec![
                "vue",
                "./App.vue",
                "./style.css",
                "../utils",
                "./Button",
                "./pages/Page.vue",
                "./legacy",
            ]
        );
    }

    #[test]
    fn test_graph_resolves_relative_imports() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("src/components")).unwrap();
        fs::create_dir_all(root.join("src/store")).unwrap();
        fs::create_dir_all(root.join("node_modules/vue")).unwrap();
        fs::write(
            root.join("src/main.ts"),
            "import { createApp } from 'vue'\nimport App from './App.vue'\nimport store from './store'\nimport './missing'\n",
        )
        .unwrap();
        fs::write(
            root.join("src/App.vue"),
            "<script setup>\nimport Hello from './components/Hello.vue'\n</script>\n",
        )
        .unwrap();
        fs::write(root.join("src/components/Hello.vue"), "<template/>").unwrap();
        fs::write(root.join("src/store/index.ts"), "export default {}").unwrap();
        fs::write(root.join("node_modules/vue/index.js"), "import './x'").unwrap();

        let graph = ImportScanner::new().unwrap().graph(&root);
        let ids: Vec<_> = graph.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["src/App.vue", "src/components/Hello.vue", "src/main.ts", "src/store/index.ts"]
        );

        let main = &graph[2];
        assert_eq!(main.deps, vec!["vue", "src/App.vue", "src/store/index.ts"]);
        assert_eq!(graph[0].deps, vec!["src/components/Hello.vue"]);
    }
}

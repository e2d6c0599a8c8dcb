//! Bundled dependency recipes
//!
//! A recipe is a directory `<root>/<name>/` of `NNNN-*.yaml` manifests
//! creating a SpecialResource the cluster does not have yet.

use crate::error::ControllerError;
use crate::stage::stage_number;
use std::path::PathBuf;
use tracing::debug;

/// Source of recipe manifests
#[async_trait::async_trait]
pub trait RecipeSource: Send + Sync {
    /// `(file name, contents)` of every manifest of the recipe, in apply order
    async fn recipe(&self, name: &str) -> Result<Vec<(String, String)>, ControllerError>;
}

/// Recipes read from a directory tree
#[derive(Debug, Clone)]
pub struct DirectoryRecipes {
    root: PathBuf,
}

impl DirectoryRecipes {
    /// Recipes rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn is_recipe_file(name: &str) -> bool {
    stage_number(name).is_some() && name.ends_with(".yaml")
}

#[async_trait::async_trait]
impl RecipeSource for DirectoryRecipes {
    async fn recipe(&self, name: &str) -> Result<Vec<(String, String)>, ControllerError> {
        let dir = self.root.join(name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Recipe directory {} unreadable: {}", dir.display(), e);
                return Err(ControllerError::RecipeMissing(name.to_string()));
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ControllerError::InvalidConfig(format!("reading {}: {}", dir.display(), e)))?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if is_recipe_file(&file_name) {
                files.push(file_name);
            }
        }
        if files.is_empty() {
            return Err(ControllerError::RecipeMissing(name.to_string()));
        }
        files.sort();

        let mut manifests = Vec::with_capacity(files.len());
        for file_name in files {
            let path = dir.join(&file_name);
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ControllerError::InvalidConfig(format!("reading {}: {}", path.display(), e)))?;
            manifests.push((file_name, contents));
        }
        Ok(manifests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sro-recipes-{}-{}", tag, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    #[tokio::test]
    async fn test_reads_state_files_in_order() {
        let root = scratch_dir("order");
        let recipe = root.join("base");
        std::fs::create_dir_all(&recipe).expect("recipe dir");
        std::fs::write(recipe.join("0001-b.yaml"), "b").expect("write");
        std::fs::write(recipe.join("0000-a.yaml"), "a").expect("write");
        std::fs::write(recipe.join("README.md"), "ignored").expect("write");

        let manifests = DirectoryRecipes::new(&root).recipe("base").await.expect("recipe");
        let names: Vec<_> = manifests.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["0000-a.yaml", "0001-b.yaml"]);
        assert_eq!(manifests[0].1, "a");
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_missing_recipe() {
        let root = scratch_dir("missing");
        let err = DirectoryRecipes::new(&root).recipe("nope").await.expect_err("missing");
        assert!(matches!(err, ControllerError::RecipeMissing(name) if name == "nope"));
        let _ = std::fs::remove_dir_all(root);
    }
}

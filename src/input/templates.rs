use anyhow::{bail, ensure, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::prediction::PromptTemplate;

const TEMPLATE_SUFFIX: &str = ".txt";
const GENE_TEMPLATE_SUFFIX: &str = "_with_genes.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePair {
    pub system_path: PathBuf,
    pub user_path: PathBuf,
}

impl TemplatePair {
    pub fn new(system_path: impl Into<PathBuf>, user_path: impl Into<PathBuf>) -> Self {
        Self {
            system_path: system_path.into(),
            user_path: user_path.into(),
        }
    }

    /// `template1.txt` → `template1_with_genes.txt` for both files.
    pub fn with_genes(&self) -> Self {
        Self {
            system_path: gene_variant(&self.system_path),
            user_path: gene_variant(&self.user_path),
        }
    }

    pub fn paths(&self) -> [&Path; 2] {
        [self.system_path.as_path(), self.user_path.as_path()]
    }

    pub fn load(&self) -> Result<LoadedTemplate> {
        Ok(LoadedTemplate {
            system_path: self.system_path.clone(),
            template: PromptTemplate::new(read_template(&self.system_path)?, read_template(&self.user_path)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    /// Recorded as `Query Template` in the output.
    pub system_path: PathBuf,
    pub template: PromptTemplate,
}

/// Pairs system and user templates by position.
pub fn pair_templates(system: &[PathBuf], user: &[PathBuf]) -> Result<Vec<TemplatePair>> {
    ensure!(
        system.len() == user.len(),
        "{} gabarit(s) système pour {} gabarit(s) utilisateur",
        system.len(),
        user.len()
    );
    Ok(system
        .iter()
        .zip(user)
        .map(|(system, user)| TemplatePair::new(system, user))
        .collect())
}

pub fn ensure_templates_exist<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Result<()> {
    let missing: Vec<String> = paths
        .into_iter()
        .filter(|path| !path.exists())
        .map(|path| format!("- {}", path.display()))
        .collect();
    if !missing.is_empty() {
        bail!("gabarits introuvables:\n{}", missing.join("\n"));
    }
    Ok(())
}

pub fn read_template(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("impossible de lire le gabarit {:?}", path))
}

fn gene_variant(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().replace(TEMPLATE_SUFFIX, GENE_TEMPLATE_SUFFIX))
}

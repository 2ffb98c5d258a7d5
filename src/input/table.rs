use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::output::table_reader;

pub const DEFAULT_NAME_COLUMN: &str = "Binomial.name";
pub const DEFAULT_GENE_COLUMN: &str = "Gene_file";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub binomial_name: String,
    /// File listing this organism's genes, one per line.
    pub gene_file: Option<PathBuf>,
}

/// Reads the distinct, non-empty names of `name_column` in first-seen order.
/// When `gene_column` is given and present, each name keeps the gene file of
/// its first row.
pub fn load_names(path: &Path, name_column: &str, gene_column: Option<&str>) -> Result<Vec<NameEntry>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("impossible de lire le fichier d'entrée {:?}", path))?;
    parse_names(&content, name_column, gene_column).with_context(|| format!("fichier d'entrée {:?}", path))
}

pub fn parse_names(content: &str, name_column: &str, gene_column: Option<&str>) -> Result<Vec<NameEntry>> {
    let mut reader = table_reader().from_reader(content.as_bytes());
    let header: Vec<String> = reader
        .headers()
        .context("en-tête illisible")?
        .iter()
        .map(|column| column.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    if header.iter().all(|column| column.is_empty()) {
        bail!("fichier vide, en-tête attendu");
    }

    let name_idx = header
        .iter()
        .position(|column| column == name_column)
        .ok_or_else(|| anyhow!("colonne {name_column:?} absente de l'en-tête"))?;
    let gene_idx = gene_column.and_then(|gene_column| header.iter().position(|column| column == gene_column));

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("enregistrement {} illisible", idx + 1))?;
        let Some(name) = row.get(name_idx).map(str::trim).filter(|value| !value.is_empty()) else {
            continue;
        };
        if !seen.insert(name.to_string()) {
            continue;
        }
        let gene_file = gene_idx
            .and_then(|idx| row.get(idx))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        entries.push(NameEntry {
            binomial_name: name.to_string(),
            gene_file,
        });
    }
    Ok(entries)
}

/// One gene per line; blank lines are skipped.
pub fn read_gene_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("impossible de lire la liste de gènes {:?}", path))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

use anyhow::Result;

use super::table::{read_gene_file, NameEntry};
use super::templates::LoadedTemplate;
use crate::domain::{ModelHost, PredictionRequest};

#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub host: ModelHost,
    pub temperature: f32,
    pub max_retries: u32,
    pub use_genes: bool,
}

/// Expands names × models × templates into requests, name-major.
pub fn plan_requests(
    names: &[NameEntry],
    models: &[String],
    templates: &[LoadedTemplate],
    options: &PlanOptions,
) -> Result<Vec<PredictionRequest>> {
    let mut requests = Vec::with_capacity(names.len() * models.len() * templates.len());
    for entry in names {
        let gene_list = if options.use_genes {
            Some(match &entry.gene_file {
                Some(path) => read_gene_file(path)?,
                None => Vec::new(),
            })
        } else {
            None
        };

        for model in models {
            for loaded in templates {
                let mut request = PredictionRequest::new(
                    entry.binomial_name.as_str(),
                    model.as_str(),
                    loaded.template.system.as_str(),
                    loaded.template.user.as_str(),
                )
                .with_host(options.host)
                .with_temperature(options.temperature)
                .with_max_retries(options.max_retries)
                .with_template_path(loaded.system_path.to_string_lossy());
                request.gene_list = gene_list.clone();
                requests.push(request);
            }
        }
    }
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_MAX_RETRIES;
    use crate::prediction::PromptTemplate;
    use std::fs;
    use std::path::PathBuf;

    fn template(name: &str) -> LoadedTemplate {
        LoadedTemplate {
            system_path: PathBuf::from(format!("templates/system/{name}.txt")),
            template: PromptTemplate::new("sys", "Describe {binomial_name}: {gene_list}"),
        }
    }

    fn options(use_genes: bool) -> PlanOptions {
        PlanOptions {
            host: ModelHost::OpenAi,
            temperature: 0.2,
            max_retries: DEFAULT_MAX_RETRIES,
            use_genes,
        }
    }

    #[test]
    fn expands_every_combination() {
        let names = vec![
            NameEntry { binomial_name: "Escherichia coli".into(), gene_file: None },
            NameEntry { binomial_name: "Bacillus subtilis".into(), gene_file: None },
        ];
        let models = vec!["openai/gpt-4o".to_string(), "anthropic/claude-3".to_string()];
        let templates = vec![template("t1"), template("t2"), template("t3")];

        let requests = plan_requests(&names, &models, &templates, &options(false)).unwrap();
        assert_eq!(requests.len(), 12);
        assert_eq!(requests[0].binomial_name, "Escherichia coli");
        assert_eq!(requests[0].template_path, "templates/system/t1.txt");
        assert_eq!(requests[3].model_id, "anthropic/claude-3");
        assert_eq!(requests[6].binomial_name, "Bacillus subtilis");
        assert!(requests.iter().all(|r| r.host == ModelHost::OpenAi && r.gene_list.is_none()));
    }

    #[test]
    fn gene_lists_are_read_once_per_name() {
        let path = std::env::temp_dir().join(format!("microbellm-{}.txt", uuid::Uuid::new_v4()));
        fs::write(&path, "recA\ngyrB\n").unwrap();
        let names = vec![
            NameEntry { binomial_name: "Escherichia coli".into(), gene_file: Some(path.clone()) },
            NameEntry { binomial_name: "Bacillus subtilis".into(), gene_file: None },
        ];
        let requests = plan_requests(&names, &["m".to_string()], &[template("t1")], &options(true)).unwrap();
        assert_eq!(requests[0].gene_list, Some(vec!["recA".to_string(), "gyrB".to_string()]));
        assert_eq!(requests[1].gene_list, Some(Vec::new()));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unreadable_gene_file_fails_the_plan() {
        let names = vec![NameEntry {
            binomial_name: "Escherichia coli".into(),
            gene_file: Some(PathBuf::from("/nonexistent/microbellm/genes.txt")),
        }];
        assert!(plan_requests(&names, &["m".to_string()], &[template("t1")], &options(true)).is_err());
    }
}

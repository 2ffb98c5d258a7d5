mod plan;
mod table;
mod templates;

pub use plan::{plan_requests, PlanOptions};
pub use table::{load_names, parse_names, read_gene_file, NameEntry, DEFAULT_GENE_COLUMN, DEFAULT_NAME_COLUMN};
pub use templates::{ensure_templates_exist, pair_templates, read_template, LoadedTemplate, TemplatePair};

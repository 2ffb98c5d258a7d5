use crate::domain::{ChatMessage, PredictionRequest, PromptMessages};

pub const BINOMIAL_NAME_PLACEHOLDER: &str = "{binomial_name}";
pub const GENE_LIST_PLACEHOLDER: &str = "{gene_list}";

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
}

impl PromptTemplate {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    pub fn render(&self, binomial_name: &str, gene_list: Option<&[String]>) -> PromptMessages {
        [
            ChatMessage::system(self.system.clone()),
            ChatMessage::user(render_user_prompt(&self.user, binomial_name, gene_list)),
        ]
    }
}

/// Only `{binomial_name}` and `{gene_list}` are substituted; an empty gene
/// list leaves `{gene_list}` untouched.
pub fn render_user_prompt(template: &str, binomial_name: &str, gene_list: Option<&[String]>) -> String {
    let rendered = template.replace(BINOMIAL_NAME_PLACEHOLDER, binomial_name);
    match gene_list {
        Some(genes) if !genes.is_empty() => rendered.replace(GENE_LIST_PLACEHOLDER, &genes.join(", ")),
        _ => rendered,
    }
}

pub fn render_request(request: &PredictionRequest) -> PromptMessages {
    PromptTemplate::new(request.system_prompt.as_str(), request.user_prompt_template.as_str())
        .render(&request.binomial_name, request.gene_list.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;

    #[test]
    fn substitutes_binomial_name_everywhere() {
        let text = render_user_prompt("Describe {binomial_name}. Is {binomial_name} motile?", "Bacillus subtilis", None);
        assert_eq!(text, "Describe Bacillus subtilis. Is Bacillus subtilis motile?");
    }

    #[test]
    fn gene_list_is_joined_with_comma_space() {
        let genes = vec!["recA".to_string(), "gyrB".to_string(), "rpoB".to_string()];
        let text = render_user_prompt("{binomial_name}: {gene_list}", "Escherichia coli", Some(genes.as_slice()));
        assert_eq!(text, "Escherichia coli: recA, gyrB, rpoB");
    }

    #[test]
    fn unknown_and_missing_placeholders_are_left_alone() {
        let text = render_user_prompt("{species} {gene_list}", "Escherichia coli", None);
        assert_eq!(text, "{species} {gene_list}");
        let text = render_user_prompt("{gene_list}", "Escherichia coli", Some(Vec::new().as_slice()));
        assert_eq!(text, "{gene_list}");
    }

    #[test]
    fn system_prompt_is_not_rendered() {
        let template = PromptTemplate::new("About {binomial_name}", "Describe {binomial_name}.");
        let [system, user] = template.render("Bacillus subtilis", None);
        assert_eq!(system.role, Role::System);
        assert_eq!(system.content, "About {binomial_name}");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.content, "Describe Bacillus subtilis.");
    }
}

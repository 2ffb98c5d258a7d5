use once_cell::sync::Lazy;
use regex::Regex;

const BATCH_ID_PREFIX: &str = "request-";

/// `request-Escherichia_coli` for `Escherichia coli`.
pub fn batch_custom_id(binomial_name: &str) -> String {
    static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s").unwrap());
    let replaced = RE.replace_all(binomial_name.trim(), "_");
    format!("{BATCH_ID_PREFIX}{replaced}")
}
